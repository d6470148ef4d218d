//! 内存存储实现
//!
//! 开启事务时持有全局锁并复制一份状态，提交时整体写回，丢弃即回滚。
//! 事务之间完全串行，用于测试与嵌入式场景。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CatalogStore, CatalogTx};
use crate::error::{CatalogError, Result};
use crate::models::{
    DictionaryScope, DraftContent, EvaluationLogEntry, HistoryEntry, NewEvaluationLog, NewRule,
    NewRuleEvent, NewRuleGroup, PageRequest, ParameterDef, ParameterSpec, Review, Rule,
    RuleDraft, RuleEventRecord, RuleFilter, RuleGroup, RuleStatus, SubmissionStatus, TagDef,
    TagSpec, UpsertDecision, decide_upsert,
};

/// 一套字典及其映射
#[derive(Debug, Clone, Default)]
struct Dictionary {
    parameters: Vec<ParameterDef>,
    tags: Vec<TagDef>,
    /// (owner_id, parameter_id)
    parameter_links: BTreeSet<(i64, i64)>,
    /// (owner_id, tag_id)
    tag_links: BTreeSet<(i64, i64)>,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    groups: Vec<RuleGroup>,
    drafts: Vec<RuleDraft>,
    rules: Vec<Rule>,
    draft_dictionary: Dictionary,
    catalog_dictionary: Dictionary,
    events: Vec<RuleEventRecord>,
    logs: Vec<EvaluationLogEntry>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn dictionary(&self, scope: DictionaryScope) -> &Dictionary {
        match scope {
            DictionaryScope::Draft => &self.draft_dictionary,
            DictionaryScope::Catalog => &self.catalog_dictionary,
        }
    }

    fn dictionary_mut(&mut self, scope: DictionaryScope) -> &mut Dictionary {
        match scope {
            DictionaryScope::Draft => &mut self.draft_dictionary,
            DictionaryScope::Catalog => &mut self.catalog_dictionary,
        }
    }

    fn rule_mut(&mut self, rule_id: i64) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.id == rule_id)
    }

    fn group_is_active(&self, group_id: i64) -> bool {
        self.groups.iter().any(|g| g.id == group_id && g.is_active)
    }
}

fn paginate<T: Clone>(items: &[T], page: &PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(page.offset().max(0) as usize)
        .take(page.page_size.max(0) as usize)
        .cloned()
        .collect()
}

fn name_matches(name: &str, search: Option<&str>) -> bool {
    match search.map(str::trim) {
        None | Some("") => true,
        Some(term) => name.to_lowercase().contains(&term.to_lowercase()),
    }
}

/// 内存规则目录存储
#[derive(Clone, Default)]
pub struct MemoryCatalogStore {
    state: Arc<Mutex<State>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryCatalogTx { guard, working }))
    }
}

/// 内存事务
pub struct MemoryCatalogTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl CatalogTx for MemoryCatalogTx {
    // ==================== 规则组 ====================

    async fn get_rule_group(&mut self, group_id: i64) -> Result<Option<RuleGroup>> {
        Ok(self.working.groups.iter().find(|g| g.id == group_id).cloned())
    }

    async fn find_rule_group_by_name(&mut self, name: &str) -> Result<Option<RuleGroup>> {
        Ok(self.working.groups.iter().find(|g| g.name == name).cloned())
    }

    async fn insert_rule_group(&mut self, group: &NewRuleGroup) -> Result<RuleGroup> {
        if self.working.groups.iter().any(|g| g.name == group.name) {
            return Err(CatalogError::Conflict("规则组名称已存在".to_string()));
        }

        let row = RuleGroup {
            id: self.working.next_id(),
            name: group.name.clone(),
            description: group.description.clone(),
            execution_type: group.execution_type.clone(),
            is_active: true,
            created_by: group.created_by.clone(),
            created_at: Utc::now(),
        };
        self.working.groups.push(row.clone());
        Ok(row)
    }

    async fn list_rule_groups(
        &mut self,
        search: Option<&str>,
        page: &PageRequest,
    ) -> Result<(Vec<RuleGroup>, i64)> {
        let mut matched: Vec<RuleGroup> = self
            .working
            .groups
            .iter()
            .filter(|g| name_matches(&g.name, search))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok((paginate(&matched, page), matched.len() as i64))
    }

    // ==================== 草稿 ====================

    async fn get_draft(&mut self, draft_id: i64) -> Result<Option<RuleDraft>> {
        Ok(self.working.drafts.iter().find(|d| d.id == draft_id).cloned())
    }

    async fn insert_draft(&mut self, content: &DraftContent) -> Result<RuleDraft> {
        let now = Utc::now();
        let draft = RuleDraft {
            id: self.working.next_id(),
            rule_group_id: content.rule_group_id,
            name: content.name.clone(),
            description: content.description.clone(),
            json_rule: content.json_rule.clone(),
            submission_status: SubmissionStatus::Drafted,
            created_by: content.actor.clone(),
            updated_by: content.actor.clone(),
            created_at: now,
            updated_at: now,
        };
        self.working.drafts.push(draft.clone());
        Ok(draft)
    }

    async fn update_draft(
        &mut self,
        draft_id: i64,
        content: &DraftContent,
    ) -> Result<Option<RuleDraft>> {
        let Some(draft) = self.working.drafts.iter_mut().find(|d| {
            d.id == draft_id
                && d.rule_group_id == content.rule_group_id
                && d.submission_status == SubmissionStatus::Drafted
        }) else {
            return Ok(None);
        };

        draft.name = content.name.clone();
        draft.description = content.description.clone();
        draft.json_rule = content.json_rule.clone();
        draft.updated_by = content.actor.clone();
        draft.updated_at = Utc::now();
        Ok(Some(draft.clone()))
    }

    async fn mark_draft_submitted(&mut self, draft_id: i64, actor: &str) -> Result<bool> {
        let Some(draft) = self
            .working
            .drafts
            .iter_mut()
            .find(|d| d.id == draft_id && d.submission_status == SubmissionStatus::Drafted)
        else {
            return Ok(false);
        };

        draft.submission_status = SubmissionStatus::Submitted;
        draft.updated_by = actor.to_string();
        draft.updated_at = Utc::now();
        Ok(true)
    }

    async fn clear_draft_links(&mut self, draft_id: i64) -> Result<()> {
        let dict = self.working.dictionary_mut(DictionaryScope::Draft);
        dict.parameter_links.retain(|(owner, _)| *owner != draft_id);
        dict.tag_links.retain(|(owner, _)| *owner != draft_id);
        Ok(())
    }

    // ==================== 字典 ====================

    async fn upsert_parameter(
        &mut self,
        scope: DictionaryScope,
        spec: &ParameterSpec,
        _actor: &str,
        strict: bool,
    ) -> Result<ParameterDef> {
        let id = self.working.next_id();
        let dict = self.working.dictionary_mut(scope);

        let Some(existing) = dict.parameters.iter_mut().find(|p| p.name == spec.name) else {
            let row = ParameterDef {
                id,
                name: spec.name.clone(),
                data_type: spec.data_type,
                description: spec.description.clone(),
                is_required: spec.is_required,
                default_value: spec.default_value.clone(),
                revision: 1,
            };
            dict.parameters.push(row.clone());
            return Ok(row);
        };

        let decision = decide_upsert(
            &spec.name,
            existing.revision,
            spec.same_definition(existing),
            spec.expected_revision,
            strict,
        )?;

        if decision == UpsertDecision::Update {
            existing.data_type = spec.data_type;
            existing.description = spec.description.clone();
            existing.is_required = spec.is_required;
            existing.default_value = spec.default_value.clone();
            existing.revision += 1;
        }

        Ok(existing.clone())
    }

    async fn upsert_tag(
        &mut self,
        scope: DictionaryScope,
        spec: &TagSpec,
        _actor: &str,
        strict: bool,
    ) -> Result<TagDef> {
        let id = self.working.next_id();
        let dict = self.working.dictionary_mut(scope);

        let Some(existing) = dict.tags.iter_mut().find(|t| t.name == spec.name) else {
            let row = TagDef {
                id,
                name: spec.name.clone(),
                description: spec.description.clone(),
                revision: 1,
            };
            dict.tags.push(row.clone());
            return Ok(row);
        };

        let decision = decide_upsert(
            &spec.name,
            existing.revision,
            spec.same_definition(existing),
            spec.expected_revision,
            strict,
        )?;

        if decision == UpsertDecision::Update {
            existing.description = spec.description.clone();
            existing.revision += 1;
        }

        Ok(existing.clone())
    }

    async fn link_parameter(
        &mut self,
        scope: DictionaryScope,
        owner_id: i64,
        parameter_id: i64,
    ) -> Result<()> {
        self.working
            .dictionary_mut(scope)
            .parameter_links
            .insert((owner_id, parameter_id));
        Ok(())
    }

    async fn link_tag(&mut self, scope: DictionaryScope, owner_id: i64, tag_id: i64) -> Result<()> {
        self.working
            .dictionary_mut(scope)
            .tag_links
            .insert((owner_id, tag_id));
        Ok(())
    }

    async fn parameters_of(
        &mut self,
        scope: DictionaryScope,
        owner_id: i64,
    ) -> Result<Vec<ParameterDef>> {
        let dict = self.working.dictionary(scope);
        let mut rows: Vec<ParameterDef> = dict
            .parameters
            .iter()
            .filter(|p| dict.parameter_links.contains(&(owner_id, p.id)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn tags_of(&mut self, scope: DictionaryScope, owner_id: i64) -> Result<Vec<TagDef>> {
        let dict = self.working.dictionary(scope);
        let mut rows: Vec<TagDef> = dict
            .tags
            .iter()
            .filter(|t| dict.tag_links.contains(&(owner_id, t.id)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn copy_parameter_links(&mut self, from_rule_id: i64, to_rule_id: i64) -> Result<()> {
        let dict = self.working.dictionary_mut(DictionaryScope::Catalog);
        let copied: Vec<(i64, i64)> = dict
            .parameter_links
            .iter()
            .filter(|(owner, _)| *owner == from_rule_id)
            .map(|(_, parameter_id)| (to_rule_id, *parameter_id))
            .collect();
        dict.parameter_links.extend(copied);
        Ok(())
    }

    async fn copy_tag_links(&mut self, from_rule_id: i64, to_rule_id: i64) -> Result<()> {
        let dict = self.working.dictionary_mut(DictionaryScope::Catalog);
        let copied: Vec<(i64, i64)> = dict
            .tag_links
            .iter()
            .filter(|(owner, _)| *owner == from_rule_id)
            .map(|(_, tag_id)| (to_rule_id, *tag_id))
            .collect();
        dict.tag_links.extend(copied);
        Ok(())
    }

    // ==================== 规则版本 ====================

    async fn insert_rule(&mut self, rule: &NewRule) -> Result<Rule> {
        let duplicate = self.working.rules.iter().any(|r| {
            r.rule_group_id == rule.rule_group_id
                && r.name == rule.name
                && (r.version == rule.version || r.is_latest)
        });
        if duplicate {
            return Err(CatalogError::Conflict(
                "同名规则的该版本或最新版本已存在".to_string(),
            ));
        }

        let now = Utc::now();
        let row = Rule {
            id: self.working.next_id(),
            rule_group_id: rule.rule_group_id,
            name: rule.name.clone(),
            description: rule.description.clone(),
            json_rule: rule.json_rule.clone(),
            version: rule.version,
            is_latest: true,
            is_active: true,
            status: RuleStatus::Pending,
            priority: rule.priority,
            action_type: rule.action_type.clone(),
            action_value: rule.action_value.clone(),
            created_by: rule.created_by.clone(),
            updated_by: rule.created_by.clone(),
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            review_comments: None,
        };
        self.working.rules.push(row.clone());
        Ok(row)
    }

    async fn get_rule(&mut self, group_id: i64, rule_id: i64) -> Result<Option<Rule>> {
        Ok(self
            .working
            .rules
            .iter()
            .find(|r| r.id == rule_id && r.rule_group_id == group_id)
            .cloned())
    }

    async fn lock_rule(&mut self, group_id: i64, rule_id: i64) -> Result<Option<Rule>> {
        self.get_rule(group_id, rule_id).await
    }

    async fn find_version(
        &mut self,
        group_id: i64,
        name: &str,
        version: i32,
    ) -> Result<Option<Rule>> {
        Ok(self
            .working
            .rules
            .iter()
            .find(|r| {
                r.rule_group_id == group_id && r.name == name && r.version == version && r.is_active
            })
            .cloned())
    }

    async fn find_latest(&mut self, group_id: i64, name: &str) -> Result<Option<Rule>> {
        Ok(self
            .working
            .rules
            .iter()
            .find(|r| r.rule_group_id == group_id && r.name == name && r.is_latest)
            .cloned())
    }

    async fn max_version(&mut self, group_id: i64, name: &str) -> Result<Option<i32>> {
        Ok(self
            .working
            .rules
            .iter()
            .filter(|r| r.rule_group_id == group_id && r.name == name)
            .map(|r| r.version)
            .max())
    }

    async fn set_latest(&mut self, rule_id: i64, is_latest: bool, actor: &str) -> Result<()> {
        let Some(target) = self.working.rules.iter().find(|r| r.id == rule_id).cloned() else {
            return Ok(());
        };

        if is_latest
            && self.working.rules.iter().any(|r| {
                r.id != rule_id
                    && r.rule_group_id == target.rule_group_id
                    && r.name == target.name
                    && r.is_latest
            })
        {
            return Err(CatalogError::Conflict("同名规则已存在最新版本".to_string()));
        }

        if let Some(rule) = self.working.rule_mut(rule_id) {
            rule.is_latest = is_latest;
            rule.updated_by = actor.to_string();
            rule.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn review_rule(
        &mut self,
        group_id: i64,
        rule_id: i64,
        review: &Review,
    ) -> Result<Option<Rule>> {
        let Some(rule) = self.working.rules.iter_mut().find(|r| {
            r.id == rule_id && r.rule_group_id == group_id && r.status == RuleStatus::Pending
        }) else {
            return Ok(None);
        };

        let now = Utc::now();
        rule.status = review.target_status();
        rule.review_comments = review.comments().map(str::to_string);
        rule.updated_by = review.reviewer().to_string();
        rule.updated_at = now;
        match review {
            Review::Approve { by, .. } => {
                rule.approved_by = Some(by.clone());
                rule.approved_at = Some(now);
            }
            Review::Reject { by, .. } => {
                rule.rejected_by = Some(by.clone());
                rule.rejected_at = Some(now);
                rule.rejection_reason = review.reason().map(str::to_string);
            }
        }

        Ok(Some(rule.clone()))
    }

    async fn list_rules(
        &mut self,
        group_id: i64,
        filter: &RuleFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Rule>, i64)> {
        let mut matched: Vec<Rule> = self
            .working
            .rules
            .iter()
            .filter(|r| r.rule_group_id == group_id && r.is_latest && r.is_active)
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok((paginate(&matched, page), matched.len() as i64))
    }

    async fn list_rules_by_status(
        &mut self,
        group_id: Option<i64>,
        status: RuleStatus,
    ) -> Result<Vec<Rule>> {
        let mut matched: Vec<Rule> = self
            .working
            .rules
            .iter()
            .filter(|r| r.status == status && group_id.is_none_or(|g| r.rule_group_id == g))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matched)
    }

    async fn evaluation_candidates(&mut self, group_id: i64) -> Result<Vec<Rule>> {
        if !self.working.group_is_active(group_id) {
            return Ok(Vec::new());
        }

        Ok(self
            .working
            .rules
            .iter()
            .filter(|r| {
                r.rule_group_id == group_id && r.is_latest && r.status == RuleStatus::Approved
            })
            .cloned()
            .collect())
    }

    async fn active_rules(&mut self, group_id: i64) -> Result<Vec<Rule>> {
        Ok(self
            .working
            .rules
            .iter()
            .filter(|r| r.rule_group_id == group_id && r.is_active)
            .cloned()
            .collect())
    }

    // ==================== 事件与评估日志 ====================

    async fn append_event(&mut self, event: &NewRuleEvent) -> Result<RuleEventRecord> {
        let sequence_number = self
            .working
            .events
            .iter()
            .filter(|e| e.aggregate_id == event.aggregate_id)
            .map(|e| e.sequence_number)
            .max()
            .unwrap_or(0)
            + 1;

        let record = RuleEventRecord {
            id: self.working.next_id(),
            event_type: event.event_type.as_str().to_string(),
            aggregate_id: event.aggregate_id,
            event_data: event.event_data.clone(),
            metadata: event.metadata.clone(),
            sequence_number,
            created_at: Utc::now(),
        };
        self.working.events.push(record.clone());
        Ok(record)
    }

    async fn events_for_rule_name(
        &mut self,
        group_id: i64,
        name: &str,
        version: Option<i32>,
    ) -> Result<Vec<HistoryEntry>> {
        let group_name = self
            .working
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .map(|g| g.name.clone())
            .unwrap_or_default();

        let mut entries: Vec<HistoryEntry> = self
            .working
            .events
            .iter()
            .filter_map(|e| {
                let rule = self.working.rules.iter().find(|r| r.id == e.aggregate_id)?;
                let in_scope = rule.rule_group_id == group_id
                    && rule.name == name
                    && version.is_none_or(|v| rule.version == v);
                in_scope.then(|| HistoryEntry {
                    event_id: e.id,
                    event_type: e.event_type.clone(),
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    rule_group_name: group_name.clone(),
                    version: rule.version,
                    sequence_number: e.sequence_number,
                    event_data: e.event_data.clone(),
                    metadata: e.metadata.clone(),
                    created_at: e.created_at,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence_number.cmp(&a.sequence_number))
                .then(b.event_id.cmp(&a.event_id))
        });
        Ok(entries)
    }

    async fn insert_evaluation_log(
        &mut self,
        log: &NewEvaluationLog,
    ) -> Result<EvaluationLogEntry> {
        let entry = EvaluationLogEntry {
            id: self.working.next_id(),
            rule_id: log.rule_id,
            rule_group_id: log.rule_group_id,
            input_payload: log.input_payload.clone(),
            result: log.result,
            evaluated_by: log.evaluated_by.clone(),
            trace_id: log.trace_id,
            version: log.version,
            action: log.action.clone(),
            action_type: log.action_type.clone(),
            action_value: log.action_value.clone(),
            created_at: Utc::now(),
        };
        self.working.logs.push(entry.clone());
        Ok(entry)
    }

    async fn evaluation_logs(&mut self, trace_id: Uuid) -> Result<Vec<EvaluationLogEntry>> {
        Ok(self
            .working
            .logs
            .iter()
            .filter(|l| l.trace_id == trace_id)
            .cloned()
            .collect())
    }

    // ==================== 事务控制 ====================

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryCatalogTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
