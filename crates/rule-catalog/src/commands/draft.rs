//! 草稿保存与提交

use async_trait::async_trait;
use rule_engine::{RuleCompiler, RuleEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

use super::{Command, CommandContext, require_text};
use crate::audit;
use crate::catalog::{InitialVersion, create_initial_version};
use crate::error::{CatalogError, Result};
use crate::models::{
    DictionaryScope, DraftContent, DraftView, EventType, NewRuleEvent, ParameterInput,
    ParameterSpec, Role, RuleView, SubmissionStatus, TagInput, TagSpec, non_blank_tags,
};
use crate::queries::{project_draft, project_rule, require_active_group};
use crate::store::CatalogTx;

/// 新建或更新草稿
///
/// 带 `draft_id` 时覆盖该草稿，并以本次提交的列表整体替换其参数、标签映射。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveDraft {
    pub rule_group_id: i64,
    #[serde(default)]
    pub draft_id: Option<i64>,
    #[validate(length(min = 1, max = 255, message = "规则名称长度必须在1-255个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 条件树文档
    pub json_rule: Value,
    #[serde(default)]
    pub event: Option<RuleEvent>,
    #[serde(default)]
    #[validate(nested)]
    pub parameters: Vec<ParameterInput>,
    #[serde(default)]
    pub tags: Vec<TagInput>,
}

impl SaveDraft {
    pub fn new(rule_group_id: i64, name: impl Into<String>, json_rule: Value) -> Self {
        Self {
            rule_group_id,
            draft_id: None,
            name: name.into(),
            description: None,
            json_rule,
            event: None,
            parameters: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn updating(mut self, draft_id: i64) -> Self {
        self.draft_id = Some(draft_id);
        self
    }

    pub fn with_event(mut self, event: RuleEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<ParameterInput>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_tags(mut self, tags: Vec<TagInput>) -> Self {
        self.tags = tags;
        self
    }

    /// 保存的文档：条件树 + 事件 + 参数/标签列表（仅用于展示）
    fn merged_document(&self) -> Result<Value> {
        let mut document = match &self.json_rule {
            Value::String(text) => serde_json::from_str::<Value>(text)?,
            other => other.clone(),
        };
        let Value::Object(obj) = &mut document else {
            return Err(CatalogError::Validation("json_rule 必须是对象".to_string()));
        };

        if let Some(event) = &self.event {
            obj.insert(
                "event".to_string(),
                json!({ "type": event.event_type, "params": event.params }),
            );
        }
        obj.insert("parameters".to_string(), serde_json::to_value(&self.parameters)?);
        obj.insert(
            "tags".to_string(),
            serde_json::to_value(non_blank_tags(&self.tags))?,
        );
        Ok(document)
    }
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl Command for SaveDraft {
    type Output = DraftView;
    const NAME: &'static str = "SaveDraft";

    fn required_role(&self) -> Option<Role> {
        Some(Role::Maker)
    }

    fn validate(&self) -> Result<()> {
        require_text("name", &self.name)?;
        Validate::validate(self)?;
        if is_empty_document(&self.json_rule) {
            return Err(CatalogError::Validation("json_rule 不能为空".to_string()));
        }

        RuleCompiler::new().compile_value(&self.json_rule)?;
        for parameter in &self.parameters {
            parameter.resolve()?;
        }
        Ok(())
    }

    async fn execute(&self, tx: &mut dyn CatalogTx, ctx: &CommandContext<'_>) -> Result<DraftView> {
        require_active_group(tx, self.rule_group_id).await?;
        ctx.engine.compiler().compile_value(&self.json_rule)?;

        let content = DraftContent {
            rule_group_id: self.rule_group_id,
            name: self.name.trim().to_string(),
            description: self.description.clone(),
            json_rule: self.merged_document()?,
            actor: ctx.actor.username.clone(),
        };

        let draft = match self.draft_id {
            Some(draft_id) => {
                let draft = tx.update_draft(draft_id, &content).await?.ok_or_else(|| {
                    CatalogError::NotFound(format!("草稿不存在或已提交: {draft_id}"))
                })?;
                tx.clear_draft_links(draft.id).await?;
                draft
            }
            None => tx.insert_draft(&content).await?,
        };

        let strict = ctx.settings.require_revision_token;
        let actor = ctx.actor.username.as_str();
        for input in &self.parameters {
            let spec = input.resolve()?;
            let def = tx
                .upsert_parameter(DictionaryScope::Draft, &spec, actor, strict)
                .await?;
            tx.link_parameter(DictionaryScope::Draft, draft.id, def.id)
                .await?;
        }
        for input in non_blank_tags(&self.tags) {
            let spec = input.resolve()?;
            let def = tx.upsert_tag(DictionaryScope::Draft, &spec, actor, strict).await?;
            tx.link_tag(DictionaryScope::Draft, draft.id, def.id).await?;
        }

        info!(
            draft_id = draft.id,
            rule_group_id = draft.rule_group_id,
            updated = self.draft_id.is_some(),
            "草稿已保存"
        );
        project_draft(tx, draft).await
    }
}

/// 提交草稿，生成 PENDING 状态的版本 1
///
/// 参数与标签取自草稿当前关联的字典行，而不是草稿文档中内嵌的列表。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDraft {
    pub rule_group_id: i64,
    pub draft_id: i64,
}

impl SubmitDraft {
    pub fn new(rule_group_id: i64, draft_id: i64) -> Self {
        Self {
            rule_group_id,
            draft_id,
        }
    }
}

#[async_trait]
impl Command for SubmitDraft {
    type Output = RuleView;
    const NAME: &'static str = "SubmitDraft";

    fn required_role(&self) -> Option<Role> {
        Some(Role::Maker)
    }

    async fn execute(&self, tx: &mut dyn CatalogTx, ctx: &CommandContext<'_>) -> Result<RuleView> {
        require_active_group(tx, self.rule_group_id).await?;

        let draft = tx
            .get_draft(self.draft_id)
            .await?
            .filter(|d| d.rule_group_id == self.rule_group_id)
            .ok_or_else(|| CatalogError::NotFound(format!("草稿不存在: {}", self.draft_id)))?;
        if draft.submission_status != SubmissionStatus::Drafted {
            return Err(CatalogError::Conflict(format!(
                "草稿 {} 已提交",
                self.draft_id
            )));
        }

        let json_rule = match &draft.json_rule {
            Value::String(text) => serde_json::from_str::<Value>(text)?,
            other => other.clone(),
        };
        let compiled = ctx.engine.compiler().compile_value(&json_rule)?;

        let parameters: Vec<ParameterSpec> = tx
            .parameters_of(DictionaryScope::Draft, draft.id)
            .await?
            .iter()
            .map(ParameterSpec::from)
            .collect();
        let tags: Vec<TagSpec> = tx
            .tags_of(DictionaryScope::Draft, draft.id)
            .await?
            .iter()
            .map(TagSpec::from)
            .collect();

        let actor = ctx.actor.username.as_str();
        let initial = InitialVersion::from_document(
            draft.rule_group_id,
            draft.name.clone(),
            draft.description.clone(),
            json_rule,
            &compiled,
        );
        let rule = create_initial_version(tx, initial, &parameters, &tags, actor).await?;

        if !tx.mark_draft_submitted(draft.id, actor).await? {
            return Err(CatalogError::Conflict(format!("草稿 {} 已提交", draft.id)));
        }

        audit::append(
            tx,
            NewRuleEvent::new(
                EventType::RuleCreated,
                rule.id,
                json!({
                    "rule_id": rule.id,
                    "rule_group_id": rule.rule_group_id,
                    "name": rule.name,
                    "version": rule.version,
                    "draft_id": draft.id,
                    "status": rule.status,
                }),
            )
            .with_metadata(&ctx.metadata()),
        )
        .await?;

        info!(draft_id = draft.id, rule_id = rule.id, "草稿已提交，等待审批");
        project_rule(tx, rule).await
    }
}
