//! PostgreSQL 存储实现

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{CatalogStore, CatalogTx};
use crate::error::{CatalogError, Result};
use crate::models::{
    DictionaryScope, DraftContent, EvaluationLogEntry, HistoryEntry, NewEvaluationLog, NewRule,
    NewRuleEvent, NewRuleGroup, PageRequest, ParameterDef, ParameterSpec, Review, Rule,
    RuleDraft, RuleEventRecord, RuleFilter, RuleGroup, RuleStatus, SubmissionStatus, TagDef,
    TagSpec, UpsertDecision, decide_upsert,
};

const GROUP_COLUMNS: &str =
    "id, name, description, execution_type, is_active, created_by, created_at";

const DRAFT_COLUMNS: &str = "id, rule_group_id, name, description, json_rule, submission_status, \
     created_by, updated_by, created_at, updated_at";

const RULE_COLUMNS: &str = "id, rule_group_id, name, description, json_rule, version, is_latest, \
     is_active, status, priority, action_type, action_value, created_by, updated_by, created_at, \
     updated_at, approved_by, approved_at, rejected_by, rejected_at, rejection_reason, review_comments";

const PARAMETER_COLUMNS: &str =
    "id, name, data_type, description, is_required, default_value, revision";

const TAG_COLUMNS: &str = "id, name, description, revision";

const EVENT_COLUMNS: &str =
    "id, event_type, aggregate_id, event_data, metadata, sequence_number, created_at";

const LOG_COLUMNS: &str = "id, rule_id, rule_group_id, input_payload, result, evaluated_by, \
     trace_id, version, action, action_type, action_value, created_at";

/// 唯一约束冲突转为 Conflict
fn conflict_on_unique(err: sqlx::Error, context: &str) -> CatalogError {
    let unique_violation = err
        .as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "23505");

    if unique_violation {
        CatalogError::Conflict(context.to_string())
    } else {
        CatalogError::Database(err)
    }
}

fn search_term(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// PostgreSQL 规则目录存储
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCatalogTx { tx }))
    }
}

/// PostgreSQL 事务
pub struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

impl PgCatalogTx {
    async fn select_parameter_for_update(
        &mut self,
        scope: DictionaryScope,
        name: &str,
    ) -> Result<Option<ParameterDef>> {
        let sql = format!(
            "SELECT {PARAMETER_COLUMNS} FROM {} WHERE name = $1 FOR UPDATE",
            scope.parameter_table()
        );
        let row = sqlx::query_as::<_, ParameterDef>(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn select_tag_for_update(
        &mut self,
        scope: DictionaryScope,
        name: &str,
    ) -> Result<Option<TagDef>> {
        let sql = format!(
            "SELECT {TAG_COLUMNS} FROM {} WHERE name = $1 FOR UPDATE",
            scope.tag_table()
        );
        let row = sqlx::query_as::<_, TagDef>(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn link(
        &mut self,
        table: &str,
        owner_column: &str,
        target_column: &str,
        owner_id: i64,
        target_id: i64,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table} ({owner_column}, {target_column}) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(owner_id)
            .bind(target_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn copy_links(
        &mut self,
        table: &str,
        target_column: &str,
        from_rule_id: i64,
        to_rule_id: i64,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} (rule_id, {target_column})
            SELECT $2, {target_column} FROM {table} WHERE rule_id = $1
            ON CONFLICT DO NOTHING
            "#
        );
        sqlx::query(&sql)
            .bind(from_rule_id)
            .bind(to_rule_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    // ==================== 规则组 ====================

    async fn get_rule_group(&mut self, group_id: i64) -> Result<Option<RuleGroup>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM rule_groups WHERE id = $1");
        let group = sqlx::query_as::<_, RuleGroup>(&sql)
            .bind(group_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(group)
    }

    async fn find_rule_group_by_name(&mut self, name: &str) -> Result<Option<RuleGroup>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM rule_groups WHERE name = $1");
        let group = sqlx::query_as::<_, RuleGroup>(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(group)
    }

    async fn insert_rule_group(&mut self, group: &NewRuleGroup) -> Result<RuleGroup> {
        let sql = format!(
            r#"
            INSERT INTO rule_groups (name, description, execution_type, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING {GROUP_COLUMNS}
            "#
        );
        sqlx::query_as::<_, RuleGroup>(&sql)
            .bind(&group.name)
            .bind(&group.description)
            .bind(&group.execution_type)
            .bind(&group.created_by)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| conflict_on_unique(e, "规则组名称已存在"))
    }

    async fn list_rule_groups(
        &mut self,
        search: Option<&str>,
        page: &PageRequest,
    ) -> Result<(Vec<RuleGroup>, i64)> {
        let term = search_term(search);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM rule_groups
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%')
            "#,
        )
        .bind(&term)
        .fetch_one(&mut *self.tx)
        .await?;

        let sql = format!(
            r#"
            SELECT {GROUP_COLUMNS} FROM rule_groups
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%')
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let groups = sqlx::query_as::<_, RuleGroup>(&sql)
            .bind(&term)
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(&mut *self.tx)
            .await?;

        Ok((groups, total))
    }

    // ==================== 草稿 ====================

    async fn get_draft(&mut self, draft_id: i64) -> Result<Option<RuleDraft>> {
        let sql = format!("SELECT {DRAFT_COLUMNS} FROM rule_drafts WHERE id = $1");
        let draft = sqlx::query_as::<_, RuleDraft>(&sql)
            .bind(draft_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(draft)
    }

    async fn insert_draft(&mut self, content: &DraftContent) -> Result<RuleDraft> {
        let sql = format!(
            r#"
            INSERT INTO rule_drafts (rule_group_id, name, description, json_rule, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {DRAFT_COLUMNS}
            "#
        );
        let draft = sqlx::query_as::<_, RuleDraft>(&sql)
            .bind(content.rule_group_id)
            .bind(&content.name)
            .bind(&content.description)
            .bind(&content.json_rule)
            .bind(&content.actor)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(draft)
    }

    async fn update_draft(
        &mut self,
        draft_id: i64,
        content: &DraftContent,
    ) -> Result<Option<RuleDraft>> {
        let sql = format!(
            r#"
            UPDATE rule_drafts
            SET name = $3, description = $4, json_rule = $5, updated_by = $6, updated_at = NOW()
            WHERE id = $1 AND rule_group_id = $2 AND submission_status = $7
            RETURNING {DRAFT_COLUMNS}
            "#
        );
        let draft = sqlx::query_as::<_, RuleDraft>(&sql)
            .bind(draft_id)
            .bind(content.rule_group_id)
            .bind(&content.name)
            .bind(&content.description)
            .bind(&content.json_rule)
            .bind(&content.actor)
            .bind(SubmissionStatus::Drafted)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(draft)
    }

    async fn mark_draft_submitted(&mut self, draft_id: i64, actor: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rule_drafts
            SET submission_status = $2, updated_by = $3, updated_at = NOW()
            WHERE id = $1 AND submission_status = $4
            "#,
        )
        .bind(draft_id)
        .bind(SubmissionStatus::Submitted)
        .bind(actor)
        .bind(SubmissionStatus::Drafted)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear_draft_links(&mut self, draft_id: i64) -> Result<()> {
        for map in [
            DictionaryScope::Draft.parameter_map(),
            DictionaryScope::Draft.tag_map(),
        ] {
            let sql = format!("DELETE FROM {} WHERE {} = $1", map.table, map.owner_column);
            sqlx::query(&sql)
                .bind(draft_id)
                .execute(&mut *self.tx)
                .await?;
        }

        Ok(())
    }

    // ==================== 字典 ====================

    async fn upsert_parameter(
        &mut self,
        scope: DictionaryScope,
        spec: &ParameterSpec,
        actor: &str,
        strict: bool,
    ) -> Result<ParameterDef> {
        let table = scope.parameter_table();

        let existing = match self.select_parameter_for_update(scope, &spec.name).await? {
            Some(row) => row,
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO {table} (name, data_type, description, is_required, default_value, created_by, updated_by)
                    VALUES ($1, $2, $3, $4, $5, $6, $6)
                    ON CONFLICT (name) DO NOTHING
                    RETURNING {PARAMETER_COLUMNS}
                    "#
                );
                let inserted = sqlx::query_as::<_, ParameterDef>(&sql)
                    .bind(&spec.name)
                    .bind(spec.data_type)
                    .bind(&spec.description)
                    .bind(spec.is_required)
                    .bind(&spec.default_value)
                    .bind(actor)
                    .fetch_optional(&mut *self.tx)
                    .await?;

                match inserted {
                    Some(row) => return Ok(row),
                    // 并发插入了同名行，重新读取后按已存在处理
                    None => self
                        .select_parameter_for_update(scope, &spec.name)
                        .await?
                        .ok_or_else(|| {
                            CatalogError::Internal(format!("参数 {} 写入后无法读取", spec.name))
                        })?,
                }
            }
        };

        let decision = decide_upsert(
            &spec.name,
            existing.revision,
            spec.same_definition(&existing),
            spec.expected_revision,
            strict,
        )?;

        match decision {
            UpsertDecision::Keep => Ok(existing),
            UpsertDecision::Update => {
                debug!(name = %spec.name, revision = existing.revision, "覆盖参数定义");
                let sql = format!(
                    r#"
                    UPDATE {table}
                    SET data_type = $2, description = $3, is_required = $4, default_value = $5,
                        revision = revision + 1, updated_by = $6, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {PARAMETER_COLUMNS}
                    "#
                );
                let row = sqlx::query_as::<_, ParameterDef>(&sql)
                    .bind(existing.id)
                    .bind(spec.data_type)
                    .bind(&spec.description)
                    .bind(spec.is_required)
                    .bind(&spec.default_value)
                    .bind(actor)
                    .fetch_one(&mut *self.tx)
                    .await?;

                Ok(row)
            }
        }
    }

    async fn upsert_tag(
        &mut self,
        scope: DictionaryScope,
        spec: &TagSpec,
        actor: &str,
        strict: bool,
    ) -> Result<TagDef> {
        let table = scope.tag_table();

        let existing = match self.select_tag_for_update(scope, &spec.name).await? {
            Some(row) => row,
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO {table} (name, description, created_by, updated_by)
                    VALUES ($1, $2, $3, $3)
                    ON CONFLICT (name) DO NOTHING
                    RETURNING {TAG_COLUMNS}
                    "#
                );
                let inserted = sqlx::query_as::<_, TagDef>(&sql)
                    .bind(&spec.name)
                    .bind(&spec.description)
                    .bind(actor)
                    .fetch_optional(&mut *self.tx)
                    .await?;

                match inserted {
                    Some(row) => return Ok(row),
                    None => self
                        .select_tag_for_update(scope, &spec.name)
                        .await?
                        .ok_or_else(|| {
                            CatalogError::Internal(format!("标签 {} 写入后无法读取", spec.name))
                        })?,
                }
            }
        };

        let decision = decide_upsert(
            &spec.name,
            existing.revision,
            spec.same_definition(&existing),
            spec.expected_revision,
            strict,
        )?;

        match decision {
            UpsertDecision::Keep => Ok(existing),
            UpsertDecision::Update => {
                let sql = format!(
                    r#"
                    UPDATE {table}
                    SET description = $2, revision = revision + 1, updated_by = $3, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {TAG_COLUMNS}
                    "#
                );
                let row = sqlx::query_as::<_, TagDef>(&sql)
                    .bind(existing.id)
                    .bind(&spec.description)
                    .bind(actor)
                    .fetch_one(&mut *self.tx)
                    .await?;

                Ok(row)
            }
        }
    }

    async fn link_parameter(
        &mut self,
        scope: DictionaryScope,
        owner_id: i64,
        parameter_id: i64,
    ) -> Result<()> {
        let map = scope.parameter_map();
        self.link(map.table, map.owner_column, map.target_column, owner_id, parameter_id)
            .await
    }

    async fn link_tag(&mut self, scope: DictionaryScope, owner_id: i64, tag_id: i64) -> Result<()> {
        let map = scope.tag_map();
        self.link(map.table, map.owner_column, map.target_column, owner_id, tag_id)
            .await
    }

    async fn parameters_of(
        &mut self,
        scope: DictionaryScope,
        owner_id: i64,
    ) -> Result<Vec<ParameterDef>> {
        let map = scope.parameter_map();
        let sql = format!(
            r#"
            SELECT p.id, p.name, p.data_type, p.description, p.is_required, p.default_value, p.revision
            FROM {} p
            JOIN {} m ON m.{} = p.id
            WHERE m.{} = $1
            ORDER BY p.name ASC
            "#,
            scope.parameter_table(),
            map.table,
            map.target_column,
            map.owner_column
        );
        let rows = sqlx::query_as::<_, ParameterDef>(&sql)
            .bind(owner_id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows)
    }

    async fn tags_of(&mut self, scope: DictionaryScope, owner_id: i64) -> Result<Vec<TagDef>> {
        let map = scope.tag_map();
        let sql = format!(
            r#"
            SELECT t.id, t.name, t.description, t.revision
            FROM {} t
            JOIN {} m ON m.{} = t.id
            WHERE m.{} = $1
            ORDER BY t.name ASC
            "#,
            scope.tag_table(),
            map.table,
            map.target_column,
            map.owner_column
        );
        let rows = sqlx::query_as::<_, TagDef>(&sql)
            .bind(owner_id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows)
    }

    async fn copy_parameter_links(&mut self, from_rule_id: i64, to_rule_id: i64) -> Result<()> {
        let map = DictionaryScope::Catalog.parameter_map();
        self.copy_links(map.table, map.target_column, from_rule_id, to_rule_id)
            .await
    }

    async fn copy_tag_links(&mut self, from_rule_id: i64, to_rule_id: i64) -> Result<()> {
        let map = DictionaryScope::Catalog.tag_map();
        self.copy_links(map.table, map.target_column, from_rule_id, to_rule_id)
            .await
    }

    // ==================== 规则版本 ====================

    async fn insert_rule(&mut self, rule: &NewRule) -> Result<Rule> {
        let sql = format!(
            r#"
            INSERT INTO rules (rule_group_id, name, description, json_rule, version, is_latest,
                               is_active, status, priority, action_type, action_value,
                               created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, TRUE, TRUE, $6, $7, $8, $9, $10, $10)
            RETURNING {RULE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Rule>(&sql)
            .bind(rule.rule_group_id)
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(&rule.json_rule)
            .bind(rule.version)
            .bind(RuleStatus::Pending)
            .bind(rule.priority)
            .bind(&rule.action_type)
            .bind(&rule.action_value)
            .bind(&rule.created_by)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| conflict_on_unique(e, "同名规则的该版本或最新版本已存在"))
    }

    async fn get_rule(&mut self, group_id: i64, rule_id: i64) -> Result<Option<Rule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = $1 AND rule_group_id = $2");
        let rule = sqlx::query_as::<_, Rule>(&sql)
            .bind(rule_id)
            .bind(group_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(rule)
    }

    async fn lock_rule(&mut self, group_id: i64, rule_id: i64) -> Result<Option<Rule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE id = $1 AND rule_group_id = $2 FOR UPDATE"
        );
        let rule = sqlx::query_as::<_, Rule>(&sql)
            .bind(rule_id)
            .bind(group_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(rule)
    }

    async fn find_version(
        &mut self,
        group_id: i64,
        name: &str,
        version: i32,
    ) -> Result<Option<Rule>> {
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS} FROM rules
            WHERE rule_group_id = $1 AND name = $2 AND version = $3 AND is_active
            "#
        );
        let rule = sqlx::query_as::<_, Rule>(&sql)
            .bind(group_id)
            .bind(name)
            .bind(version)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(rule)
    }

    async fn find_latest(&mut self, group_id: i64, name: &str) -> Result<Option<Rule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE rule_group_id = $1 AND name = $2 AND is_latest"
        );
        let rule = sqlx::query_as::<_, Rule>(&sql)
            .bind(group_id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(rule)
    }

    async fn max_version(&mut self, group_id: i64, name: &str) -> Result<Option<i32>> {
        let max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(version) FROM rules WHERE rule_group_id = $1 AND name = $2",
        )
        .bind(group_id)
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(max)
    }

    async fn set_latest(&mut self, rule_id: i64, is_latest: bool, actor: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rules SET is_latest = $2, updated_by = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .bind(is_latest)
        .bind(actor)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_on_unique(e, "同名规则已存在最新版本"))?;

        Ok(())
    }

    async fn review_rule(
        &mut self,
        group_id: i64,
        rule_id: i64,
        review: &Review,
    ) -> Result<Option<Rule>> {
        let rule = match review {
            Review::Approve { by, comments } => {
                let sql = format!(
                    r#"
                    UPDATE rules
                    SET status = $3, approved_by = $4, approved_at = NOW(), review_comments = $5,
                        updated_by = $4, updated_at = NOW()
                    WHERE id = $1 AND rule_group_id = $2 AND status = $6
                    RETURNING {RULE_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, Rule>(&sql)
                    .bind(rule_id)
                    .bind(group_id)
                    .bind(RuleStatus::Approved)
                    .bind(by)
                    .bind(comments)
                    .bind(RuleStatus::Pending)
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
            Review::Reject {
                by,
                reason,
                comments,
            } => {
                let sql = format!(
                    r#"
                    UPDATE rules
                    SET status = $3, rejected_by = $4, rejected_at = NOW(), rejection_reason = $5,
                        review_comments = $6, updated_by = $4, updated_at = NOW()
                    WHERE id = $1 AND rule_group_id = $2 AND status = $7
                    RETURNING {RULE_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, Rule>(&sql)
                    .bind(rule_id)
                    .bind(group_id)
                    .bind(RuleStatus::Rejected)
                    .bind(by)
                    .bind(reason)
                    .bind(comments)
                    .bind(RuleStatus::Pending)
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
        };

        Ok(rule)
    }

    async fn list_rules(
        &mut self,
        group_id: i64,
        filter: &RuleFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Rule>, i64)> {
        let term = search_term(filter.search.as_deref());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM rules
            WHERE rule_group_id = $1 AND is_latest AND is_active
              AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')
              AND ($3::int IS NULL OR version = $3)
            "#,
        )
        .bind(group_id)
        .bind(&term)
        .bind(filter.version)
        .fetch_one(&mut *self.tx)
        .await?;

        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS} FROM rules
            WHERE rule_group_id = $1 AND is_latest AND is_active
              AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')
              AND ($3::int IS NULL OR version = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let rules = sqlx::query_as::<_, Rule>(&sql)
            .bind(group_id)
            .bind(&term)
            .bind(filter.version)
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(&mut *self.tx)
            .await?;

        Ok((rules, total))
    }

    async fn list_rules_by_status(
        &mut self,
        group_id: Option<i64>,
        status: RuleStatus,
    ) -> Result<Vec<Rule>> {
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS} FROM rules
            WHERE status = $1 AND ($2::bigint IS NULL OR rule_group_id = $2)
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rules = sqlx::query_as::<_, Rule>(&sql)
            .bind(status)
            .bind(group_id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rules)
    }

    async fn evaluation_candidates(&mut self, group_id: i64) -> Result<Vec<Rule>> {
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS} FROM rules
            WHERE rule_group_id = $1 AND is_latest AND status = $2
              AND EXISTS (
                  SELECT 1 FROM rule_groups g WHERE g.id = rules.rule_group_id AND g.is_active
              )
            ORDER BY priority ASC NULLS LAST, id ASC
            "#
        );
        let rules = sqlx::query_as::<_, Rule>(&sql)
            .bind(group_id)
            .bind(RuleStatus::Approved)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rules)
    }

    async fn active_rules(&mut self, group_id: i64) -> Result<Vec<Rule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE rule_group_id = $1 AND is_active ORDER BY id ASC"
        );
        let rules = sqlx::query_as::<_, Rule>(&sql)
            .bind(group_id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rules)
    }

    // ==================== 事件与评估日志 ====================

    async fn append_event(&mut self, event: &NewRuleEvent) -> Result<RuleEventRecord> {
        // 同一 aggregate 的追加在事务内串行化，保证 MAX + 1 不会重复
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(event.aggregate_id)
            .execute(&mut *self.tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO rule_events (event_type, aggregate_id, event_data, metadata, sequence_number)
            SELECT $1, $2, $3, $4, COALESCE(MAX(sequence_number), 0) + 1
            FROM rule_events WHERE aggregate_id = $2
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, RuleEventRecord>(&sql)
            .bind(event.event_type.as_str())
            .bind(event.aggregate_id)
            .bind(&event.event_data)
            .bind(&event.metadata)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(record)
    }

    async fn events_for_rule_name(
        &mut self,
        group_id: i64,
        name: &str,
        version: Option<i32>,
    ) -> Result<Vec<HistoryEntry>> {
        let entries = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT e.id AS event_id, e.event_type, r.id AS rule_id, r.name AS rule_name,
                   g.name AS rule_group_name, r.version, e.sequence_number,
                   e.event_data, e.metadata, e.created_at
            FROM rule_events e
            JOIN rules r ON r.id = e.aggregate_id
            JOIN rule_groups g ON g.id = r.rule_group_id
            WHERE r.rule_group_id = $1 AND r.name = $2
              AND ($3::int IS NULL OR r.version = $3)
            ORDER BY e.created_at DESC, e.sequence_number DESC, e.id DESC
            "#,
        )
        .bind(group_id)
        .bind(name)
        .bind(version)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn insert_evaluation_log(
        &mut self,
        log: &NewEvaluationLog,
    ) -> Result<EvaluationLogEntry> {
        let sql = format!(
            r#"
            INSERT INTO rule_evaluation_logs (rule_id, rule_group_id, input_payload, result,
                                              evaluated_by, trace_id, version, action,
                                              action_type, action_value)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {LOG_COLUMNS}
            "#
        );
        let entry = sqlx::query_as::<_, EvaluationLogEntry>(&sql)
            .bind(log.rule_id)
            .bind(log.rule_group_id)
            .bind(&log.input_payload)
            .bind(log.result)
            .bind(&log.evaluated_by)
            .bind(log.trace_id)
            .bind(log.version)
            .bind(&log.action)
            .bind(&log.action_type)
            .bind(&log.action_value)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(entry)
    }

    async fn evaluation_logs(&mut self, trace_id: Uuid) -> Result<Vec<EvaluationLogEntry>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM rule_evaluation_logs WHERE trace_id = $1 ORDER BY id ASC"
        );
        let entries = sqlx::query_as::<_, EvaluationLogEntry>(&sql)
            .bind(trace_id)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(entries)
    }

    // ==================== 事务控制 ====================

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
