//! 版本回滚
//!
//! 只移动 is_latest 指针，不产生新版本。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{Command, CommandContext};
use crate::audit;
use crate::error::{CatalogError, Result};
use crate::models::{EventType, NewEvaluationLog, NewRuleEvent, RuleView};
use crate::queries::{project_rule, require_active_group};
use crate::store::CatalogTx;

pub const DEFAULT_ROLLBACK_REASON: &str = "Manual rollback";

/// 将最新版本回退到 version - 1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRule {
    pub rule_group_id: i64,
    pub rule_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RollbackRule {
    pub fn new(rule_group_id: i64, rule_id: i64) -> Self {
        Self {
            rule_group_id,
            rule_id,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn reason(&self) -> String {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROLLBACK_REASON)
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// 回滚前的最新版本（已不再是最新）
    pub from: RuleView,
    /// 恢复为最新的版本
    pub to: RuleView,
    pub reason: String,
    pub trace_id: Uuid,
}

#[async_trait]
impl Command for RollbackRule {
    type Output = RollbackOutcome;
    const NAME: &'static str = "RollbackRule";

    async fn execute(
        &self,
        tx: &mut dyn CatalogTx,
        ctx: &CommandContext<'_>,
    ) -> Result<RollbackOutcome> {
        require_active_group(tx, self.rule_group_id).await?;

        let current = tx
            .lock_rule(self.rule_group_id, self.rule_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("规则不存在: {}", self.rule_id)))?;
        if !current.is_active {
            return Err(CatalogError::Conflict(format!(
                "规则 {} 已停用，无法回滚",
                current.id
            )));
        }
        if !current.is_latest {
            return Err(CatalogError::Conflict(format!(
                "规则 {} 不是最新版本，无法回滚",
                current.id
            )));
        }
        if current.version <= 1 {
            return Err(CatalogError::Conflict(format!(
                "规则 {} 已是第一个版本，无法回滚",
                current.name
            )));
        }

        let target_version = current.version - 1;
        let target = tx
            .find_version(self.rule_group_id, &current.name, target_version)
            .await?
            .ok_or_else(|| {
                CatalogError::Conflict(format!(
                    "规则 {} 的版本 {target_version} 不存在或已停用",
                    current.name
                ))
            })?;

        let actor = ctx.actor.username.as_str();
        tx.set_latest(current.id, false, actor).await?;
        tx.set_latest(target.id, true, actor).await?;

        // 合并而非替换：保留目标版本原有的关联
        tx.copy_parameter_links(current.id, target.id).await?;
        tx.copy_tag_links(current.id, target.id).await?;

        let reason = self.reason();
        audit::append(
            tx,
            NewRuleEvent::new(
                EventType::RuleRolledBack,
                current.id,
                json!({
                    "from_version": current.version,
                    "to_version": target.version,
                    "from_rule_id": current.id,
                    "to_rule_id": target.id,
                    "reason": reason,
                }),
            )
            .with_metadata(&ctx.metadata()),
        )
        .await?;

        tx.insert_evaluation_log(&NewEvaluationLog {
            rule_id: target.id,
            rule_group_id: self.rule_group_id,
            input_payload: json!({
                "reason": reason,
                "from_version": current.version,
                "to_version": target.version,
            }),
            result: None,
            evaluated_by: actor.to_string(),
            trace_id: ctx.trace_id,
            version: target.version,
            action: Some("Rollback to previous version".to_string()),
            action_type: Some("rollback".to_string()),
            action_value: target.action_value.clone(),
        })
        .await?;

        info!(
            name = %current.name,
            from_version = current.version,
            to_version = target.version,
            "规则已回滚"
        );

        let from = tx
            .get_rule(self.rule_group_id, current.id)
            .await?
            .ok_or_else(|| CatalogError::Internal(format!("回滚后规则行丢失: {}", current.id)))?;
        let to = tx
            .get_rule(self.rule_group_id, target.id)
            .await?
            .ok_or_else(|| CatalogError::Internal(format!("回滚后规则行丢失: {}", target.id)))?;

        Ok(RollbackOutcome {
            from: project_rule(tx, from).await?,
            to: project_rule(tx, to).await?,
            reason,
            trace_id: ctx.trace_id,
        })
    }
}
