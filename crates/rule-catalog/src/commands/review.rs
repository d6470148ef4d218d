//! 复核：审批与驳回

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{Command, CommandContext, require_text};
use crate::audit;
use crate::error::{CatalogError, Result};
use crate::models::{EventType, NewRuleEvent, Review, Role, RuleStatus, RuleView};
use crate::queries::{project_rule, require_active_group};
use crate::store::CatalogTx;

/// PENDING 行才能被复核，其余情况区分不存在与状态冲突
async fn apply_review(
    tx: &mut dyn CatalogTx,
    ctx: &CommandContext<'_>,
    group_id: i64,
    rule_id: i64,
    review: Review,
) -> Result<RuleView> {
    require_active_group(tx, group_id).await?;

    let Some(rule) = tx.review_rule(group_id, rule_id, &review).await? else {
        let current = tx
            .get_rule(group_id, rule_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("规则不存在: {rule_id}")))?;
        let state = match current.status {
            RuleStatus::Approved => "已审批",
            RuleStatus::Rejected => "已驳回",
            RuleStatus::Pending => "正在被其他复核处理",
        };
        return Err(CatalogError::Conflict(format!("规则 {rule_id} {state}")));
    };

    let (event_type, data) = match &review {
        Review::Approve { by, comments } => (
            EventType::RuleApproved,
            json!({
                "rule_id": rule.id,
                "version": rule.version,
                "approved_by": by,
                "comments": comments,
            }),
        ),
        Review::Reject {
            by,
            reason,
            comments,
        } => (
            EventType::RuleRejected,
            json!({
                "rule_id": rule.id,
                "version": rule.version,
                "rejected_by": by,
                "reason": reason,
                "comments": comments,
            }),
        ),
    };
    audit::append(
        tx,
        NewRuleEvent::new(event_type, rule.id, data).with_metadata(&ctx.metadata()),
    )
    .await?;

    info!(
        rule_id = rule.id,
        status = rule.status.as_str(),
        reviewer = review.reviewer(),
        "规则复核完成"
    );
    project_rule(tx, rule).await
}

/// 审批通过
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRule {
    pub rule_group_id: i64,
    pub rule_id: i64,
    #[serde(default)]
    pub comments: Option<String>,
}

impl ApproveRule {
    pub fn new(rule_group_id: i64, rule_id: i64) -> Self {
        Self {
            rule_group_id,
            rule_id,
            comments: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}

#[async_trait]
impl Command for ApproveRule {
    type Output = RuleView;
    const NAME: &'static str = "ApproveRule";

    fn required_role(&self) -> Option<Role> {
        Some(Role::Checker)
    }

    async fn execute(&self, tx: &mut dyn CatalogTx, ctx: &CommandContext<'_>) -> Result<RuleView> {
        let review = Review::Approve {
            by: ctx.actor.username.clone(),
            comments: self.comments.clone(),
        };
        apply_review(tx, ctx, self.rule_group_id, self.rule_id, review).await
    }
}

/// 驳回，必须给出原因
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRule {
    pub rule_group_id: i64,
    pub rule_id: i64,
    pub reason: String,
    #[serde(default)]
    pub comments: Option<String>,
}

impl RejectRule {
    pub fn new(rule_group_id: i64, rule_id: i64, reason: impl Into<String>) -> Self {
        Self {
            rule_group_id,
            rule_id,
            reason: reason.into(),
            comments: None,
        }
    }
}

#[async_trait]
impl Command for RejectRule {
    type Output = RuleView;
    const NAME: &'static str = "RejectRule";

    fn required_role(&self) -> Option<Role> {
        Some(Role::Checker)
    }

    fn validate(&self) -> Result<()> {
        require_text("reason", &self.reason)
    }

    async fn execute(&self, tx: &mut dyn CatalogTx, ctx: &CommandContext<'_>) -> Result<RuleView> {
        let review = Review::Reject {
            by: ctx.actor.username.clone(),
            reason: self.reason.trim().to_string(),
            comments: self.comments.clone(),
        };
        apply_review(tx, ctx, self.rule_group_id, self.rule_id, review).await
    }
}
