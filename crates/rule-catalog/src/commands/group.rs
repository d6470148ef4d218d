//! 规则组创建

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::{Command, CommandContext, require_text};
use crate::error::{CatalogError, Result};
use crate::models::{ExecutionType, NewRuleGroup, Role, RuleGroup};
use crate::store::CatalogTx;

fn default_execution_type() -> String {
    ExecutionType::FIRST_MATCH.to_string()
}

/// 新建规则组，名称全局唯一
///
/// 执行策略原样保存（统一为大写），评估时只支持 FIRST_MATCH。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRuleGroup {
    #[validate(length(min = 1, max = 255, message = "规则组名称长度必须在1-255个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_execution_type")]
    #[validate(length(min = 1, max = 50, message = "执行策略长度必须在1-50个字符之间"))]
    pub execution_type: String,
}

impl CreateRuleGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            execution_type: default_execution_type(),
        }
    }

    pub fn with_execution_type(mut self, execution_type: impl Into<String>) -> Self {
        self.execution_type = execution_type.into();
        self
    }
}

#[async_trait]
impl Command for CreateRuleGroup {
    type Output = RuleGroup;
    const NAME: &'static str = "CreateRuleGroup";

    fn required_role(&self) -> Option<Role> {
        Some(Role::Maker)
    }

    fn validate(&self) -> Result<()> {
        require_text("name", &self.name)?;
        require_text("execution_type", &self.execution_type)?;
        Validate::validate(self)?;
        Ok(())
    }

    async fn execute(&self, tx: &mut dyn CatalogTx, ctx: &CommandContext<'_>) -> Result<RuleGroup> {
        let name = self.name.trim();
        if tx.find_rule_group_by_name(name).await?.is_some() {
            return Err(CatalogError::Conflict(format!("规则组已存在: {name}")));
        }

        let group = tx
            .insert_rule_group(&NewRuleGroup {
                name: name.to_string(),
                description: self.description.clone(),
                execution_type: self.execution_type.trim().to_ascii_uppercase(),
                created_by: ctx.actor.username.clone(),
            })
            .await?;

        info!(rule_group_id = group.id, name = %group.name, "规则组已创建");
        Ok(group)
    }
}
