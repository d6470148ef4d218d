//! 规则组、草稿与规则版本实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dictionary::{ParameterInput, TagInput};
use super::enums::{RuleStatus, SubmissionStatus};

/// 规则组
///
/// 一组共享执行策略与启用开关的规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleGroup {
    pub id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    /// 执行策略标记，如 FIRST_MATCH
    pub execution_type: String,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// 新建规则组
#[derive(Debug, Clone)]
pub struct NewRuleGroup {
    pub name: String,
    pub description: Option<String>,
    pub execution_type: String,
    pub created_by: String,
}

/// 规则草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleDraft {
    pub id: i64,
    pub rule_group_id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    /// 条件树，附带保存时提交的 event/parameters/tags 便于展示
    pub json_rule: Value,
    pub submission_status: SubmissionStatus,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 草稿写入内容（新建与更新共用）
#[derive(Debug, Clone)]
pub struct DraftContent {
    pub rule_group_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub json_rule: Value,
    pub actor: String,
}

/// 规则版本行
///
/// 创建后除 is_latest 与审批字段外不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rule {
    pub id: i64,
    pub rule_group_id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub json_rule: Value,
    pub version: i32,
    pub is_latest: bool,
    pub is_active: bool,
    pub status: RuleStatus,
    /// 数值越小越优先，为空时排在最后
    #[sqlx(default)]
    pub priority: Option<i32>,
    #[sqlx(default)]
    pub action_type: Option<String>,
    #[sqlx(default)]
    pub action_value: Option<Value>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub approved_by: Option<String>,
    #[sqlx(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub rejected_by: Option<String>,
    #[sqlx(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub rejection_reason: Option<String>,
    #[sqlx(default)]
    pub review_comments: Option<String>,
}

/// 新规则版本
///
/// 新版本总是 PENDING、is_latest、is_active
#[derive(Debug, Clone)]
pub struct NewRule {
    pub rule_group_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub json_rule: Value,
    pub version: i32,
    pub priority: Option<i32>,
    pub action_type: Option<String>,
    pub action_value: Option<Value>,
    pub created_by: String,
}

/// 审批动作
#[derive(Debug, Clone)]
pub enum Review {
    Approve {
        by: String,
        comments: Option<String>,
    },
    Reject {
        by: String,
        reason: String,
        comments: Option<String>,
    },
}

impl Review {
    pub fn target_status(&self) -> RuleStatus {
        match self {
            Self::Approve { .. } => RuleStatus::Approved,
            Self::Reject { .. } => RuleStatus::Rejected,
        }
    }

    pub fn reviewer(&self) -> &str {
        match self {
            Self::Approve { by, .. } | Self::Reject { by, .. } => by,
        }
    }

    pub fn comments(&self) -> Option<&str> {
        match self {
            Self::Approve { comments, .. } | Self::Reject { comments, .. } => comments.as_deref(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Approve { .. } => None,
            Self::Reject { reason, .. } => Some(reason),
        }
    }
}

/// 规则列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    /// 名称模糊匹配（不区分大小写）
    pub search: Option<String>,
    pub version: Option<i32>,
}

impl RuleFilter {
    /// 内存实现使用的匹配逻辑，与 SQL 的 ILIKE '%search%' 一致
    pub fn matches(&self, rule: &Rule) -> bool {
        let name_ok = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => rule
                .name
                .to_lowercase()
                .contains(&term.to_lowercase()),
        };
        name_ok && self.version.is_none_or(|v| rule.version == v)
    }
}

/// 新版本的部分字段，未提供的字段沿用上一版本
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionPatch {
    #[serde(default)]
    pub json_rule: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub action_value: Option<Value>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub tags: Option<Vec<TagInput>>,
    #[serde(default)]
    pub parameters: Option<Vec<ParameterInput>>,
}

impl VersionPatch {
    /// 已提供的字段名，顺序固定
    pub fn updated_fields(&self) -> Vec<&'static str> {
        [
            ("json_rule", self.json_rule.is_some()),
            ("description", self.description.is_some()),
            ("name", self.name.is_some()),
            ("action_type", self.action_type.is_some()),
            ("action_value", self.action_value.is_some()),
            ("priority", self.priority.is_some()),
            ("tags", self.tags.is_some()),
            ("parameters", self.parameters.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.updated_fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_updated_fields_keep_declared_order() {
        let patch = VersionPatch {
            priority: Some(2),
            json_rule: Some(json!({})),
            tags: Some(Vec::new()),
            ..Default::default()
        };
        assert_eq!(patch.updated_fields(), vec!["json_rule", "priority", "tags"]);
        assert!(VersionPatch::default().is_empty());
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let rule: Rule = serde_json::from_value(json!({
            "id": 1, "rule_group_id": 1, "name": "Loan-Pricing", "description": null,
            "json_rule": {}, "version": 2, "is_latest": true, "is_active": true,
            "status": "PENDING", "priority": null, "action_type": null, "action_value": null,
            "created_by": "a", "updated_by": "a",
            "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
            "approved_by": null, "approved_at": null, "rejected_by": null, "rejected_at": null,
            "rejection_reason": null, "review_comments": null
        }))
        .unwrap();

        let by_name = RuleFilter { search: Some("pricing".into()), version: None };
        let wrong_version = RuleFilter { search: None, version: Some(1) };
        assert!(by_name.matches(&rule));
        assert!(!wrong_version.matches(&rule));
        assert!(RuleFilter::default().matches(&rule));
    }
}
