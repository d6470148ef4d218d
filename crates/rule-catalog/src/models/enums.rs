//! 规则目录枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则版本审批状态
///
/// PENDING 只能流转一次到 APPROVED 或 REJECTED，两者均为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// 草稿提交状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// 编辑中，可反复保存
    #[default]
    Drafted,
    /// 已提交，成为历史记录
    Submitted,
}

/// 参数数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    Int,
    Float,
    Boolean,
    Date,
}

impl DataType {
    /// 解析数据类型，大小写不敏感
    ///
    /// INTEGER 与 NUMBER 视为 INT 的别名
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STRING" => Some(Self::String),
            "INT" | "INTEGER" | "NUMBER" => Some(Self::Int),
            "FLOAT" => Some(Self::Float),
            "BOOLEAN" => Some(Self::Boolean),
            "DATE" => Some(Self::Date),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
        }
    }
}

/// 规则组执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionType {
    /// 按优先级求值，命中第一条即停止
    FirstMatch,
}

impl ExecutionType {
    pub const FIRST_MATCH: &'static str = "FIRST_MATCH";

    pub fn parse(value: &str) -> Option<Self> {
        value
            .trim()
            .eq_ignore_ascii_case(Self::FIRST_MATCH)
            .then_some(Self::FirstMatch)
    }
}

/// 审计事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RuleCreated,
    RuleUpdated,
    RuleApproved,
    RuleRejected,
    RuleRolledBack,
    TagsUpdated,
    ParametersUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleCreated => "RULE_CREATED",
            Self::RuleUpdated => "RULE_UPDATED",
            Self::RuleApproved => "RULE_APPROVED",
            Self::RuleRejected => "RULE_REJECTED",
            Self::RuleRolledBack => "RULE_ROLLED_BACK",
            Self::TagsUpdated => "TAGS_UPDATED",
            Self::ParametersUpdated => "PARAMETERS_UPDATED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 制单人：编写草稿、提交、发起新版本
    Maker,
    /// 复核人：审批或驳回
    Checker,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "maker" => Some(Self::Maker),
            "checker" => Some(Self::Checker),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maker => "maker",
            Self::Checker => "checker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
