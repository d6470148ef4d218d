//! 条件操作符定义
//!
//! 操作符集合是固定的，名称采用 camelCase，与存量规则文档保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    // 通用比较
    Equal,
    NotEqual,

    // 数值比较
    LessThan,
    LessThanInclusive,
    GreaterThan,
    GreaterThanInclusive,

    // 集合成员
    In,
    NotIn,

    // 包含检查（字符串子串或数组元素）
    Contains,
    DoesNotContain,

    // 字符串操作
    StartsWith,
    EndsWith,
    Regex,

    // 时间操作
    Before,
    After,
}

impl Operator {
    /// 全部操作符，按文档顺序
    pub const ALL: [Operator; 15] = [
        Self::Equal,
        Self::NotEqual,
        Self::LessThan,
        Self::LessThanInclusive,
        Self::GreaterThan,
        Self::GreaterThanInclusive,
        Self::In,
        Self::NotIn,
        Self::Contains,
        Self::DoesNotContain,
        Self::StartsWith,
        Self::EndsWith,
        Self::Regex,
        Self::Before,
        Self::After,
    ];

    /// 按名称解析操作符，未知名称返回 None
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "notEqual",
            Self::LessThan => "lessThan",
            Self::LessThanInclusive => "lessThanInclusive",
            Self::GreaterThan => "greaterThan",
            Self::GreaterThanInclusive => "greaterThanInclusive",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Contains => "contains",
            Self::DoesNotContain => "doesNotContain",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Regex => "regex",
            Self::Before => "before",
            Self::After => "after",
        }
    }

    /// 右值是否必须为数组
    pub fn requires_array(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 逻辑组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// 全部满足（AND）
    All,
    /// 任一满足（OR）
    Any,
}

impl Combinator {
    pub fn key(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Any => write!(f, "ANY"),
        }
    }
}
