//! 条件规则引擎
//!
//! 提供与存储无关的条件树评估能力：
//! - 规则文档解析（JSON 对象或序列化文本）
//! - 规则编译校验与事实名提取
//! - 短路求值与显式递归深度保护
//! - 按规则行 ID 缓存编译结果

pub mod cache;
pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod facts;
pub mod models;
pub mod operators;

pub use cache::RuleCache;
pub use compiler::{CompiledRule, DEFAULT_MAX_DEPTH, RuleCompiler};
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use executor::RuleExecutor;
pub use facts::Facts;
pub use models::{
    Condition, ConditionGroup, ConditionNode, EvaluationResult, RuleDocument, RuleEvent, ValueRef,
};
pub use operators::{Combinator, Operator};
