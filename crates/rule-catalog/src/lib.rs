//! 规则目录
//!
//! 带制单/复核流程的版本化业务规则目录，以及按优先级命中第一条的评估引擎。
//!
//! ## 模块结构
//!
//! - `models`: 规则组、草稿、规则版本、字典、事件与评估日志
//! - `store`: 事务化存储抽象（PostgreSQL / 内存）
//! - `catalog`: 版本创建与字典关联
//! - `commands`: 写操作命令与统一的事务执行器
//! - `queries`: 只读投影
//! - `audit`: 追加式事件日志与历史重建
//! - `evaluation`: 事实增强、动态值替换与条件树执行
//! - `identity`: 凭证解析
//!
//! ## 技术栈
//!
//! - 持久化：sqlx (PostgreSQL)
//! - 条件求值：rule-engine
//! - 数据验证：validator

pub mod audit;
pub mod catalog;
pub mod commands;
pub mod error;
pub mod evaluation;
pub mod identity;
pub mod models;
pub mod queries;
pub mod store;

pub use commands::{
    ApproveRule, BatchOutcome, Command, CommandContext, CommandRunner, CreateRuleGroup,
    CreateVersion, EvaluateBatch, RecordOutcome, RejectRule, RollbackOutcome, RollbackRule,
    SaveDraft, SubmitDraft, VersionOutcome,
};
pub use error::{CatalogError, Result};
pub use evaluation::EvaluationEngine;
pub use identity::{IdentityProvider, JwtIdentityProvider};
pub use models::{Actor, Role};
pub use store::{CatalogStore, CatalogTx, MemoryCatalogStore, PgCatalogStore};
