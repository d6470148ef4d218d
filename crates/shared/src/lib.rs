//! 共享库
//!
//! 包含规则目录各组件共用的配置加载、错误类型、数据库连接池与可观测性初始化。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
