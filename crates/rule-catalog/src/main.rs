//! 规则目录服务进程
//!
//! 加载配置、初始化日志与指标、执行数据库迁移，并保持连接池直到收到退出信号。

use std::sync::Arc;

use rule_catalog::{CommandRunner, PgCatalogStore, queries};
use rule_catalog::models::PageRequest;
use rulebook_shared::{config::AppConfig, database::Database, observability};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("rule-catalog")?;
    let _guard = observability::init(&config.service_name, &config.observability)?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        "正在启动规则目录服务"
    );

    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("./migrations").run(db.pool()).await?;
    db.health_check().await?;
    info!("数据库迁移完成");

    let store = Arc::new(PgCatalogStore::new(db.pool().clone()));
    let runner = CommandRunner::new(store, config.catalog.clone());

    match queries::list_rule_groups(runner.store(), None, PageRequest::default()).await {
        Ok(groups) => info!(rule_groups = groups.total, "规则目录已就绪"),
        Err(e) => warn!(error = %e, "读取规则组失败"),
    }

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在关闭");
    db.close().await;
    Ok(())
}
