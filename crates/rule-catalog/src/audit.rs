//! 审计事件日志
//!
//! 事件只追加，不修改、不删除。历史按 (规则组, 规则名) 聚合，跨越该规则的全部版本。

use tracing::{debug, instrument};

use crate::error::{CatalogError, Result};
use crate::models::{NewRuleEvent, RuleEventRecord, RuleHistory};
use crate::queries::require_group;
use crate::store::{CatalogStore, CatalogTx};

/// 在调用方事务内追加事件
pub async fn append(tx: &mut dyn CatalogTx, event: NewRuleEvent) -> Result<RuleEventRecord> {
    let record = tx.append_event(&event).await?;
    debug!(
        event_type = %event.event_type,
        aggregate_id = record.aggregate_id,
        sequence_number = record.sequence_number,
        "事件已追加"
    );
    Ok(record)
}

/// 读取规则的历史事件，可按版本过滤
#[instrument(skip(store))]
pub async fn history(
    store: &dyn CatalogStore,
    group_id: i64,
    rule_id: i64,
    version: Option<i32>,
) -> Result<RuleHistory> {
    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        require_group(tx.as_mut(), group_id).await?;
        let rule = tx
            .get_rule(group_id, rule_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("规则不存在: {rule_id}")))?;
        let entries = tx
            .events_for_rule_name(group_id, &rule.name, version)
            .await?;
        Ok((rule.name, entries))
    }
    .await;
    tx.rollback().await?;

    let (rule_name, history) = result?;
    if history.is_empty() {
        return Err(CatalogError::NotFound(format!(
            "未找到历史记录: {rule_name}"
        )));
    }

    Ok(RuleHistory {
        rule_name,
        rule_group_id: group_id,
        total_events: history.len(),
        history,
    })
}
