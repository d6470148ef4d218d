//! 并发写入集成测试
//!
//! 同一规则上的并发命令必须串行化：事件序号无空洞，最新版本始终唯一。

mod common;

use std::sync::Arc;

use common::{Harness, amount_over};
use futures::future::join_all;
use rule_catalog::models::{EventType, NewRuleEvent, VersionPatch};
use rule_catalog::{ApproveRule, CatalogError, CatalogStore, CreateVersion, RejectRule, SaveDraft, audit};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_keep_sequence_contiguous() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let view = h.submit(SaveDraft::new(group, "busy", amount_over(1))).await;
    let aggregate_id = view.rule.id;

    let tasks = (0..16).map(|i| {
        let store: Arc<dyn CatalogStore> = h.store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await?;
            let record = audit::append(
                tx.as_mut(),
                NewRuleEvent::new(EventType::RuleUpdated, aggregate_id, json!({ "n": i })),
            )
            .await?;
            tx.commit().await?;
            Ok::<_, CatalogError>(record.sequence_number)
        })
    });

    let mut sequences: Vec<i64> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    sequences.sort_unstable();

    // RULE_CREATED 占用序号 1
    assert_eq!(sequences, (2..=17).collect::<Vec<i64>>());

    let history = audit::history(h.runner.store(), group, aggregate_id, None)
        .await
        .unwrap();
    assert_eq!(history.total_events, 17);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_versions_from_same_row_have_single_winner() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h.submit(SaveDraft::new(group, "contested", amount_over(1))).await;

    let tasks = (0..8).map(|i| {
        let runner = h.runner.clone();
        let maker = h.maker.clone();
        let command = CreateVersion::new(
            group,
            v1.rule.id,
            VersionPatch {
                description: Some(format!("attempt-{i}")),
                ..Default::default()
            },
        );
        tokio::spawn(async move { runner.run(&command, &maker).await })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].rule.rule.version, 2);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, CatalogError::NotFound(_)))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reviews_have_single_winner() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let rule_id = h
        .submit(SaveDraft::new(group, "review-race", amount_over(1)))
        .await
        .rule
        .id;

    let approvals = (0..4).map(|_| {
        let runner = h.runner.clone();
        let checker = h.checker.clone();
        tokio::spawn(async move {
            runner
                .run(&ApproveRule::new(group, rule_id), &checker)
                .await
                .map(|_| "approved")
        })
    });
    let rejections = (0..4).map(|_| {
        let runner = h.runner.clone();
        let checker = h.checker.clone();
        tokio::spawn(async move {
            runner
                .run(&RejectRule::new(group, rule_id, "竞争驳回"), &checker)
                .await
                .map(|_| "rejected")
        })
    });

    let results: Vec<_> = join_all(approvals.chain(rejections))
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, CatalogError::Conflict(_)))
    );

    // 只有一条复核事件
    let history = audit::history(h.runner.store(), group, rule_id, None)
        .await
        .unwrap();
    assert_eq!(history.total_events, 2);
}
