//! 版本创建与回滚集成测试

mod common;

use common::{Harness, amount_over, tags};
use fake::Fake;
use fake::faker::lorem::en::Word;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rule_catalog::commands::DEFAULT_ROLLBACK_REASON;
use rule_catalog::models::{EventType, RuleStatus, TagInput, VersionPatch};
use rule_catalog::{CatalogError, CreateVersion, RollbackRule, SaveDraft, audit, queries};
use serde_json::json;

// ==================== 辅助函数 ====================

fn describe(description: impl Into<String>) -> VersionPatch {
    VersionPatch {
        description: Some(description.into()),
        ..Default::default()
    }
}

/// 断言同名规则恰有一个最新版本，且版本号从 1 连续
async fn assert_version_chain(h: &Harness, group_id: i64, name: &str) -> (i32, i64) {
    let mut tx = h.runner.store().begin().await.unwrap();
    let max = tx.max_version(group_id, name).await.unwrap().unwrap();
    let mut latest = Vec::new();
    for version in 1..=max {
        let row = tx
            .find_version(group_id, name, version)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("缺少版本 {version}"));
        if row.is_latest {
            latest.push(row);
        }
    }
    tx.rollback().await.unwrap();

    assert_eq!(latest.len(), 1, "{name} 应恰有一个最新版本");
    (latest[0].version, latest[0].id)
}

// ==================== 新版本 ====================

#[tokio::test]
async fn test_new_version_supersedes_previous() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h
        .publish(SaveDraft::new(group, "pricing", amount_over(1)).with_tags(tags(&["retail"])))
        .await;

    let outcome = h
        .runner
        .run(
            &CreateVersion::new(
                group,
                v1.rule.id,
                VersionPatch {
                    json_rule: Some(amount_over(50)),
                    priority: Some(4),
                    ..Default::default()
                },
            ),
            &h.maker,
        )
        .await
        .unwrap();

    let v2 = &outcome.rule.rule;
    assert_eq!(v2.version, 2);
    assert_eq!(v2.status, RuleStatus::Pending);
    assert!(v2.is_latest);
    assert_eq!(v2.priority, Some(4));
    assert_eq!(v2.json_rule, amount_over(50));
    assert_eq!(outcome.updated_fields, vec!["json_rule", "priority"]);

    let previous = queries::get_by_version(h.runner.store(), group, v1.rule.id, 1)
        .await
        .unwrap();
    assert!(!previous.rule.is_latest);
    assert_eq!(previous.rule.status, RuleStatus::Approved);

    // 汇总事件 + 条件树变更事件
    let types: Vec<&str> = outcome.events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![EventType::RuleUpdated.as_str(), EventType::RuleUpdated.as_str()]
    );
    assert_eq!(outcome.events[0].aggregate_id, v1.rule.id);
    assert_eq!(outcome.events[0].event_data["new_version"], json!(2));
    assert_eq!(
        outcome.events[0].event_data["changes"]["priority"],
        json!({ "old": null, "new": 4 })
    );

    let latest = queries::get_latest(h.runner.store(), group, v1.rule.id)
        .await
        .unwrap();
    assert_eq!(latest.rule.id, v2.id);

    let logs = queries::evaluation_log(h.runner.store(), outcome.trace_id)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].rule_id, v2.id);
    assert_eq!(logs[0].action_type.as_deref(), Some("update"));
    assert_eq!(logs[0].evaluated_by, "alice");
}

#[tokio::test]
async fn test_only_latest_version_can_be_updated() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h.submit(SaveDraft::new(group, "pricing", amount_over(1))).await;
    h.runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("v2")), &h.maker)
        .await
        .unwrap();

    let err = h
        .runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("stale")), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::NotFound(_)));
}

#[tokio::test]
async fn test_omitted_links_are_copied_supplied_links_replace() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h
        .publish(SaveDraft::new(group, "pricing", amount_over(1)).with_tags(tags(&["retail"])))
        .await;

    let v2 = h
        .runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("same tags")), &h.maker)
        .await
        .unwrap();
    assert_eq!(v2.rule.tag_names(), vec!["retail"]);

    let v3 = h
        .runner
        .run(
            &CreateVersion::new(
                group,
                v2.rule.rule.id,
                VersionPatch {
                    tags: Some(vec![TagInput::new("premium"), TagInput::new("  ")]),
                    ..Default::default()
                },
            ),
            &h.maker,
        )
        .await
        .unwrap();
    assert_eq!(v3.rule.tag_names(), vec!["premium"]);
    assert_eq!(v3.events[1].event_type, EventType::TagsUpdated.as_str());
    assert_eq!(v3.events[1].event_data["tags"], json!(["premium"]));

    // 旧版本的映射保持不变
    let old = queries::get_by_version(h.runner.store(), group, v1.rule.id, 1)
        .await
        .unwrap();
    assert_eq!(old.tag_names(), vec!["retail"]);
}

#[tokio::test]
async fn test_rename_starts_new_version_chain() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let a = h.submit(SaveDraft::new(group, "alpha", amount_over(1))).await;
    h.submit(SaveDraft::new(group, "beta", amount_over(1))).await;

    let rename = |name: &str| VersionPatch {
        name: Some(name.to_string()),
        ..Default::default()
    };

    let err = h
        .runner
        .run(&CreateVersion::new(group, a.rule.id, rename("beta")), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Conflict(_)));

    // 失败的命令不应留下任何痕迹
    let history = audit::history(h.runner.store(), group, a.rule.id, None)
        .await
        .unwrap();
    assert_eq!(history.total_events, 1);

    let renamed = h
        .runner
        .run(&CreateVersion::new(group, a.rule.id, rename("gamma")), &h.maker)
        .await
        .unwrap();
    assert_eq!(renamed.rule.rule.name, "gamma");
    assert_eq!(renamed.rule.rule.version, 1);
    assert_eq!(
        assert_version_chain(&h, group, "gamma").await,
        (1, renamed.rule.rule.id)
    );

    // 新名称下继续发版从 2 开始，可回滚到版本 1
    let next = h
        .runner
        .run(
            &CreateVersion::new(group, renamed.rule.rule.id, describe("gamma v2")),
            &h.maker,
        )
        .await
        .unwrap();
    assert_eq!(next.rule.rule.version, 2);
    let rolled = h
        .runner
        .run(&RollbackRule::new(group, next.rule.rule.id), &h.maker)
        .await
        .unwrap();
    assert_eq!(rolled.to.rule.id, renamed.rule.rule.id);
}

#[tokio::test]
async fn test_update_after_rollback_takes_next_free_version() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h.publish(SaveDraft::new(group, "pricing", amount_over(1))).await;

    let v2 = h
        .runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("v2")), &h.maker)
        .await
        .unwrap();
    assert_eq!(v2.rule.rule.version, 2);

    let rolled = h
        .runner
        .run(&RollbackRule::new(group, v2.rule.rule.id), &h.maker)
        .await
        .unwrap();
    assert_eq!(rolled.to.rule.id, v1.rule.id);

    let v3 = h
        .runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("v3")), &h.maker)
        .await
        .unwrap();
    assert_eq!(v3.rule.rule.version, 3);
    assert_eq!(v3.rule.rule.status, RuleStatus::Pending);
    assert_eq!(
        assert_version_chain(&h, group, "pricing").await,
        (3, v3.rule.rule.id)
    );

    // 再次回滚回到版本 2
    let rolled = h
        .runner
        .run(&RollbackRule::new(group, v3.rule.rule.id), &h.maker)
        .await
        .unwrap();
    assert_eq!(rolled.to.rule.id, v2.rule.rule.id);
}

// ==================== 回滚 ====================

#[tokio::test]
async fn test_rollback_walks_back_until_first_version() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h.publish(SaveDraft::new(group, "pricing", amount_over(1))).await;
    let v2 = h
        .runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("v2")), &h.maker)
        .await
        .unwrap();
    let v3 = h
        .runner
        .run(&CreateVersion::new(group, v2.rule.rule.id, describe("v3")), &h.maker)
        .await
        .unwrap();

    let first = h
        .runner
        .run(&RollbackRule::new(group, v3.rule.rule.id), &h.maker)
        .await
        .unwrap();
    assert_eq!(first.from.rule.version, 3);
    assert!(!first.from.rule.is_latest);
    assert_eq!(first.to.rule.version, 2);
    assert!(first.to.rule.is_latest);
    assert_eq!(first.reason, DEFAULT_ROLLBACK_REASON);

    let second = h
        .runner
        .run(
            &RollbackRule::new(group, v2.rule.rule.id).with_reason("阈值回退"),
            &h.checker,
        )
        .await
        .unwrap();
    assert_eq!(second.to.rule.id, v1.rule.id);
    assert_eq!(second.reason, "阈值回退");

    let err = h
        .runner
        .run(&RollbackRule::new(group, v1.rule.id), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Conflict(_)));

    // 回滚后的版本 1 仍是已审批状态
    let (version, id) = assert_version_chain(&h, group, "pricing").await;
    assert_eq!((version, id), (1, v1.rule.id));
    let latest = queries::get_latest(h.runner.store(), group, v3.rule.rule.id)
        .await
        .unwrap();
    assert_eq!(latest.rule.status, RuleStatus::Approved);

    let history = audit::history(h.runner.store(), group, v1.rule.id, None)
        .await
        .unwrap();
    let rollbacks: Vec<_> = history
        .history
        .iter()
        .filter(|e| e.event_type == EventType::RuleRolledBack.as_str())
        .collect();
    assert_eq!(rollbacks.len(), 2);
    assert_eq!(rollbacks[0].event_data["reason"], json!("阈值回退"));

    let logs = queries::evaluation_log(h.runner.store(), first.trace_id)
        .await
        .unwrap();
    assert_eq!(logs[0].action_type.as_deref(), Some("rollback"));
    assert_eq!(logs[0].input_payload["from_version"], json!(3));
}

#[tokio::test]
async fn test_rollback_requires_latest_row() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h.submit(SaveDraft::new(group, "pricing", amount_over(1))).await;
    let v2 = h
        .runner
        .run(&CreateVersion::new(group, v1.rule.id, describe("v2")), &h.maker)
        .await
        .unwrap();
    h.runner
        .run(&CreateVersion::new(group, v2.rule.rule.id, describe("v3")), &h.maker)
        .await
        .unwrap();

    let err = h
        .runner
        .run(&RollbackRule::new(group, v2.rule.rule.id), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Conflict(_)));

    let err = h
        .runner
        .run(&RollbackRule::new(group, 31337), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::NotFound(_)));
}

#[tokio::test]
async fn test_rollback_merges_links_into_target() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h
        .submit(SaveDraft::new(group, "pricing", amount_over(1)).with_tags(tags(&["retail"])))
        .await;
    let v2 = h
        .runner
        .run(
            &CreateVersion::new(
                group,
                v1.rule.id,
                VersionPatch {
                    tags: Some(tags(&["premium"])),
                    ..Default::default()
                },
            ),
            &h.maker,
        )
        .await
        .unwrap();

    let rolled = h
        .runner
        .run(&RollbackRule::new(group, v2.rule.rule.id), &h.maker)
        .await
        .unwrap();
    assert_eq!(rolled.to.tag_names(), vec!["premium", "retail"]);
}

#[tokio::test]
async fn test_random_sequences_keep_single_latest() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let v1 = h.submit(SaveDraft::new(group, "pricing", amount_over(1))).await;

    let mut rng = StdRng::seed_from_u64(20_240_601);
    let mut latest_id = v1.rule.id;
    let mut latest_version = 1;
    let mut max_version = 1;
    for _ in 0..40 {
        let roll_back = latest_version > 1 && (0..3u8).fake_with_rng::<u8, _>(&mut rng) == 0;
        if roll_back {
            let outcome = h
                .runner
                .run(&RollbackRule::new(group, latest_id), &h.maker)
                .await
                .unwrap();
            latest_id = outcome.to.rule.id;
            latest_version = outcome.to.rule.version;
        } else {
            let description = Word().fake_with_rng::<String, _>(&mut rng);
            let outcome = h
                .runner
                .run(
                    &CreateVersion::new(group, latest_id, describe(description)),
                    &h.maker,
                )
                .await
                .unwrap();
            assert_eq!(outcome.rule.rule.version, max_version + 1);
            latest_id = outcome.rule.rule.id;
            latest_version = outcome.rule.rule.version;
            max_version = latest_version;
        }

        let (version, id) = assert_version_chain(&h, group, "pricing").await;
        assert_eq!((version, id), (latest_version, latest_id));
    }
}
