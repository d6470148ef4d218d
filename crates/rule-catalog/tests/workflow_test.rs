//! 草稿、提交与复核流程集成测试

mod common;

use common::{Harness, amount_over, flag_parameter, tags};
use rule_catalog::models::{
    EventType, PageRequest, ParameterInput, RuleFilter, RuleStatus, SubmissionStatus,
};
use rule_catalog::{
    Actor, ApproveRule, CatalogError, RejectRule, SaveDraft, SubmitDraft, audit, queries,
};
use rule_engine::RuleEvent;
use serde_json::json;

#[tokio::test]
async fn test_submit_creates_pending_version_one() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;

    let view = h
        .submit(
            SaveDraft::new(group, "high-amount", amount_over(1000))
                .with_parameters(vec![flag_parameter("PRE_PAYMENT_ENABLED", json!(true))])
                .with_tags(tags(&["retail", "salaried"])),
        )
        .await;

    assert_eq!(view.rule.version, 1);
    assert!(view.rule.is_latest);
    assert!(view.rule.is_active);
    assert_eq!(view.rule.status, RuleStatus::Pending);
    assert_eq!(view.rule_group.name, "loan-pricing");
    assert_eq!(view.rule_group.execution_type, "FIRST_MATCH");
    assert_eq!(view.tag_names(), vec!["retail", "salaried"]);
    assert_eq!(view.parameter_names(), vec!["PRE_PAYMENT_ENABLED"]);
}

#[tokio::test]
async fn test_condition_tree_round_trips_through_submission() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let tree = json!({ "all": [ { "fact": "amount", "operator": "greaterThan", "value": 1000 } ] });

    let view = h
        .submit(SaveDraft::new(group, "round-trip", json!({ "conditions": tree })))
        .await;

    let fetched = queries::get_by_version(h.runner.store(), group, view.rule.id, 1)
        .await
        .unwrap();
    assert_eq!(fetched.rule.json_rule["conditions"], tree);
}

#[tokio::test]
async fn test_draft_saved_as_text_is_normalized() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let text = amount_over(10).to_string();

    let draft = h
        .runner
        .run(&SaveDraft::new(group, "textual", json!(text)), &h.maker)
        .await
        .unwrap();

    let fetched = queries::get_draft(h.runner.store(), group, draft.draft.id)
        .await
        .unwrap();
    assert_eq!(fetched.draft.json_rule["conditions"], amount_over(10)["conditions"]);
}

#[tokio::test]
async fn test_resaving_draft_replaces_mappings_idempotently() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let save = SaveDraft::new(group, "idempotent", amount_over(1))
        .with_parameters(vec![ParameterInput::new("MAX_AMOUNT", "INT").with_default(5000)])
        .with_tags(tags(&["retail"]));

    let first = h.runner.run(&save, &h.maker).await.unwrap();
    let again = save.clone().updating(first.draft.id);
    let second = h.runner.run(&again, &h.maker).await.unwrap();
    let third = h.runner.run(&again, &h.maker).await.unwrap();

    assert_eq!(second.draft.id, first.draft.id);
    assert_eq!(second.parameters, first.parameters);
    assert_eq!(third.parameters, first.parameters);
    assert_eq!(third.tags, first.tags);
    assert_eq!(third.parameters.len(), 1);
    assert_eq!(third.tags.len(), 1);

    // 更新时以新列表整体替换
    let replaced = h
        .runner
        .run(
            &SaveDraft::new(group, "idempotent", amount_over(1))
                .updating(first.draft.id)
                .with_tags(tags(&["premium"])),
            &h.maker,
        )
        .await
        .unwrap();
    assert!(replaced.parameters.is_empty());
    assert_eq!(replaced.tags[0].name, "premium");
}

#[tokio::test]
async fn test_submitted_draft_is_immutable() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let draft = h
        .runner
        .run(&SaveDraft::new(group, "once", amount_over(1)), &h.maker)
        .await
        .unwrap();
    h.runner
        .run(&SubmitDraft::new(group, draft.draft.id), &h.maker)
        .await
        .unwrap();

    let stored = queries::get_draft(h.runner.store(), group, draft.draft.id)
        .await
        .unwrap();
    assert_eq!(stored.draft.submission_status, SubmissionStatus::Submitted);

    let resubmit = h
        .runner
        .run(&SubmitDraft::new(group, draft.draft.id), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(resubmit, CatalogError::Conflict(_)));

    let update = h
        .runner
        .run(
            &SaveDraft::new(group, "once", amount_over(2)).updating(draft.draft.id),
            &h.maker,
        )
        .await
        .unwrap_err();
    assert!(matches!(update, CatalogError::NotFound(_)));
}

#[tokio::test]
async fn test_submitting_existing_name_conflicts_and_leaves_draft_open() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    h.submit(SaveDraft::new(group, "dup", amount_over(1))).await;

    let draft = h
        .runner
        .run(&SaveDraft::new(group, "dup", amount_over(2)), &h.maker)
        .await
        .unwrap();
    let err = h
        .runner
        .run(&SubmitDraft::new(group, draft.draft.id), &h.maker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Conflict(_)));

    // 事务回滚后草稿仍可编辑
    let stored = queries::get_draft(h.runner.store(), group, draft.draft.id)
        .await
        .unwrap();
    assert_eq!(stored.draft.submission_status, SubmissionStatus::Drafted);
}

#[tokio::test]
async fn test_submit_uses_live_draft_dictionary() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;

    let draft = h
        .runner
        .run(
            &SaveDraft::new(group, "live", amount_over(1))
                .with_parameters(vec![ParameterInput::new("RATE", "FLOAT").with_default(1.5)]),
            &h.maker,
        )
        .await
        .unwrap();

    // 另一份草稿以正确的 revision 修改了共享字典行
    h.runner
        .run(
            &SaveDraft::new(group, "other", amount_over(1)).with_parameters(vec![
                ParameterInput::new("RATE", "FLOAT")
                    .with_default(2.5)
                    .expecting_revision(1),
            ]),
            &h.maker,
        )
        .await
        .unwrap();

    let view = h
        .runner
        .run(&SubmitDraft::new(group, draft.draft.id), &h.maker)
        .await
        .unwrap();
    assert_eq!(view.parameters[0].default_value, Some(json!(2.5)));
}

#[tokio::test]
async fn test_submit_overwrites_catalog_dictionary() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;

    let first = h
        .submit(
            SaveDraft::new(group, "first", amount_over(1))
                .with_parameters(vec![ParameterInput::new("RATE", "FLOAT").with_default(1.5)]),
        )
        .await;
    assert_eq!(first.parameters[0].revision, 1);

    // 草稿字典按令牌修改后，提交时正式字典以后写覆盖
    let second = h
        .submit(
            SaveDraft::new(group, "second", amount_over(1)).with_parameters(vec![
                ParameterInput::new("RATE", "FLOAT")
                    .with_default(2.5)
                    .expecting_revision(1),
            ]),
        )
        .await;
    assert_eq!(second.parameters[0].default_value, Some(json!(2.5)));
    assert_eq!(second.parameters[0].revision, 2);

    let refreshed = queries::get_by_version(h.runner.store(), group, first.rule.id, 1)
        .await
        .unwrap();
    assert_eq!(refreshed.parameters[0].default_value, Some(json!(2.5)));
}

#[tokio::test]
async fn test_unversioned_dictionary_change_conflicts() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let first = SaveDraft::new(group, "first", amount_over(1))
        .with_parameters(vec![ParameterInput::new("RATE", "FLOAT").with_default(1.5)]);
    h.runner.run(&first, &h.maker).await.unwrap();

    let second = SaveDraft::new(group, "second", amount_over(1))
        .with_parameters(vec![ParameterInput::new("RATE", "FLOAT").with_default(9.9)]);
    let err = h.runner.run(&second, &h.maker).await.unwrap_err();
    assert!(matches!(err, CatalogError::Conflict(_)));

    // 关闭令牌要求后退化为后写覆盖
    let lenient = Harness::with_settings(rulebook_shared::config::CatalogConfig {
        require_revision_token: false,
        ..Default::default()
    });
    let group = lenient.group("loan-pricing").await;
    lenient
        .runner
        .run(&SaveDraft { rule_group_id: group, ..first }, &lenient.maker)
        .await
        .unwrap();
    let view = lenient
        .runner
        .run(&SaveDraft { rule_group_id: group, ..second }, &lenient.maker)
        .await
        .unwrap();
    assert_eq!(view.parameters[0].revision, 2);
}

#[tokio::test]
async fn test_approve_and_reject() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let a = h.submit(SaveDraft::new(group, "approve-me", amount_over(1))).await;
    let b = h.submit(SaveDraft::new(group, "reject-me", amount_over(1))).await;

    let approved = h
        .runner
        .run(
            &ApproveRule::new(group, a.rule.id).with_comments("符合政策"),
            &h.checker,
        )
        .await
        .unwrap();
    assert_eq!(approved.rule.status, RuleStatus::Approved);
    assert_eq!(approved.rule.approved_by.as_deref(), Some("bob"));
    assert!(approved.rule.approved_at.is_some());

    let rejected = h
        .runner
        .run(&RejectRule::new(group, b.rule.id, "阈值过低"), &h.checker)
        .await
        .unwrap();
    assert_eq!(rejected.rule.status, RuleStatus::Rejected);
    assert_eq!(rejected.rule.rejection_reason.as_deref(), Some("阈值过低"));

    let pending = queries::list_by_status(h.runner.store(), Some(group), RuleStatus::Pending)
        .await
        .unwrap();
    assert!(pending.is_empty());
    let approved_all = queries::list_by_status(h.runner.store(), None, RuleStatus::Approved)
        .await
        .unwrap();
    assert_eq!(approved_all.len(), 1);
}

#[tokio::test]
async fn test_second_review_is_never_silent() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let view = h.publish(SaveDraft::new(group, "race", amount_over(1))).await;

    let again = h
        .runner
        .run(&ApproveRule::new(group, view.rule.id), &h.checker)
        .await
        .unwrap_err();
    assert!(matches!(again, CatalogError::Conflict(_)));

    let reject = h
        .runner
        .run(&RejectRule::new(group, view.rule.id, "too late"), &h.checker)
        .await
        .unwrap_err();
    assert!(matches!(reject, CatalogError::Conflict(_)));

    let missing = h
        .runner
        .run(&ApproveRule::new(group, 9999), &h.checker)
        .await
        .unwrap_err();
    assert!(matches!(missing, CatalogError::NotFound(_)));
}

#[tokio::test]
async fn test_role_enforcement() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let view = h.submit(SaveDraft::new(group, "roles", amount_over(1))).await;

    let err = h
        .runner
        .run(&ApproveRule::new(group, view.rule.id), &Actor::maker("mallory"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Authorization(_)));

    let err = h
        .runner
        .run(&SaveDraft::new(group, "x", amount_over(1)), &h.checker)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Authorization(_)));
}

#[tokio::test]
async fn test_history_tracks_lifecycle_events() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let view = h.publish(SaveDraft::new(group, "history", amount_over(1))).await;

    let history = audit::history(h.runner.store(), group, view.rule.id, None)
        .await
        .unwrap();
    assert_eq!(history.rule_name, "history");
    assert_eq!(history.total_events, 2);
    let types: Vec<&str> = history.history.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![EventType::RuleApproved.as_str(), EventType::RuleCreated.as_str()]
    );
    assert_eq!(history.history[0].sequence_number, 2);
    assert_eq!(history.history[0].metadata["actor"], "bob");
    assert_eq!(history.history[0].metadata["role"], "checker");
}

#[tokio::test]
async fn test_history_for_rule_without_events_is_not_found() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;

    let err = audit::history(h.runner.store(), group, 4242, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::NotFound(_)));
}

#[tokio::test]
async fn test_read_projections() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    h.group("card-limits").await;

    let nested = json!({
        "conditions": { "any": [
            { "fact": "amount", "operator": "greaterThan", "value": 1 },
            { "all": [
                { "fact": "applicant", "path": "$.age", "operator": "lessThan", "value": 60 },
                { "fact": "tenure", "operator": "lessThan", "value": { "fact": "parameters", "path": "$.MAX_TENURE" } }
            ] }
        ] }
    });
    h.submit(SaveDraft::new(group, "Alpha-Rule", nested)).await;
    h.submit(SaveDraft::new(group, "beta-rule", amount_over(5)).with_event(RuleEvent::new("pricing")))
        .await;

    let page = queries::list_by_group(
        h.runner.store(),
        group,
        &RuleFilter {
            search: Some("ALPHA".into()),
            version: None,
        },
        PageRequest::new(1, 10),
    )
    .await
    .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].rule.name, "Alpha-Rule");

    let all = queries::list_by_group(h.runner.store(), group, &RuleFilter::default(), PageRequest::new(1, 1))
        .await
        .unwrap();
    assert_eq!(all.total, 2);
    assert_eq!(all.items.len(), 1);
    assert_eq!(all.total_pages, 2);

    let facts = queries::fact_names(h.runner.store(), h.runner.engine().compiler(), group)
        .await
        .unwrap();
    assert_eq!(facts, vec!["amount", "applicant", "parameters", "tenure"]);

    let groups = queries::list_rule_groups(h.runner.store(), Some("card"), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(groups.total, 1);
    assert_eq!(groups.items[0].name, "card-limits");

    let err = queries::list_by_group(h.runner.store(), group, &RuleFilter::default(), PageRequest::new(0, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));

    let err = queries::list_by_group(
        h.runner.store(),
        group,
        &RuleFilter::default(),
        PageRequest::new(i64::MAX, 100),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));

    let err = queries::list_by_group(h.runner.store(), 777, &RuleFilter::default(), PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::NotFound(_)));
}

#[tokio::test]
async fn test_event_becomes_row_action() {
    let h = Harness::new();
    let group = h.group("loan-pricing").await;
    let view = h
        .submit(
            SaveDraft::new(group, "action", amount_over(1))
                .with_event(RuleEvent::new("pricing").with_param("status", "ok")),
        )
        .await;

    assert_eq!(view.rule.action_type.as_deref(), Some("pricing"));
    assert_eq!(view.rule.action_value, Some(json!({ "status": "ok" })));
}
