//! 集成测试公共夹具（内存存储）

#![allow(dead_code)]

use std::sync::Arc;

use rule_catalog::models::{ParameterInput, RuleView, TagInput};
use rule_catalog::{
    Actor, ApproveRule, CommandRunner, CreateRuleGroup, MemoryCatalogStore, SaveDraft,
    SubmitDraft,
};
use rule_engine::RuleEvent;
use rulebook_shared::config::CatalogConfig;
use serde_json::{Value, json};

pub struct Harness {
    pub store: Arc<MemoryCatalogStore>,
    pub runner: CommandRunner,
    pub maker: Actor,
    pub checker: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(CatalogConfig::default())
    }

    pub fn with_settings(settings: CatalogConfig) -> Self {
        let store = Arc::new(MemoryCatalogStore::new());
        let runner = CommandRunner::new(store.clone(), settings);
        Self {
            store,
            runner,
            maker: Actor::maker("alice"),
            checker: Actor::checker("bob"),
        }
    }

    pub async fn group(&self, name: &str) -> i64 {
        self.runner
            .run(&CreateRuleGroup::new(name), &self.maker)
            .await
            .expect("创建规则组失败")
            .id
    }

    /// 保存并提交草稿，返回 PENDING 的版本 1
    pub async fn submit(&self, command: SaveDraft) -> RuleView {
        let group_id = command.rule_group_id;
        let draft = self
            .runner
            .run(&command, &self.maker)
            .await
            .expect("保存草稿失败");
        self.runner
            .run(&SubmitDraft::new(group_id, draft.draft.id), &self.maker)
            .await
            .expect("提交草稿失败")
    }

    pub async fn approve(&self, group_id: i64, rule_id: i64) -> RuleView {
        self.runner
            .run(&ApproveRule::new(group_id, rule_id), &self.checker)
            .await
            .expect("审批失败")
    }

    /// 提交并审批一条规则
    pub async fn publish(&self, command: SaveDraft) -> RuleView {
        let group_id = command.rule_group_id;
        let submitted = self.submit(command).await;
        self.approve(group_id, submitted.rule.id).await
    }
}

pub fn amount_over(threshold: i64) -> Value {
    json!({
        "conditions": { "all": [ { "fact": "amount", "operator": "greaterThan", "value": threshold } ] }
    })
}

pub fn rule_with_priority(
    group_id: i64,
    name: &str,
    tree: Value,
    priority: i64,
    event: RuleEvent,
) -> SaveDraft {
    let mut tree = tree;
    tree["priority"] = json!(priority);
    SaveDraft::new(group_id, name, tree).with_event(event)
}

pub fn flag_parameter(name: &str, default: Value) -> ParameterInput {
    ParameterInput::new(name, "BOOLEAN").with_default(default)
}

pub fn tags(names: &[&str]) -> Vec<TagInput> {
    names.iter().map(|n| TagInput::new(*n)).collect()
}
