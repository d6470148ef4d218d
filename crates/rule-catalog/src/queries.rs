//! 只读查询
//!
//! 每个查询开启一个事务读取后回滚，不产生任何写入。

use std::collections::BTreeSet;

use rule_engine::RuleCompiler;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{CatalogError, Result};
use crate::models::{
    DictionaryScope, DraftView, EvaluationLogEntry, Page, PageRequest, Rule, RuleDraft,
    RuleFilter, RuleGroup, RuleGroupRef, RuleStatus, RuleView,
};
use crate::store::{CatalogStore, CatalogTx};

/// 读取规则组，不存在时返回 NotFound
pub(crate) async fn require_group(tx: &mut dyn CatalogTx, group_id: i64) -> Result<RuleGroup> {
    tx.get_rule_group(group_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("规则组不存在: {group_id}")))
}

/// 读取启用中的规则组，写操作要求规则组可寻址
pub(crate) async fn require_active_group(
    tx: &mut dyn CatalogTx,
    group_id: i64,
) -> Result<RuleGroup> {
    let group = require_group(tx, group_id).await?;
    if !group.is_active {
        return Err(CatalogError::NotFound(format!("规则组已停用: {group_id}")));
    }
    Ok(group)
}

/// 组装规则投影（规则组摘要、参数、标签）
pub(crate) async fn project_rule(tx: &mut dyn CatalogTx, rule: Rule) -> Result<RuleView> {
    let group = require_group(tx, rule.rule_group_id).await?;
    let parameters = tx.parameters_of(DictionaryScope::Catalog, rule.id).await?;
    let tags = tx.tags_of(DictionaryScope::Catalog, rule.id).await?;

    Ok(RuleView {
        rule,
        rule_group: RuleGroupRef::from(&group),
        parameters,
        tags,
    })
}

pub(crate) async fn project_draft(tx: &mut dyn CatalogTx, mut draft: RuleDraft) -> Result<DraftView> {
    // 旧数据可能以文本形式保存
    if let Some(text) = draft.json_rule.as_str() {
        draft.json_rule = serde_json::from_str(text)?;
    }

    let parameters = tx.parameters_of(DictionaryScope::Draft, draft.id).await?;
    let tags = tx.tags_of(DictionaryScope::Draft, draft.id).await?;
    Ok(DraftView {
        draft,
        parameters,
        tags,
    })
}

async fn project_rules(tx: &mut dyn CatalogTx, rules: Vec<Rule>) -> Result<Vec<RuleView>> {
    let mut views = Vec::with_capacity(rules.len());
    for rule in rules {
        views.push(project_rule(tx, rule).await?);
    }
    Ok(views)
}

/// 按版本号读取规则
///
/// `rule_id` 用于定位规则名，版本在同组同名的 is_active 行中查找。
#[instrument(skip(store))]
pub async fn get_by_version(
    store: &dyn CatalogStore,
    group_id: i64,
    rule_id: i64,
    version: i32,
) -> Result<RuleView> {
    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        require_group(tx.as_mut(), group_id).await?;
        let anchor = tx
            .get_rule(group_id, rule_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("规则不存在: {rule_id}")))?;
        let rule = tx
            .find_version(group_id, &anchor.name, version)
            .await?
            .ok_or_else(|| {
                CatalogError::NotFound(format!("规则 {} 的版本 {version} 不存在", anchor.name))
            })?;
        project_rule(tx.as_mut(), rule).await
    }
    .await;
    tx.rollback().await?;
    result
}

/// 读取规则当前的最新版本
#[instrument(skip(store))]
pub async fn get_latest(store: &dyn CatalogStore, group_id: i64, rule_id: i64) -> Result<RuleView> {
    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        require_group(tx.as_mut(), group_id).await?;
        let anchor = tx
            .get_rule(group_id, rule_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("规则不存在: {rule_id}")))?;
        let rule = tx
            .find_latest(group_id, &anchor.name)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("规则 {} 没有最新版本", anchor.name)))?;
        project_rule(tx.as_mut(), rule).await
    }
    .await;
    tx.rollback().await?;
    result
}

/// 分页列出规则组内的最新规则
#[instrument(skip(store, filter))]
pub async fn list_by_group(
    store: &dyn CatalogStore,
    group_id: i64,
    filter: &RuleFilter,
    page: PageRequest,
) -> Result<Page<RuleView>> {
    page.validate()?;

    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        require_group(tx.as_mut(), group_id).await?;
        let (rules, total) = tx.list_rules(group_id, filter, &page).await?;
        if rules.is_empty() {
            return Ok(Page::new(Vec::new(), total, &page));
        }
        let views = project_rules(tx.as_mut(), rules).await?;
        Ok(Page::new(views, total, &page))
    }
    .await;
    tx.rollback().await?;
    result
}

/// 列出指定审批状态的规则，`group_id` 为空时跨所有规则组
#[instrument(skip(store))]
pub async fn list_by_status(
    store: &dyn CatalogStore,
    group_id: Option<i64>,
    status: RuleStatus,
) -> Result<Vec<RuleView>> {
    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        if let Some(group_id) = group_id {
            require_group(tx.as_mut(), group_id).await?;
        }
        let rules = tx.list_rules_by_status(group_id, status).await?;
        project_rules(tx.as_mut(), rules).await
    }
    .await;
    tx.rollback().await?;
    result
}

#[instrument(skip(store))]
pub async fn list_rule_groups(
    store: &dyn CatalogStore,
    search: Option<&str>,
    page: PageRequest,
) -> Result<Page<RuleGroup>> {
    page.validate()?;

    let mut tx = store.begin().await?;
    let result = tx.list_rule_groups(search, &page).await;
    tx.rollback().await?;

    let (groups, total) = result?;
    Ok(Page::new(groups, total, &page))
}

/// 规则组内启用规则引用到的事实名（去重、排序）
///
/// 无法解析的条件树会被跳过。
#[instrument(skip(store, compiler))]
pub async fn fact_names(
    store: &dyn CatalogStore,
    compiler: &RuleCompiler,
    group_id: i64,
) -> Result<Vec<String>> {
    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        require_group(tx.as_mut(), group_id).await?;
        tx.active_rules(group_id).await
    }
    .await;
    tx.rollback().await?;

    let mut names = BTreeSet::new();
    for rule in result? {
        match compiler.compile_value(&rule.json_rule) {
            Ok(compiled) => names.extend(compiled.fact_names),
            Err(e) => warn!(rule_id = rule.id, error = %e, "规则条件无法解析，已跳过"),
        }
    }
    Ok(names.into_iter().collect())
}

/// 读取规则组内的草稿
#[instrument(skip(store))]
pub async fn get_draft(store: &dyn CatalogStore, group_id: i64, draft_id: i64) -> Result<DraftView> {
    let mut tx = store.begin().await?;
    let result: Result<_> = async {
        let draft = tx
            .get_draft(draft_id)
            .await?
            .filter(|d| d.rule_group_id == group_id)
            .ok_or_else(|| CatalogError::NotFound(format!("草稿不存在: {draft_id}")))?;
        project_draft(tx.as_mut(), draft).await
    }
    .await;
    tx.rollback().await?;
    result
}

/// 按链路 ID 读取评估日志
#[instrument(skip(store))]
pub async fn evaluation_log(
    store: &dyn CatalogStore,
    trace_id: Uuid,
) -> Result<Vec<EvaluationLogEntry>> {
    let mut tx = store.begin().await?;
    let result = tx.evaluation_logs(trace_id).await;
    tx.rollback().await?;
    result
}
