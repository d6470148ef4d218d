//! 规则版本存储
//!
//! 版本号在同组同名内从 1 连续递增，任意时刻至多一行 is_latest。
//! 规则行创建后不再修改，更新总是插入新版本。

use rule_engine::CompiledRule;
use serde_json::Value;
use tracing::info;

use crate::error::{CatalogError, Result};
use crate::models::{
    DictionaryScope, NewRule, ParameterDef, ParameterSpec, Rule, TagDef, TagSpec, VersionPatch,
    non_blank_tags,
};
use crate::store::CatalogTx;

/// 首个版本的内容
#[derive(Debug, Clone)]
pub struct InitialVersion {
    pub rule_group_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub json_rule: Value,
    pub priority: Option<i32>,
    pub action_type: Option<String>,
    pub action_value: Option<Value>,
}

impl InitialVersion {
    /// 以编译后的文档补齐优先级与动作
    pub fn from_document(
        rule_group_id: i64,
        name: String,
        description: Option<String>,
        json_rule: Value,
        compiled: &CompiledRule,
    ) -> Self {
        let (action_type, action_value) = action_of(compiled);
        Self {
            rule_group_id,
            name,
            description,
            json_rule,
            priority: priority_of(compiled),
            action_type,
            action_value,
        }
    }
}

/// 新版本的结果
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub previous: Rule,
    pub rule: Rule,
    pub updated_fields: Vec<&'static str>,
}

fn priority_of(compiled: &CompiledRule) -> Option<i32> {
    compiled
        .document
        .priority
        .and_then(|p| i32::try_from(p).ok())
}

fn action_of(compiled: &CompiledRule) -> (Option<String>, Option<Value>) {
    match &compiled.document.event {
        Some(event) => (
            Some(event.event_type.clone()),
            Some(Value::Object(event.params.clone())),
        ),
        None => (None, None),
    }
}

/// 写入正式字典并关联到规则
pub async fn link_parameters(
    tx: &mut dyn CatalogTx,
    rule_id: i64,
    parameters: &[ParameterSpec],
    actor: &str,
    strict: bool,
) -> Result<Vec<ParameterDef>> {
    let mut linked = Vec::with_capacity(parameters.len());
    for spec in parameters {
        let def = tx
            .upsert_parameter(DictionaryScope::Catalog, spec, actor, strict)
            .await?;
        tx.link_parameter(DictionaryScope::Catalog, rule_id, def.id)
            .await?;
        linked.push(def);
    }
    Ok(linked)
}

pub async fn link_tags(
    tx: &mut dyn CatalogTx,
    rule_id: i64,
    tags: &[TagSpec],
    actor: &str,
    strict: bool,
) -> Result<Vec<TagDef>> {
    let mut linked = Vec::with_capacity(tags.len());
    for spec in tags {
        let def = tx
            .upsert_tag(DictionaryScope::Catalog, spec, actor, strict)
            .await?;
        tx.link_tag(DictionaryScope::Catalog, rule_id, def.id).await?;
        linked.push(def);
    }
    Ok(linked)
}

/// 插入版本 1（PENDING、is_latest、is_active）并关联参数与标签
///
/// 同组已存在同名规则时返回 Conflict，后续版本只能通过 [`create_new_version`] 产生。
/// 草稿字典提升为正式字典时按后写覆盖处理，不要求 revision。
pub async fn create_initial_version(
    tx: &mut dyn CatalogTx,
    initial: InitialVersion,
    parameters: &[ParameterSpec],
    tags: &[TagSpec],
    actor: &str,
) -> Result<Rule> {
    if let Some(existing) = tx.max_version(initial.rule_group_id, &initial.name).await? {
        return Err(CatalogError::Conflict(format!(
            "规则 {} 已存在（当前最大版本 {existing}），请通过更新创建新版本",
            initial.name
        )));
    }

    let rule = tx
        .insert_rule(&NewRule {
            rule_group_id: initial.rule_group_id,
            name: initial.name,
            description: initial.description,
            json_rule: initial.json_rule,
            version: 1,
            priority: initial.priority,
            action_type: initial.action_type,
            action_value: initial.action_value,
            created_by: actor.to_string(),
        })
        .await?;

    link_parameters(tx, rule.id, parameters, actor, false).await?;
    link_tags(tx, rule.id, tags, actor, false).await?;

    info!(
        rule_id = rule.id,
        rule_group_id = rule.rule_group_id,
        name = %rule.name,
        "规则首个版本已创建"
    );
    Ok(rule)
}

/// 以当前最新版本为基础插入新版本，版本号取同名规则的最大版本 + 1
///
/// 目标行必须 is_active 且 is_latest，否则 NotFound。改名时新名称在组内不能已被使用，
/// 改名后的规则从版本 1 开始新的版本链。
/// 标签、参数：提供时写入字典并关联，未提供时复制上一版本的全部关联。
pub async fn create_new_version(
    tx: &mut dyn CatalogTx,
    group_id: i64,
    rule_id: i64,
    patch: &VersionPatch,
    actor: &str,
    strict: bool,
) -> Result<NewVersion> {
    let updated_fields = patch.updated_fields();
    if updated_fields.is_empty() {
        return Err(CatalogError::Validation(
            "未指定需要更新的字段".to_string(),
        ));
    }

    // 先解析字典输入，非法数据类型不应留下任何写入
    let parameters = patch
        .parameters
        .as_deref()
        .map(|list| list.iter().map(|p| p.resolve()).collect::<Result<Vec<_>>>())
        .transpose()?;
    let tags = patch
        .tags
        .as_deref()
        .map(|list| {
            non_blank_tags(list)
                .iter()
                .map(|t| t.resolve())
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;

    let previous = tx
        .lock_rule(group_id, rule_id)
        .await?
        .filter(|r| r.is_active && r.is_latest)
        .ok_or_else(|| CatalogError::NotFound(format!("规则不存在或不是最新版本: {rule_id}")))?;

    let name = patch
        .name
        .clone()
        .unwrap_or_else(|| previous.name.clone());
    let current_max = tx.max_version(group_id, &name).await?;
    if name != previous.name && current_max.is_some() {
        return Err(CatalogError::Conflict(format!(
            "规则组内已存在同名规则: {name}"
        )));
    }
    let version = current_max.unwrap_or(0) + 1;

    tx.set_latest(previous.id, false, actor).await?;

    let rule = tx
        .insert_rule(&NewRule {
            rule_group_id: group_id,
            name,
            description: patch
                .description
                .clone()
                .or_else(|| previous.description.clone()),
            json_rule: patch
                .json_rule
                .clone()
                .unwrap_or_else(|| previous.json_rule.clone()),
            version,
            priority: patch.priority.or(previous.priority),
            action_type: patch
                .action_type
                .clone()
                .or_else(|| previous.action_type.clone()),
            action_value: patch
                .action_value
                .clone()
                .or_else(|| previous.action_value.clone()),
            created_by: actor.to_string(),
        })
        .await?;

    match &parameters {
        Some(specs) => {
            link_parameters(tx, rule.id, specs, actor, strict).await?;
        }
        None => tx.copy_parameter_links(previous.id, rule.id).await?,
    }
    match &tags {
        Some(specs) => {
            link_tags(tx, rule.id, specs, actor, strict).await?;
        }
        None => tx.copy_tag_links(previous.id, rule.id).await?,
    }

    info!(
        previous_id = previous.id,
        rule_id = rule.id,
        version = rule.version,
        fields = ?updated_fields,
        "规则新版本已创建"
    );

    Ok(NewVersion {
        previous,
        rule,
        updated_fields,
    })
}
