//! 创建新版本（规则更新）

use async_trait::async_trait;
use rule_engine::RuleCompiler;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{Command, CommandContext, require_text};
use crate::audit;
use crate::catalog::create_new_version;
use crate::error::{CatalogError, Result};
use crate::models::{
    EventType, NewEvaluationLog, NewRuleEvent, Role, Rule, RuleEventRecord, RuleView,
    VersionPatch,
};
use crate::queries::{project_rule, require_active_group};
use crate::store::CatalogTx;

/// 以部分字段为最新版本创建 version + 1，新版本重新进入 PENDING
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVersion {
    pub rule_group_id: i64,
    pub rule_id: i64,
    #[serde(flatten)]
    pub patch: VersionPatch,
}

impl CreateVersion {
    pub fn new(rule_group_id: i64, rule_id: i64, patch: VersionPatch) -> Self {
        Self {
            rule_group_id,
            rule_id,
            patch,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionOutcome {
    pub rule: RuleView,
    pub updated_fields: Vec<String>,
    pub trace_id: Uuid,
    pub events: Vec<RuleEventRecord>,
}

/// 已提供字段的新旧值
fn field_changes(previous: &Rule, patch: &VersionPatch) -> Map<String, Value> {
    let mut changes = Map::new();
    let mut record = |field: &str, old: Value, new: Value| {
        changes.insert(field.to_string(), json!({ "old": old, "new": new }));
    };

    if let Some(json_rule) = &patch.json_rule {
        record("json_rule", previous.json_rule.clone(), json_rule.clone());
    }
    if let Some(description) = &patch.description {
        record("description", json!(previous.description), json!(description));
    }
    if let Some(name) = &patch.name {
        record("name", json!(previous.name), json!(name));
    }
    if let Some(action_type) = &patch.action_type {
        record("action_type", json!(previous.action_type), json!(action_type));
    }
    if let Some(action_value) = &patch.action_value {
        record(
            "action_value",
            previous.action_value.clone().unwrap_or(Value::Null),
            action_value.clone(),
        );
    }
    if let Some(priority) = patch.priority {
        record("priority", json!(previous.priority), json!(priority));
    }
    changes
}

#[async_trait]
impl Command for CreateVersion {
    type Output = VersionOutcome;
    const NAME: &'static str = "CreateVersion";

    fn required_role(&self) -> Option<Role> {
        Some(Role::Maker)
    }

    fn validate(&self) -> Result<()> {
        if self.patch.is_empty() {
            return Err(CatalogError::Validation(
                "未指定需要更新的字段".to_string(),
            ));
        }
        if let Some(name) = &self.patch.name {
            require_text("name", name)?;
        }
        if let Some(json_rule) = &self.patch.json_rule {
            RuleCompiler::new().compile_value(json_rule)?;
        }
        for parameter in self.patch.parameters.iter().flatten() {
            parameter.resolve()?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        tx: &mut dyn CatalogTx,
        ctx: &CommandContext<'_>,
    ) -> Result<VersionOutcome> {
        require_active_group(tx, self.rule_group_id).await?;
        if let Some(json_rule) = &self.patch.json_rule {
            ctx.engine.compiler().compile_value(json_rule)?;
        }

        let actor = ctx.actor.username.as_str();
        let created = create_new_version(
            tx,
            self.rule_group_id,
            self.rule_id,
            &self.patch,
            actor,
            ctx.settings.require_revision_token,
        )
        .await?;
        let previous = &created.previous;
        let metadata = ctx.metadata();

        let mut events = Vec::new();
        events.push(
            audit::append(
                tx,
                NewRuleEvent::new(
                    EventType::RuleUpdated,
                    previous.id,
                    json!({
                        "changes": field_changes(previous, &self.patch),
                        "updated_fields": created.updated_fields,
                        "new_version": created.rule.version,
                        "new_rule_id": created.rule.id,
                    }),
                )
                .with_metadata(&metadata),
            )
            .await?,
        );

        if let Some(json_rule) = &self.patch.json_rule
            && json_rule != &previous.json_rule
        {
            events.push(
                audit::append(
                    tx,
                    NewRuleEvent::new(
                        EventType::RuleUpdated,
                        previous.id,
                        json!({
                            "field": "json_rule",
                            "old": previous.json_rule,
                            "new": json_rule,
                        }),
                    )
                    .with_metadata(&metadata),
                )
                .await?,
            );
        }

        if let Some(tags) = &self.patch.tags {
            let names: Vec<&str> = tags
                .iter()
                .map(|t| t.name.trim())
                .filter(|n| !n.is_empty())
                .collect();
            events.push(
                audit::append(
                    tx,
                    NewRuleEvent::new(
                        EventType::TagsUpdated,
                        previous.id,
                        json!({ "tags": names, "new_rule_id": created.rule.id }),
                    )
                    .with_metadata(&metadata),
                )
                .await?,
            );
        }

        if let Some(parameters) = &self.patch.parameters {
            let names: Vec<&str> = parameters.iter().map(|p| p.name.trim()).collect();
            events.push(
                audit::append(
                    tx,
                    NewRuleEvent::new(
                        EventType::ParametersUpdated,
                        previous.id,
                        json!({ "parameters": names, "new_rule_id": created.rule.id }),
                    )
                    .with_metadata(&metadata),
                )
                .await?,
            );
        }

        tx.insert_evaluation_log(&NewEvaluationLog {
            rule_id: created.rule.id,
            rule_group_id: self.rule_group_id,
            input_payload: json!({ "updated_fields": created.updated_fields }),
            result: None,
            evaluated_by: actor.to_string(),
            trace_id: ctx.trace_id,
            version: created.rule.version,
            action: Some(format!(
                "Updated fields: {}",
                created.updated_fields.join(", ")
            )),
            action_type: Some("update".to_string()),
            action_value: created.rule.action_value.clone(),
        })
        .await?;

        let updated_fields = created
            .updated_fields
            .iter()
            .map(|f| f.to_string())
            .collect();
        let rule = project_rule(tx, created.rule).await?;

        Ok(VersionOutcome {
            rule,
            updated_fields,
            trace_id: ctx.trace_id,
            events,
        })
    }
}
