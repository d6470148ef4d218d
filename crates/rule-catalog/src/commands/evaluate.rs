//! 批量评估
//!
//! 对每条输入记录按优先级依次尝试候选规则，命中第一条即停止。
//! 所有尝试（包括未命中与出错）都写入评估日志，整批在同一事务内完成。

use std::time::Instant;

use async_trait::async_trait;
use rule_engine::{Facts, RuleEvent};
use rulebook_shared::observability::metrics::{record_evaluation, record_evaluation_duration};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{Command, CommandContext};
use crate::error::{CatalogError, Result};
use crate::evaluation::{NO_MATCH_ALERT, enrich_facts, sort_candidates, substitute_dynamic};
use crate::models::{
    DictionaryScope, ExecutionType, NewEvaluationLog, ParameterDef, Rule, TagDef,
};
use crate::queries::require_group;
use crate::store::CatalogTx;

/// 对一批记录执行规则组评估
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateBatch {
    pub rule_group_id: i64,
    /// 非空的对象数组
    pub records: Value,
}

impl EvaluateBatch {
    pub fn new(rule_group_id: i64, records: Value) -> Self {
        Self {
            rule_group_id,
            records,
        }
    }

    fn records(&self) -> Result<Vec<&Map<String, Value>>> {
        let Value::Array(items) = &self.records else {
            return Err(CatalogError::Validation("records 必须是数组".to_string()));
        };
        if items.is_empty() {
            return Err(CatalogError::Validation("records 不能为空".to_string()));
        }

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_object().ok_or_else(|| {
                    CatalogError::Validation(format!("records[{index}] 必须是对象"))
                })
            })
            .collect()
    }
}

/// 单条记录的评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecordOutcome {
    Matched {
        rule_id: i64,
        rule_name: String,
        version: i32,
        /// 已完成动态值替换的事件
        event: RuleEvent,
        json_rule: Value,
    },
    NoMatch {
        alert: String,
    },
}

impl RecordOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn event(&self) -> Option<&RuleEvent> {
        match self {
            Self::Matched { event, .. } => Some(event),
            Self::NoMatch { .. } => None,
        }
    }

    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Self::Matched { rule_name, .. } => Some(rule_name),
            Self::NoMatch { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub trace_id: Uuid,
    pub execution_type: String,
    /// 与输入记录一一对应
    pub results: Vec<RecordOutcome>,
}

impl BatchOutcome {
    pub fn matched(&self) -> usize {
        self.results.iter().filter(|r| r.is_match()).count()
    }
}

/// 候选规则及其字典
struct Candidate {
    rule: Rule,
    tags: Vec<TagDef>,
    parameters: Vec<ParameterDef>,
}

async fn load_candidates(tx: &mut dyn CatalogTx, group_id: i64) -> Result<Vec<Candidate>> {
    let mut rules = tx.evaluation_candidates(group_id).await?;
    if rules.is_empty() {
        return Err(CatalogError::NotFound(format!(
            "规则组 {group_id} 没有可用的已审批规则"
        )));
    }
    sort_candidates(&mut rules);

    let mut candidates = Vec::with_capacity(rules.len());
    for rule in rules {
        let tags = tx.tags_of(DictionaryScope::Catalog, rule.id).await?;
        let parameters = tx.parameters_of(DictionaryScope::Catalog, rule.id).await?;
        candidates.push(Candidate {
            rule,
            tags,
            parameters,
        });
    }
    Ok(candidates)
}

impl EvaluateBatch {
    /// 评估单条记录，返回结果与待写入的日志
    fn evaluate_record(
        &self,
        record: &Map<String, Value>,
        candidates: &[Candidate],
        ctx: &CommandContext<'_>,
    ) -> (RecordOutcome, Vec<NewEvaluationLog>) {
        let mut logs = Vec::new();

        for candidate in candidates {
            let rule = &candidate.rule;
            let facts = enrich_facts(record, &candidate.tags, &candidate.parameters);
            let attempt = ctx.engine.evaluate(rule, &Facts::new(facts.clone()));

            let mut log = NewEvaluationLog {
                rule_id: rule.id,
                rule_group_id: rule.rule_group_id,
                input_payload: facts.clone(),
                result: Some(false),
                evaluated_by: ctx.settings.evaluator_identity.clone(),
                trace_id: ctx.trace_id,
                version: rule.version,
                action: None,
                action_type: None,
                action_value: None,
            };

            match attempt {
                Ok(result) if result.matched => {
                    let mut event = result.event.unwrap_or_default();
                    log.result = Some(true);
                    log.action_type = Some(event.event_type.clone());
                    log.action_value = Some(Value::Object(event.params.clone()));
                    logs.push(log);

                    substitute_dynamic(&mut event.params, &facts);
                    debug!(rule_id = rule.id, "记录命中规则");
                    return (
                        RecordOutcome::Matched {
                            rule_id: rule.id,
                            rule_name: rule.name.clone(),
                            version: rule.version,
                            event,
                            json_rule: rule.json_rule.clone(),
                        },
                        logs,
                    );
                }
                Ok(_) => logs.push(log),
                Err(e) => {
                    warn!(rule_id = rule.id, error = %e, "规则评估出错，按未命中处理");
                    log.action = Some(format!("evaluation error: {e}"));
                    logs.push(log);
                }
            }
        }

        (
            RecordOutcome::NoMatch {
                alert: NO_MATCH_ALERT.to_string(),
            },
            logs,
        )
    }
}

#[async_trait]
impl Command for EvaluateBatch {
    type Output = BatchOutcome;
    const NAME: &'static str = "EvaluateBatch";

    fn validate(&self) -> Result<()> {
        self.records().map(|_| ())
    }

    #[instrument(skip(self, tx, ctx), fields(rule_group_id = self.rule_group_id))]
    async fn execute(&self, tx: &mut dyn CatalogTx, ctx: &CommandContext<'_>) -> Result<BatchOutcome> {
        let started = Instant::now();
        let records = self.records()?;

        let group = require_group(tx, self.rule_group_id).await?;
        let candidates = load_candidates(tx, self.rule_group_id).await?;
        if ExecutionType::parse(&group.execution_type) != Some(ExecutionType::FirstMatch) {
            return Err(CatalogError::Conflict(format!(
                "不支持的执行策略: {}",
                group.execution_type
            )));
        }

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let (outcome, logs) = self.evaluate_record(record, &candidates, ctx);
            for log in &logs {
                tx.insert_evaluation_log(log).await?;
            }
            record_evaluation(if outcome.is_match() {
                "matched"
            } else {
                "unmatched"
            });
            results.push(outcome);
        }

        let outcome = BatchOutcome {
            trace_id: ctx.trace_id,
            execution_type: group.execution_type,
            results,
        };
        record_evaluation_duration(started.elapsed());
        info!(
            records = outcome.results.len(),
            matched = outcome.matched(),
            candidates = candidates.len(),
            "批量评估完成"
        );
        Ok(outcome)
    }
}
