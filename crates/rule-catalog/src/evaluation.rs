//! 评估引擎
//!
//! 负责事实增强、调用条件引擎以及命中事件的动态值替换。
//! 候选规则加载与日志写入由 [`crate::commands::EvaluateBatch`] 在事务内完成。

use std::sync::Arc;

use rule_engine::{CompiledRule, EvaluationResult, Facts, RuleCache, RuleCompiler, RuleExecutor};
use serde_json::{Map, Value};

use crate::models::{ParameterDef, Rule, TagDef};

/// 未命中任何规则时返回的提示
pub const NO_MATCH_ALERT: &str =
    "No rule matched for the provided input. Please review the input or rules.";

/// 兼容旧数据的两个嵌套命名空间
pub const LEGACY_NAMESPACES: [&str; 2] = ["loanAdditionalInfos", "loanProductAdditionalInfo"];

/// 需要写入旧命名空间的参数
pub const LEGACY_FLAG: &str = "PRE_PAYMENT_ENABLED";

/// 动态替换：事件参数键、占位值与取值事实
pub const DYNAMIC_PARAM_KEY: &str = "razorpayMid";
pub const DYNAMIC_SENTINEL: &str = "LENDER_ID_DYNAMIC";
pub const DYNAMIC_SOURCE_FACT: &str = "lenderId";

/// 条件树编译与执行
///
/// 规则行创建后条件树不再变化，编译结果按行 ID 缓存。
pub struct EvaluationEngine {
    cache: RuleCache,
    executor: RuleExecutor,
}

impl EvaluationEngine {
    pub fn new(max_depth: usize) -> Self {
        Self {
            cache: RuleCache::new(RuleCompiler::with_max_depth(max_depth)),
            executor: RuleExecutor::new().with_max_depth(max_depth),
        }
    }

    pub fn compiler(&self) -> &RuleCompiler {
        self.cache.compiler()
    }

    pub fn compile(&self, rule: &Rule) -> rule_engine::Result<Arc<CompiledRule>> {
        self.cache.get_or_compile(rule.id, &rule.json_rule)
    }

    /// 对单条规则求值，任何引擎错误由调用方视为未命中
    pub fn evaluate(&self, rule: &Rule, facts: &Facts) -> rule_engine::Result<EvaluationResult> {
        let compiled = self.compile(rule)?;
        self.executor.execute(&compiled, facts)
    }

    pub fn cached_rules(&self) -> usize {
        self.cache.len()
    }
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new(rule_engine::DEFAULT_MAX_DEPTH)
    }
}

/// 以调用方记录为基础构造某条规则的事实对象
///
/// 附加 `tags`（标签名列表）与 `parameters`（参数名到默认值）；
/// 确保旧命名空间为对象，并在规则定义了 [`LEGACY_FLAG`] 时补齐各命名空间中缺失的该值。
pub fn enrich_facts(
    record: &Map<String, Value>,
    tags: &[TagDef],
    parameters: &[ParameterDef],
) -> Value {
    let mut facts = record.clone();

    facts.insert(
        "tags".to_string(),
        Value::Array(tags.iter().map(|t| Value::String(t.name.clone())).collect()),
    );

    let defaults: Map<String, Value> = parameters
        .iter()
        .map(|p| (p.name.clone(), p.default_value.clone().unwrap_or(Value::Null)))
        .collect();
    let legacy_flag = defaults.get(LEGACY_FLAG).cloned();
    facts.insert("parameters".to_string(), Value::Object(defaults));

    for namespace in LEGACY_NAMESPACES {
        let slot = facts
            .entry(namespace.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }

        if let Some(flag) = &legacy_flag
            && let Value::Object(ns) = slot
        {
            ns.entry(LEGACY_FLAG.to_string())
                .or_insert_with(|| flag.clone());
        }
    }

    Value::Object(facts)
}

/// 将事件参数中的占位值替换为事实中的调用方标识
///
/// 事实中没有该标识（或为空）时保留占位值。
pub fn substitute_dynamic(params: &mut Map<String, Value>, facts: &Value) {
    let is_sentinel = params
        .get(DYNAMIC_PARAM_KEY)
        .and_then(Value::as_str)
        .is_some_and(|v| v == DYNAMIC_SENTINEL);
    if !is_sentinel {
        return;
    }

    let replacement = facts
        .get(DYNAMIC_SOURCE_FACT)
        .filter(|v| is_present(v))
        .cloned();
    if let Some(value) = replacement {
        params.insert(DYNAMIC_PARAM_KEY.to_string(), value);
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

/// 候选规则排序：priority 升序，未设置的排在最后，同优先级按 ID
pub fn sort_candidates(rules: &mut [Rule]) {
    rules.sort_by_key(|r| (r.priority.is_none(), r.priority, r.id));
}
