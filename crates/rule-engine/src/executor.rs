//! 规则执行器
//!
//! 纯函数式的递归求值：不修改事实、不访问存储。组节点短路求值，
//! 递归深度受显式上限保护。

use crate::compiler::{CompiledRule, DEFAULT_MAX_DEPTH};
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::facts::Facts;
use crate::models::{Condition, ConditionGroup, ConditionNode, EvaluationResult, ValueRef};
use crate::operators::Combinator;
use serde_json::Value;
use std::time::Instant;

/// 规则执行器
#[derive(Debug, Clone)]
pub struct RuleExecutor {
    max_depth: usize,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            trace_enabled: false,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 执行规则评估
    ///
    /// 命中时结果中携带规则事件；文档未声明事件时返回空事件。
    pub fn execute(&self, rule: &CompiledRule, facts: &Facts) -> Result<EvaluationResult> {
        let start = Instant::now();
        let mut result = EvaluationResult::default();

        let matched = self.evaluate_node(rule.conditions(), facts, &mut result, "conditions", 1)?;

        result.matched = matched;
        if matched {
            result.event = Some(rule.document.event.clone().unwrap_or_default());
        }
        result.evaluation_time_us = start.elapsed().as_micros() as u64;

        Ok(result)
    }

    /// 仅判断是否命中
    pub fn matches(&self, node: &ConditionNode, facts: &Facts) -> Result<bool> {
        let mut scratch = EvaluationResult::default();
        self.evaluate_node(node, facts, &mut scratch, "conditions", 1)
    }

    fn evaluate_node(
        &self,
        node: &ConditionNode,
        facts: &Facts,
        result: &mut EvaluationResult,
        path: &str,
        depth: usize,
    ) -> Result<bool> {
        if depth > self.max_depth {
            return Err(RuleError::DepthExceeded {
                limit: self.max_depth,
            });
        }

        match node {
            ConditionNode::Leaf(cond) => self.evaluate_condition(cond, facts, result, path),
            ConditionNode::Group(group) => self.evaluate_group(group, facts, result, path, depth),
        }
    }

    /// 评估叶子条件
    fn evaluate_condition(
        &self,
        cond: &Condition,
        facts: &Facts,
        result: &mut EvaluationResult,
        path: &str,
    ) -> Result<bool> {
        let field_value = facts.resolve(&cond.fact, cond.path.as_deref())?;

        let expected = match &cond.value {
            ValueRef::Literal(v) => v.clone(),
            ValueRef::Fact { fact, path } => facts
                .resolve(fact, path.as_deref())?
                .cloned()
                .unwrap_or(Value::Null),
        };

        let matched = ConditionEvaluator::evaluate(field_value, cond.operator, &expected)?;

        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: {} {} {} => {}",
                path,
                cond.fact,
                cond.operator,
                expected,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if matched {
            result
                .matched_conditions
                .push(format!("{} {} {}", cond.fact, cond.operator, expected));
        }

        Ok(matched)
    }

    /// 评估组节点（短路求值）
    fn evaluate_group(
        &self,
        group: &ConditionGroup,
        facts: &Facts,
        result: &mut EvaluationResult,
        path: &str,
        depth: usize,
    ) -> Result<bool> {
        // all 遇 false 即停，any 遇 true 即停
        let stop_on = group.combinator == Combinator::Any;

        for (i, child) in group.children.iter().enumerate() {
            let child_path = format!("{}.{}[{}]", path, group.combinator.key(), i);
            let child_matched = self.evaluate_node(child, facts, result, &child_path, depth + 1)?;

            if child_matched == stop_on {
                if self.trace_enabled {
                    result.evaluation_trace.push(format!(
                        "{}: {} 短路 - 子节点 {} 结果为 {}",
                        path, group.combinator, i, child_matched
                    ));
                }
                return Ok(stop_on);
            }
        }

        Ok(!stop_on)
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}
