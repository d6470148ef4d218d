//! 规则编译器
//!
//! 将存储中的规则文档（JSON 对象或序列化文本）规范化、校验，并提取引用到的事实名。

use crate::error::{Result, RuleError};
use crate::models::{Condition, ConditionNode, RuleDocument, ValueRef};
use crate::operators::Operator;
use serde_json::Value;
use std::collections::BTreeSet;

/// 默认的最大嵌套层数
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub document: RuleDocument,
    /// 条件树引用的事实名（含比较值中的事实引用）
    pub fact_names: BTreeSet<String>,
    /// 条件树深度
    pub depth: usize,
}

impl CompiledRule {
    pub fn conditions(&self) -> &ConditionNode {
        &self.document.conditions
    }
}

/// 规则编译器
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    max_depth: usize,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 从存储值编译
    pub fn compile_value(&self, value: &Value) -> Result<CompiledRule> {
        self.compile(RuleDocument::from_value(value)?)
    }

    /// 从 JSON 文本编译
    pub fn compile_text(&self, text: &str) -> Result<CompiledRule> {
        self.compile(RuleDocument::from_text(text)?)
    }

    /// 编译规则文档
    pub fn compile(&self, document: RuleDocument) -> Result<CompiledRule> {
        let depth = self.validate_node(&document.conditions, "conditions", 1)?;

        let mut fact_names = BTreeSet::new();
        collect_facts(&document.conditions, &mut fact_names);

        Ok(CompiledRule {
            document,
            fact_names,
            depth,
        })
    }

    /// 校验节点并返回子树深度
    fn validate_node(&self, node: &ConditionNode, path: &str, depth: usize) -> Result<usize> {
        if depth > self.max_depth {
            return Err(RuleError::DepthExceeded {
                limit: self.max_depth,
            });
        }

        match node {
            ConditionNode::Leaf(cond) => {
                self.validate_condition(cond, path)?;
                Ok(depth)
            }
            ConditionNode::Group(group) => {
                if group.children.is_empty() {
                    return Err(RuleError::ParseError(format!(
                        "逻辑组 '{}' 不能为空",
                        path
                    )));
                }

                let mut deepest = depth;
                for (i, child) in group.children.iter().enumerate() {
                    let child_path = format!("{}.{}[{}]", path, group.combinator.key(), i);
                    deepest = deepest.max(self.validate_node(child, &child_path, depth + 1)?);
                }
                Ok(deepest)
            }
        }
    }

    /// 校验操作符与比较值的兼容性
    fn validate_condition(&self, cond: &Condition, path: &str) -> Result<()> {
        let ValueRef::Literal(value) = &cond.value else {
            // 事实引用的值在运行期才可知
            return Ok(());
        };

        match cond.operator {
            op if op.requires_array() => {
                if !value.is_array() {
                    return Err(RuleError::ParseError(format!(
                        "条件 '{}' 的 {} 操作符需要数组值",
                        path, op
                    )));
                }
            }
            Operator::Regex => {
                let pattern = value.as_str().ok_or_else(|| {
                    RuleError::ParseError(format!("条件 '{}' 的 regex 操作符需要字符串值", path))
                })?;
                regex::Regex::new(pattern).map_err(|e| {
                    RuleError::ParseError(format!("条件 '{}' 的正则表达式无效: {}", path, e))
                })?;
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// 递归收集事实名
fn collect_facts(node: &ConditionNode, facts: &mut BTreeSet<String>) {
    match node {
        ConditionNode::Leaf(cond) => {
            facts.insert(cond.fact.clone());
            if let ValueRef::Fact { fact, .. } = &cond.value {
                facts.insert(fact.clone());
            }
        }
        ConditionNode::Group(group) => {
            for child in &group.children {
                collect_facts(child, facts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rule() -> Value {
        json!({
            "conditions": {
                "all": [
                    { "fact": "amount", "operator": "greaterThan", "value": 1000 },
                    {
                        "any": [
                            { "fact": "loanAdditionalInfos", "path": "$.PRE_PAYMENT_ENABLED", "operator": "equal", "value": "true" },
                            { "fact": "tenure", "operator": "lessThan", "value": { "fact": "maxTenure" } }
                        ]
                    }
                ]
            },
            "event": { "type": "pricing", "params": { "status": "ok" } }
        })
    }

    #[test]
    fn test_compile_collects_facts() {
        let compiled = RuleCompiler::new().compile_value(&sample_rule()).unwrap();

        let names: Vec<&str> = compiled.fact_names.iter().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["amount", "loanAdditionalInfos", "maxTenure", "tenure"]
        );
        assert_eq!(compiled.depth, 3);
    }

    #[test]
    fn test_compile_text() {
        let compiled = RuleCompiler::new()
            .compile_text(&sample_rule().to_string())
            .unwrap();
        assert_eq!(compiled.fact_names.len(), 4);
    }

    #[test]
    fn test_validate_empty_group() {
        let err = RuleCompiler::new()
            .compile_value(&json!({ "conditions": { "all": [] } }))
            .unwrap_err();
        assert!(err.to_string().contains("不能为空"));
    }

    #[test]
    fn test_validate_in_requires_array() {
        let rule = json!({ "conditions": { "any": [ { "fact": "a", "operator": "in", "value": "x" } ] } });
        assert!(RuleCompiler::new().compile_value(&rule).is_err());

        let rule = json!({ "conditions": { "any": [ { "fact": "a", "operator": "notIn", "value": ["x"] } ] } });
        assert!(RuleCompiler::new().compile_value(&rule).is_ok());
    }

    #[test]
    fn test_validate_invalid_regex() {
        let rule = json!({ "conditions": { "any": [ { "fact": "a", "operator": "regex", "value": "[invalid" } ] } });
        let err = RuleCompiler::new().compile_value(&rule).unwrap_err();
        assert!(err.to_string().contains("正则表达式无效"));
    }

    #[test]
    fn test_depth_limit() {
        let mut node = json!({ "fact": "a", "operator": "equal", "value": 1 });
        for _ in 0..5 {
            node = json!({ "all": [node] });
        }
        let rule = json!({ "conditions": node });

        assert!(RuleCompiler::with_max_depth(6).compile_value(&rule).is_ok());
        assert!(matches!(
            RuleCompiler::with_max_depth(5).compile_value(&rule),
            Err(RuleError::DepthExceeded { limit: 5 })
        ));
    }
}
