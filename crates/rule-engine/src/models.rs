//! 条件引擎领域模型
//!
//! 规则文档结构：
//!
//! ```json
//! {
//!   "conditions": { "all": [ { "fact": "amount", "operator": "greaterThan", "value": 1000 } ] },
//!   "event": { "type": "pricing", "params": { "status": "ok" } },
//!   "priority": 1
//! }
//! ```
//!
//! 组节点只能包含 `all` 或 `any` 之一；叶子节点由 `fact`、`operator`、`value`
//! 以及可选的 `path` 组成，`value` 可以是字面量，也可以是 `{"fact": "..."}` 形式的事实引用。

use crate::error::{Result, RuleError};
use crate::operators::{Combinator, Operator};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

/// 解析阶段允许的最大嵌套层数，与 serde_json 的递归上限一致
pub const PARSE_DEPTH_LIMIT: usize = 128;

/// 规则文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub conditions: ConditionNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<RuleEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl RuleDocument {
    pub fn new(conditions: ConditionNode) -> Self {
        Self {
            conditions,
            event: None,
            priority: None,
        }
    }

    pub fn with_event(mut self, event: RuleEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// 从存储值解析规则文档
    ///
    /// 存储层可能返回已解析的 JSON 对象，也可能返回序列化后的字符串，两者都会被规范化。
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => Self::from_text(text),
            Value::Object(obj) => Self::from_object(obj),
            other => Err(RuleError::ParseError(format!(
                "规则文档必须是对象，实际为 {}",
                type_name(other)
            ))),
        }
    }

    /// 从 JSON 文本解析规则文档
    pub fn from_text(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match &value {
            Value::Object(obj) => Self::from_object(obj),
            other => Err(RuleError::ParseError(format!(
                "规则文档必须是对象，实际为 {}",
                type_name(other)
            ))),
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Result<Self> {
        let conditions = obj
            .get("conditions")
            .ok_or_else(|| RuleError::ParseError("规则文档缺少 conditions".to_string()))?;
        let conditions = ConditionNode::parse(conditions, "conditions", 1)?;

        let event = match obj.get("event") {
            None | Some(Value::Null) => None,
            Some(v) => Some(serde_json::from_value::<RuleEvent>(v.clone())?),
        };

        let priority = obj.get("priority").and_then(Value::as_i64);

        Ok(Self {
            conditions,
            event,
            priority,
        })
    }

    /// 转换为 JSON 值
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("conditions".to_string(), Value::from(&self.conditions));
        if let Some(event) = &self.event {
            obj.insert("event".to_string(), json!({"type": event.event_type, "params": event.params}));
        }
        if let Some(priority) = self.priority {
            obj.insert("priority".to_string(), json!(priority));
        }
        Value::Object(obj)
    }
}

/// 条件树节点（组或叶子）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConditionNode {
    Group(ConditionGroup),
    Leaf(Condition),
}

/// 组节点
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    pub combinator: Combinator,
    pub children: Vec<ConditionNode>,
}

impl ConditionGroup {
    pub fn all(children: Vec<ConditionNode>) -> Self {
        Self {
            combinator: Combinator::All,
            children,
        }
    }

    pub fn any(children: Vec<ConditionNode>) -> Self {
        Self {
            combinator: Combinator::Any,
            children,
        }
    }
}

/// 叶子条件
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub fact: String,
    pub path: Option<String>,
    pub operator: Operator,
    pub value: ValueRef,
}

impl Condition {
    pub fn new(fact: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            fact: fact.into(),
            path: None,
            operator,
            value: ValueRef::Literal(value.into()),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 比较值改为引用另一个事实
    pub fn against_fact(mut self, fact: impl Into<String>, path: Option<String>) -> Self {
        self.value = ValueRef::Fact {
            fact: fact.into(),
            path,
        };
        self
    }

    fn parse(obj: &Map<String, Value>, at: &str) -> Result<Self> {
        let fact = obj
            .get("fact")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RuleError::ParseError(format!("条件 '{}' 缺少 fact", at)))?;

        let operator_name = obj
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::ParseError(format!("条件 '{}' 缺少 operator", at)))?;
        let operator = Operator::parse(operator_name)
            .ok_or_else(|| RuleError::UnknownOperator(operator_name.to_string()))?;

        let value = obj
            .get("value")
            .ok_or_else(|| RuleError::ParseError(format!("条件 '{}' 缺少 value", at)))?;

        let path = match obj.get("path") {
            None | Some(Value::Null) => None,
            Some(Value::String(p)) => Some(p.clone()),
            Some(other) => {
                return Err(RuleError::ParseError(format!(
                    "条件 '{}' 的 path 必须是字符串，实际为 {}",
                    at,
                    type_name(other)
                )));
            }
        };

        Ok(Self {
            fact: fact.to_string(),
            path,
            operator,
            value: ValueRef::from_json(value),
        })
    }
}

/// 比较值：字面量或事实引用
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRef {
    Literal(Value),
    Fact { fact: String, path: Option<String> },
}

impl ValueRef {
    fn from_json(value: &Value) -> Self {
        if let Value::Object(obj) = value
            && let Some(Value::String(fact)) = obj.get("fact")
        {
            return Self::Fact {
                fact: fact.clone(),
                path: obj.get("path").and_then(Value::as_str).map(str::to_string),
            };
        }
        Self::Literal(value.clone())
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Fact { fact, path: None } => json!({ "fact": fact }),
            Self::Fact {
                fact,
                path: Some(path),
            } => json!({ "fact": fact, "path": path }),
        }
    }
}

impl ConditionNode {
    /// 解析条件节点，`at` 为节点位置，用于错误信息
    pub fn parse(value: &Value, at: &str, depth: usize) -> Result<Self> {
        if depth > PARSE_DEPTH_LIMIT {
            return Err(RuleError::DepthExceeded {
                limit: PARSE_DEPTH_LIMIT,
            });
        }

        let obj = value.as_object().ok_or_else(|| {
            RuleError::ParseError(format!(
                "节点 '{}' 必须是对象，实际为 {}",
                at,
                type_name(value)
            ))
        })?;

        match (obj.get("all"), obj.get("any")) {
            (Some(_), Some(_)) => Err(RuleError::ParseError(format!(
                "节点 '{}' 不能同时包含 all 和 any",
                at
            ))),
            (Some(children), None) => Self::parse_group(Combinator::All, children, at, depth),
            (None, Some(children)) => Self::parse_group(Combinator::Any, children, at, depth),
            (None, None) => Condition::parse(obj, at).map(Self::Leaf),
        }
    }

    fn parse_group(combinator: Combinator, children: &Value, at: &str, depth: usize) -> Result<Self> {
        let items = children.as_array().ok_or_else(|| {
            RuleError::ParseError(format!("节点 '{}.{}' 必须是数组", at, combinator.key()))
        })?;

        let children = items
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let child_at = format!("{}.{}[{}]", at, combinator.key(), i);
                Self::parse(child, &child_at, depth + 1)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::Group(ConditionGroup {
            combinator,
            children,
        }))
    }
}

impl TryFrom<Value> for ConditionNode {
    type Error = RuleError;

    fn try_from(value: Value) -> Result<Self> {
        Self::parse(&value, "conditions", 1)
    }
}

impl From<&ConditionNode> for Value {
    fn from(node: &ConditionNode) -> Self {
        match node {
            ConditionNode::Group(group) => {
                let children: Vec<Value> = group.children.iter().map(Value::from).collect();
                json!({ group.combinator.key(): children })
            }
            ConditionNode::Leaf(cond) => {
                let mut obj = Map::new();
                obj.insert("fact".to_string(), json!(cond.fact));
                obj.insert("operator".to_string(), json!(cond.operator.as_str()));
                obj.insert("value".to_string(), cond.value.to_json());
                if let Some(path) = &cond.path {
                    obj.insert("path".to_string(), json!(path));
                }
                Value::Object(obj)
            }
        }
    }
}

impl From<ConditionNode> for Value {
    fn from(node: ConditionNode) -> Self {
        Value::from(&node)
    }
}

/// 规则命中后产出的事件（动作类型 + 参数）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Map<String, Value>,
}

impl RuleEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// 评估结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationResult {
    pub matched: bool,
    /// 命中时返回规则事件
    pub event: Option<RuleEvent>,
    pub matched_conditions: Vec<String>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_us: u64,
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "conditions": {
                "all": [
                    { "fact": "amount", "operator": "greaterThan", "value": 1000 },
                    {
                        "any": [
                            { "fact": "loan", "path": "$.tenure", "operator": "lessThanInclusive", "value": 12 },
                            { "fact": "amount", "operator": "lessThan", "value": { "fact": "limit" } }
                        ]
                    }
                ]
            },
            "event": { "type": "pricing", "params": { "status": "ok" } },
            "priority": 2
        })
    }

    #[test]
    fn test_parse_document() {
        let doc = RuleDocument::from_value(&sample()).unwrap();
        assert_eq!(doc.priority, Some(2));
        assert_eq!(doc.event.as_ref().unwrap().event_type, "pricing");

        let ConditionNode::Group(root) = &doc.conditions else {
            panic!("根节点应为组");
        };
        assert_eq!(root.combinator, Combinator::All);
        assert_eq!(root.children.len(), 2);

        let ConditionNode::Group(inner) = &root.children[1] else {
            panic!("第二个子节点应为组");
        };
        let ConditionNode::Leaf(by_ref) = &inner.children[1] else {
            panic!("应为叶子节点");
        };
        assert_eq!(
            by_ref.value,
            ValueRef::Fact {
                fact: "limit".to_string(),
                path: None
            }
        );
    }

    #[test]
    fn test_text_and_value_normalize_identically() {
        let text = sample().to_string();
        let from_text = RuleDocument::from_value(&Value::String(text)).unwrap();
        let from_value = RuleDocument::from_value(&sample()).unwrap();
        assert_eq!(from_text, from_value);
    }

    #[test]
    fn test_conditions_round_trip() {
        let doc = RuleDocument::from_value(&sample()).unwrap();
        assert_eq!(doc.to_value()["conditions"], sample()["conditions"]);
    }

    #[test]
    fn test_serde_uses_document_shape() {
        let doc = RuleDocument::from_value(&sample()).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["conditions"], sample()["conditions"]);

        let parsed: RuleDocument = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let value = json!({ "conditions": { "all": [ { "fact": "a", "operator": "approx", "value": 1 } ] } });
        let err = RuleDocument::from_value(&value).unwrap_err();
        assert!(matches!(err, RuleError::UnknownOperator(ref op) if op == "approx"));
    }

    #[test]
    fn test_group_with_both_keys_rejected() {
        let value = json!({ "conditions": { "all": [], "any": [] } });
        assert!(RuleDocument::from_value(&value).is_err());
    }

    #[test]
    fn test_missing_conditions_rejected() {
        let err = RuleDocument::from_value(&json!({ "event": { "type": "x" } })).unwrap_err();
        assert!(err.to_string().contains("conditions"));
    }

    #[test]
    fn test_event_with_null_params() {
        let value = json!({
            "conditions": { "any": [ { "fact": "a", "operator": "equal", "value": 1 } ] },
            "event": { "type": "x", "params": null }
        });
        let doc = RuleDocument::from_value(&value).unwrap();
        assert!(doc.event.unwrap().params.is_empty());
    }
}
