//! 审计事件与评估日志

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::Actor;
use super::enums::EventType;

/// 已持久化的规则事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleEventRecord {
    pub id: i64,
    pub event_type: String,
    /// 所属规则行 ID
    pub aggregate_id: i64,
    pub event_data: Value,
    pub metadata: Value,
    /// 每个 aggregate 内从 1 开始连续递增
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

/// 待追加的规则事件
#[derive(Debug, Clone)]
pub struct NewRuleEvent {
    pub event_type: EventType,
    pub aggregate_id: i64,
    pub event_data: Value,
    pub metadata: Value,
}

impl NewRuleEvent {
    pub fn new(event_type: EventType, aggregate_id: i64, event_data: Value) -> Self {
        Self {
            event_type,
            aggregate_id,
            event_data,
            metadata: json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: &EventMetadata) -> Self {
        self.metadata = metadata.to_value();
        self
    }
}

/// 事件元数据：操作者、角色、链路 ID 与时间
#[derive(Debug, Clone, Serialize)]
pub struct EventMetadata {
    pub actor: String,
    pub role: String,
    pub trace_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(actor: &Actor, trace_id: Uuid) -> Self {
        Self {
            actor: actor.username.clone(),
            role: actor.role.as_str().to_string(),
            trace_id,
            timestamp: Utc::now(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "actor": self.actor,
            "role": self.role,
            "trace_id": self.trace_id,
            "timestamp": self.timestamp,
        })
    }
}

/// 历史记录条目（事件 + 所属规则版本信息）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub event_id: i64,
    pub event_type: String,
    pub rule_id: i64,
    pub rule_name: String,
    pub rule_group_name: String,
    pub version: i32,
    pub sequence_number: i64,
    pub event_data: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// 按规则名聚合的历史
#[derive(Debug, Clone, Serialize)]
pub struct RuleHistory {
    pub rule_name: String,
    pub rule_group_id: i64,
    pub total_events: usize,
    pub history: Vec<HistoryEntry>,
}

/// 评估日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EvaluationLogEntry {
    pub id: i64,
    pub rule_id: i64,
    pub rule_group_id: i64,
    pub input_payload: Value,
    #[sqlx(default)]
    pub result: Option<bool>,
    pub evaluated_by: String,
    pub trace_id: Uuid,
    pub version: i32,
    #[sqlx(default)]
    pub action: Option<String>,
    #[sqlx(default)]
    pub action_type: Option<String>,
    #[sqlx(default)]
    pub action_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的评估日志
#[derive(Debug, Clone)]
pub struct NewEvaluationLog {
    pub rule_id: i64,
    pub rule_group_id: i64,
    pub input_payload: Value,
    pub result: Option<bool>,
    pub evaluated_by: String,
    pub trace_id: Uuid,
    pub version: i32,
    pub action: Option<String>,
    pub action_type: Option<String>,
    pub action_value: Option<Value>,
}
