//! 规则目录存储抽象
//!
//! 所有写操作都在一个 [`CatalogTx`] 内完成：要么全部提交，要么全部回滚。
//! 提供 PostgreSQL 与内存两种实现。

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    DictionaryScope, DraftContent, EvaluationLogEntry, HistoryEntry, NewEvaluationLog, NewRule,
    NewRuleEvent, NewRuleGroup, PageRequest, ParameterDef, ParameterSpec, Review, Rule,
    RuleDraft, RuleEventRecord, RuleFilter, RuleGroup, RuleStatus, TagDef, TagSpec,
};

pub use memory::MemoryCatalogStore;
pub use postgres::PgCatalogStore;

/// 存储入口，只负责开启事务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>>;
}

/// 一个存储事务
///
/// 丢弃未提交的事务等同于回滚。
#[async_trait]
pub trait CatalogTx: Send {
    // ==================== 规则组 ====================

    async fn get_rule_group(&mut self, group_id: i64) -> Result<Option<RuleGroup>>;

    async fn find_rule_group_by_name(&mut self, name: &str) -> Result<Option<RuleGroup>>;

    async fn insert_rule_group(&mut self, group: &NewRuleGroup) -> Result<RuleGroup>;

    /// 按名称模糊搜索，created_at 倒序
    async fn list_rule_groups(
        &mut self,
        search: Option<&str>,
        page: &PageRequest,
    ) -> Result<(Vec<RuleGroup>, i64)>;

    // ==================== 草稿 ====================

    async fn get_draft(&mut self, draft_id: i64) -> Result<Option<RuleDraft>>;

    async fn insert_draft(&mut self, content: &DraftContent) -> Result<RuleDraft>;

    /// 仅更新 drafted 状态的草稿，否则返回 None
    async fn update_draft(
        &mut self,
        draft_id: i64,
        content: &DraftContent,
    ) -> Result<Option<RuleDraft>>;

    /// drafted -> submitted，状态不符时返回 false
    async fn mark_draft_submitted(&mut self, draft_id: i64, actor: &str) -> Result<bool>;

    /// 删除草稿的全部参数、标签映射
    async fn clear_draft_links(&mut self, draft_id: i64) -> Result<()>;

    // ==================== 字典 ====================

    /// 按名称写入参数定义，`strict` 见 [`crate::models::decide_upsert`]
    async fn upsert_parameter(
        &mut self,
        scope: DictionaryScope,
        spec: &ParameterSpec,
        actor: &str,
        strict: bool,
    ) -> Result<ParameterDef>;

    async fn upsert_tag(
        &mut self,
        scope: DictionaryScope,
        spec: &TagSpec,
        actor: &str,
        strict: bool,
    ) -> Result<TagDef>;

    /// 已存在的映射保持不变
    async fn link_parameter(
        &mut self,
        scope: DictionaryScope,
        owner_id: i64,
        parameter_id: i64,
    ) -> Result<()>;

    async fn link_tag(&mut self, scope: DictionaryScope, owner_id: i64, tag_id: i64) -> Result<()>;

    /// 按名称排序
    async fn parameters_of(
        &mut self,
        scope: DictionaryScope,
        owner_id: i64,
    ) -> Result<Vec<ParameterDef>>;

    async fn tags_of(&mut self, scope: DictionaryScope, owner_id: i64) -> Result<Vec<TagDef>>;

    /// 把 from 规则的参数映射并入 to 规则
    async fn copy_parameter_links(&mut self, from_rule_id: i64, to_rule_id: i64) -> Result<()>;

    async fn copy_tag_links(&mut self, from_rule_id: i64, to_rule_id: i64) -> Result<()>;

    // ==================== 规则版本 ====================

    async fn insert_rule(&mut self, rule: &NewRule) -> Result<Rule>;

    async fn get_rule(&mut self, group_id: i64, rule_id: i64) -> Result<Option<Rule>>;

    /// 读取并锁定规则行直到事务结束
    async fn lock_rule(&mut self, group_id: i64, rule_id: i64) -> Result<Option<Rule>>;

    /// 在 is_active 行中查找指定版本
    async fn find_version(
        &mut self,
        group_id: i64,
        name: &str,
        version: i32,
    ) -> Result<Option<Rule>>;

    /// 同组同名的当前最新版本
    async fn find_latest(&mut self, group_id: i64, name: &str) -> Result<Option<Rule>>;

    async fn max_version(&mut self, group_id: i64, name: &str) -> Result<Option<i32>>;

    async fn set_latest(&mut self, rule_id: i64, is_latest: bool, actor: &str) -> Result<()>;

    /// 仅对 PENDING 行生效，否则返回 None
    async fn review_rule(
        &mut self,
        group_id: i64,
        rule_id: i64,
        review: &Review,
    ) -> Result<Option<Rule>>;

    /// is_latest 且 is_active 的规则，created_at 倒序
    async fn list_rules(
        &mut self,
        group_id: i64,
        filter: &RuleFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Rule>, i64)>;

    async fn list_rules_by_status(
        &mut self,
        group_id: Option<i64>,
        status: RuleStatus,
    ) -> Result<Vec<Rule>>;

    /// is_latest、APPROVED 且所属规则组启用
    async fn evaluation_candidates(&mut self, group_id: i64) -> Result<Vec<Rule>>;

    async fn active_rules(&mut self, group_id: i64) -> Result<Vec<Rule>>;

    // ==================== 事件与评估日志 ====================

    /// sequence_number 取该 aggregate 当前最大值 + 1
    async fn append_event(&mut self, event: &NewRuleEvent) -> Result<RuleEventRecord>;

    /// 同组同名规则所有版本的事件，created_at、sequence_number 倒序
    async fn events_for_rule_name(
        &mut self,
        group_id: i64,
        name: &str,
        version: Option<i32>,
    ) -> Result<Vec<HistoryEntry>>;

    async fn insert_evaluation_log(&mut self, log: &NewEvaluationLog)
    -> Result<EvaluationLogEntry>;

    async fn evaluation_logs(&mut self, trace_id: Uuid) -> Result<Vec<EvaluationLogEntry>>;

    // ==================== 事务控制 ====================

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
