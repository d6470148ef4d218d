//! 写操作命令
//!
//! 每个命令的执行流程固定为：
//! 1. `validate()`：只检查输入，不访问存储
//! 2. 角色检查
//! 3. 开启事务并 `execute()`
//! 4. 成功提交，任何错误回滚
//!
//! 命令本身不提交也不回滚，事务边界统一由 [`CommandRunner`] 控制。

mod draft;
mod evaluate;
mod group;
mod review;
mod rollback;
mod version;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rulebook_shared::config::CatalogConfig;
use rulebook_shared::observability::metrics::record_command;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{CatalogError, Result};
use crate::evaluation::EvaluationEngine;
use crate::models::{Actor, EventMetadata, Role};
use crate::store::{CatalogStore, CatalogTx};

pub use draft::{SaveDraft, SubmitDraft};
pub use evaluate::{BatchOutcome, EvaluateBatch, RecordOutcome};
pub use group::CreateRuleGroup;
pub use review::{ApproveRule, RejectRule};
pub use rollback::{DEFAULT_ROLLBACK_REASON, RollbackOutcome, RollbackRule};
pub use version::{CreateVersion, VersionOutcome};

/// 命令执行上下文
pub struct CommandContext<'a> {
    pub actor: &'a Actor,
    /// 同一次命令内所有事件与日志共享
    pub trace_id: Uuid,
    pub settings: &'a CatalogConfig,
    pub engine: &'a EvaluationEngine,
}

impl CommandContext<'_> {
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata::new(self.actor, self.trace_id)
    }
}

/// 原子执行的写命令
#[async_trait]
pub trait Command: fmt::Debug + Send + Sync {
    type Output: Send;

    /// 命令名，用于日志与指标
    const NAME: &'static str;

    /// 为 None 时任何已认证的操作者都可以执行
    fn required_role(&self) -> Option<Role> {
        None
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        tx: &mut dyn CatalogTx,
        ctx: &CommandContext<'_>,
    ) -> Result<Self::Output>;
}

/// 命令执行器
#[derive(Clone)]
pub struct CommandRunner {
    store: Arc<dyn CatalogStore>,
    settings: CatalogConfig,
    engine: Arc<EvaluationEngine>,
}

impl CommandRunner {
    pub fn new(store: Arc<dyn CatalogStore>, settings: CatalogConfig) -> Self {
        let engine = Arc::new(EvaluationEngine::new(settings.max_condition_depth));
        Self {
            store,
            settings,
            engine,
        }
    }

    pub fn store(&self) -> &dyn CatalogStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &CatalogConfig {
        &self.settings
    }

    pub fn engine(&self) -> &EvaluationEngine {
        &self.engine
    }

    /// 执行命令
    #[instrument(
        skip(self, command, actor),
        fields(command = C::NAME, actor = %actor.username, role = %actor.role, trace_id = tracing::field::Empty)
    )]
    pub async fn run<C: Command>(&self, command: &C, actor: &Actor) -> Result<C::Output> {
        let result = self.run_inner(command, actor).await;

        match &result {
            Ok(_) => record_command(C::NAME, "success"),
            Err(e) => {
                record_command(C::NAME, e.outcome());
                if e.is_client_error() {
                    warn!(error = %e, "命令被拒绝");
                } else {
                    warn!(error = %e, "命令执行失败，事务已回滚");
                }
            }
        }
        result
    }

    async fn run_inner<C: Command>(&self, command: &C, actor: &Actor) -> Result<C::Output> {
        command.validate()?;

        if let Some(role) = command.required_role()
            && actor.role != role
        {
            return Err(CatalogError::Authorization(format!(
                "{} 需要 {role} 角色，当前为 {}",
                C::NAME,
                actor.role
            )));
        }

        let ctx = CommandContext {
            actor,
            trace_id: Uuid::now_v7(),
            settings: &self.settings,
            engine: &self.engine,
        };
        tracing::Span::current().record("trace_id", tracing::field::display(ctx.trace_id));

        let mut tx = self.store.begin().await?;
        match command.execute(tx.as_mut(), &ctx).await {
            Ok(output) => {
                tx.commit().await?;
                info!(command = C::NAME, "命令执行成功");
                Ok(output)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "事务回滚失败");
                }
                Err(e)
            }
        }
    }
}

/// 校验必填文本字段
pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CatalogError::Validation(format!("{field} 不能为空")));
    }
    Ok(())
}
