//! 编译规则缓存
//!
//! 规则版本行一经创建就不再修改条件树，因此可以按行 ID 永久缓存编译结果。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// 编译规则缓存
#[derive(Clone)]
pub struct RuleCache {
    rules: Arc<DashMap<i64, Arc<CompiledRule>>>,
    compiler: RuleCompiler,
}

impl RuleCache {
    pub fn new(compiler: RuleCompiler) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            compiler,
        }
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    /// 取缓存或编译；编译失败不写入缓存
    pub fn get_or_compile(&self, rule_id: i64, payload: &Value) -> Result<Arc<CompiledRule>> {
        if let Some(hit) = self.rules.get(&rule_id) {
            return Ok(Arc::clone(hit.value()));
        }

        let compiled = Arc::new(self.compiler.compile_value(payload)?);
        debug!(rule_id, facts = compiled.fact_names.len(), "规则已编译并缓存");
        self.rules.insert(rule_id, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn clear(&self) {
        self.rules.clear();
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new(RuleCompiler::new())
    }
}
