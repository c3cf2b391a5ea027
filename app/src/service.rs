use std::path::Path;
use std::sync::Arc;
use storage::backend::AclBackend;
use storage::error::AclResult;

use crate::fallback::PrivilegedTool;
use crate::inspect::{Inspection, Inspector};
use crate::mutate::{ApplyOutcome, Mutator};
use crate::policy::AccessPolicy;

/// 策略变更的结果，经重新检查确认
#[derive(Debug, Clone)]
pub struct PolicyChange {
    pub target: AccessPolicy,
    pub outcome: ApplyOutcome,
    pub inspection: Inspection,
}

/// 基于同一后端的检查器和修改器
///
/// 每次调用都传入路径，调用之间不记忆任何状态。
#[derive(Clone)]
pub struct PermissionService {
    inspector: Inspector,
    mutator: Mutator,
}

impl PermissionService {
    pub fn new(backend: Arc<dyn AclBackend>) -> Self {
        Self {
            inspector: Inspector::new(Arc::clone(&backend)),
            mutator: Mutator::new(backend),
        }
    }

    pub fn with_fallback(mut self, tool: Arc<dyn PrivilegedTool>) -> Self {
        self.mutator = self.mutator.with_fallback(tool);
        self
    }

    pub async fn inspect(&self, path: &Path) -> AclResult<Inspection> {
        self.inspector.inspect(path).await
    }

    /// 应用 `target` 后重新检查，调用方据此展示实际落盘的状态
    pub async fn apply(&self, path: &Path, target: AccessPolicy) -> AclResult<PolicyChange> {
        let outcome = self.mutator.apply_policy(path, target).await?;
        let inspection = self.inspector.inspect(path).await?;
        if inspection.effective_writable != target.is_writable() {
            log::warn!(
                "{} reads back as {} after applying {}",
                inspection.path().display(),
                AccessPolicy::from_writable(inspection.effective_writable),
                target
            );
        }
        Ok(PolicyChange {
            target,
            outcome,
            inspection,
        })
    }

    /// 按最新检查结果翻转状态
    pub async fn toggle(&self, path: &Path) -> AclResult<PolicyChange> {
        let current = self.inspector.inspect(path).await?;
        let target = AccessPolicy::from_writable(current.effective_writable).toggled();
        self.apply(path, target).await
    }
}
