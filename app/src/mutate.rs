use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use storage::backend::AclBackend;
use storage::error::{AclError, AclResult};
use storage::file::read_metadata;

use crate::fallback::PrivilegedTool;
use crate::policy::AccessPolicy;

/// 策略最终落盘的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// 通过后端直接替换ACL
    Direct,
    /// 后端被拒绝，特权工具执行成功
    Fallback,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::Direct => write!(f, "direct"),
            ApplyOutcome::Fallback => write!(f, "privileged fallback"),
        }
    }
}

/// `apply_policy` 阻塞部分的执行结果
struct DirectAttempt {
    attribute: AclResult<()>,
    acl: AclResult<()>,
}

/// 按 `AccessPolicy` 重写文件的ACL和只读属性
#[derive(Clone)]
pub struct Mutator {
    backend: Arc<dyn AclBackend>,
    fallback: Option<Arc<dyn PrivilegedTool>>,
}

impl Mutator {
    pub fn new(backend: Arc<dyn AclBackend>) -> Self {
        Self {
            backend,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, tool: Arc<dyn PrivilegedTool>) -> Self {
        self.fallback = Some(tool);
        self
    }

    /// 将 `path` 切换到 `target` 状态
    ///
    /// 先写只读属性，与ACL互不依赖；再用 `target` 的规范条目整体替换ACL，
    /// 被拒绝时调用一次特权工具。
    ///
    /// 属性写入失败既不回滚也不重试，也不决定结果：只要ACL落盘（直接或经由工具）
    /// 即返回成功，属性不一致仅记录警告。只有直接写入和工具都失败时才返回 `AccessDenied`。
    pub async fn apply_policy(&self, path: &Path, target: AccessPolicy) -> AclResult<ApplyOutcome> {
        let path = read_metadata(path).await?.path;
        log::info!(
            "Applying {} policy to {} via {} backend",
            target,
            path.display(),
            self.backend.name()
        );

        let backend = Arc::clone(&self.backend);
        let entries = target.canonical_entries();
        let target_path = path.clone();
        let attempt = tokio::task::spawn_blocking(move || DirectAttempt {
            attribute: backend.set_read_only(&target_path, target.is_read_only()),
            acl: backend.write_acl(&target_path, &entries),
        })
        .await?;

        if let Err(e) = &attempt.attribute {
            if e.is_not_found() {
                return Err(AclError::NotFound(path.display().to_string()));
            }
            log::warn!("Read-only attribute of {} not updated: {}", path.display(), e);
        }

        let outcome = match attempt.acl {
            Ok(()) => ApplyOutcome::Direct,
            Err(e) if e.is_access_denied() => self.run_fallback(&path, target, e).await?,
            Err(e) => return Err(e),
        };

        if attempt.attribute.is_err() {
            self.warn_on_attribute_mismatch(&path, target).await;
        }

        log::info!("Applied {} policy to {} ({})", target, path.display(), outcome);
        Ok(outcome)
    }

    /// 只记录属性与目标不一致，不影响结果；实际状态由下一次检查呈现
    async fn warn_on_attribute_mismatch(&self, path: &Path, target: AccessPolicy) {
        let backend = Arc::clone(&self.backend);
        let target_path = path.to_path_buf();
        let read_back = tokio::task::spawn_blocking(move || backend.is_read_only(&target_path)).await;
        match read_back {
            Ok(Ok(read_only)) if read_only == target.is_read_only() => {}
            Ok(Ok(read_only)) => log::warn!(
                "Read-only attribute of {} is still {} after applying {}",
                path.display(),
                read_only,
                target
            ),
            Ok(Err(e)) => log::warn!("Read-only attribute of {} unreadable: {}", path.display(), e),
            Err(e) => log::warn!("Read-only attribute check for {} aborted: {}", path.display(), e),
        }
    }

    /// 直接修改被拒绝后调用特权工具，仅尝试一次
    async fn run_fallback(
        &self,
        path: &Path,
        target: AccessPolicy,
        direct_err: AclError,
    ) -> AclResult<ApplyOutcome> {
        let tool = match &self.fallback {
            Some(tool) => tool,
            None => return Err(direct_err),
        };

        log::warn!(
            "Direct ACL update denied ({}), running: {}",
            direct_err,
            tool.describe(path, target)
        );
        match tool.run(path, target).await {
            Ok(()) => Ok(ApplyOutcome::Fallback),
            Err(fallback_err) => {
                log::error!("Privileged fallback failed for {}: {}", path.display(), fallback_err);
                Err(AclError::AccessDenied(format!(
                    "{}; privileged fallback failed: {}",
                    direct_err, fallback_err
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use storage::acl::{AccessControlEntry, Principal};
    use storage::memory::{MemoryBackend, MemoryFile};
    use tempfile::{tempdir, TempDir};

    /// 模拟 icacls：只改ACL，不碰只读属性
    struct AclOnlyTool {
        backend: Arc<MemoryBackend>,
    }

    #[async_trait]
    impl PrivilegedTool for AclOnlyTool {
        fn describe(&self, path: &Path, target: AccessPolicy) -> String {
            format!("acl-only {} {}", path.display(), target)
        }

        async fn run(&self, path: &Path, target: AccessPolicy) -> AclResult<()> {
            self.backend.update(path, |file| {
                file.entries = vec![AccessControlEntry::allow(
                    Principal::everyone(),
                    target.everyone_rights(),
                )];
            })
        }
    }

    fn file_with(state: MemoryFile) -> (TempDir, PathBuf, Arc<MemoryBackend>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(&path, b"a,b").unwrap();
        let backend = Arc::new(MemoryBackend::new());
        backend.insert(&path, state);
        (dir, path, backend)
    }

    #[tokio::test]
    async fn direct_write_applies_attribute_and_acl() {
        let (_dir, path, backend) = file_with(MemoryFile::default());

        let outcome = Mutator::new(backend.clone())
            .apply_policy(&path, AccessPolicy::ReadOnly)
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Direct);
        let stored = backend.get(&path).unwrap();
        assert!(stored.read_only);
        assert_eq!(stored.entries, AccessPolicy::ReadOnly.canonical_entries());
    }

    #[tokio::test]
    async fn fallback_success_with_denied_attribute_is_success() {
        let (_dir, path, backend) = file_with(MemoryFile {
            deny_acl_writes: true,
            deny_attribute_writes: true,
            ..Default::default()
        });
        let tool = Arc::new(AclOnlyTool {
            backend: backend.clone(),
        });

        let outcome = Mutator::new(backend.clone())
            .with_fallback(tool)
            .apply_policy(&path, AccessPolicy::ReadOnly)
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Fallback);
        let stored = backend.get(&path).unwrap();
        assert_eq!(stored.entries.len(), 1);
        assert_eq!(stored.entries[0].to_string(), "Everyone — ReadAndExecute");
        // 属性写入失败不回滚，保持原值
        assert!(!stored.read_only);
    }

    #[tokio::test]
    async fn denied_acl_without_tool_keeps_direct_error() {
        let (_dir, path, backend) = file_with(MemoryFile {
            deny_acl_writes: true,
            ..Default::default()
        });

        let err = Mutator::new(backend)
            .apply_policy(&path, AccessPolicy::Writable)
            .await
            .unwrap_err();

        assert!(err.is_access_denied());
        assert!(err.to_string().contains("ACL write rejected"));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(ApplyOutcome::Direct.to_string(), "direct");
        assert_eq!(ApplyOutcome::Fallback.to_string(), "privileged fallback");
    }
}
