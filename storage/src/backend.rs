use std::path::Path;
use std::sync::Arc;

use crate::acl::AccessControlEntry;
use crate::error::{AclError, AclResult};

/// Blocking access to one platform's access-control table.
///
/// Implementations are called from `spawn_blocking`, so they may issue
/// ordinary blocking OS calls.
pub trait AclBackend: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    /// Explicit and inherited entries, in the order the OS keeps them.
    fn read_acl(&self, path: &Path) -> AclResult<Vec<AccessControlEntry>>;

    /// Replace the whole ACL with `entries` and stop inheritance from the parent.
    fn write_acl(&self, path: &Path, entries: &[AccessControlEntry]) -> AclResult<()>;

    /// Best-effort `DOMAIN\name` of the owner; `None` when it cannot be resolved.
    fn owner(&self, path: &Path) -> Option<String>;

    fn is_read_only(&self, path: &Path) -> AclResult<bool> {
        let metadata = std::fs::metadata(path).map_err(|e| AclError::from_io(e, path))?;
        Ok(metadata.permissions().readonly())
    }

    fn set_read_only(&self, path: &Path, read_only: bool) -> AclResult<()> {
        let metadata = std::fs::metadata(path).map_err(|e| AclError::from_io(e, path))?;
        let mut permissions = metadata.permissions();
        if permissions.readonly() == read_only {
            return Ok(());
        }
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(read_only);
        std::fs::set_permissions(path, permissions).map_err(|e| AclError::from_io(e, path))
    }
}

/// Backend for the platform this binary was built for.
pub fn default_backend() -> Arc<dyn AclBackend> {
    #[cfg(windows)]
    {
        Arc::new(crate::windows::WindowsBackend::new())
    }
    #[cfg(unix)]
    {
        Arc::new(crate::posix::PosixBackend::new())
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(crate::memory::MemoryBackend::new())
    }
}
