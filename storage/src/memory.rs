//! In-memory ACL table.
//!
//! Entries are stored verbatim, so whatever a caller writes is exactly what
//! it reads back. Used for dry runs and for exercising the policy code
//! without touching real security descriptors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::acl::AccessControlEntry;
use crate::backend::AclBackend;
use crate::error::{AclError, AclResult};

/// State kept for one path
#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    pub entries: Vec<AccessControlEntry>,
    pub read_only: bool,
    pub owner: Option<String>,
    /// Reject `read_acl` with `AccessDenied`
    pub deny_acl_reads: bool,
    /// Reject `write_acl` with `AccessDenied`
    pub deny_acl_writes: bool,
    /// Reject `set_read_only` with `AccessDenied`
    pub deny_attribute_writes: bool,
    /// Number of successful `write_acl` calls
    pub acl_writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current state of `path` out of another backend.
    ///
    /// An ACL the source refuses to read stays unreadable in the copy.
    pub fn snapshot_of(source: &dyn AclBackend, path: &Path) -> AclResult<Self> {
        let (entries, deny_acl_reads) = match source.read_acl(path) {
            Ok(entries) => (entries, false),
            Err(e) if e.is_access_denied() => {
                log::debug!("Snapshot of {} keeps ACL unreadable: {}", path.display(), e);
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };
        let file = MemoryFile {
            entries,
            deny_acl_reads,
            read_only: source.is_read_only(path)?,
            owner: source.owner(path),
            ..Default::default()
        };
        let backend = Self::new();
        backend.insert(path, file);
        Ok(backend)
    }

    pub fn insert(&self, path: impl Into<PathBuf>, file: MemoryFile) {
        self.lock().insert(path.into(), file);
    }

    pub fn get(&self, path: &Path) -> Option<MemoryFile> {
        self.lock().get(path).cloned()
    }

    pub fn remove(&self, path: &Path) -> Option<MemoryFile> {
        self.lock().remove(path)
    }

    /// Apply `f` to the stored state of `path`.
    pub fn update<F>(&self, path: &Path, f: F) -> AclResult<()>
    where
        F: FnOnce(&mut MemoryFile),
    {
        let mut files = self.lock();
        let file = files
            .get_mut(path)
            .ok_or_else(|| AclError::NotFound(path.display().to_string()))?;
        f(file);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, MemoryFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_file<T, F>(&self, path: &Path, f: F) -> AclResult<T>
    where
        F: FnOnce(&mut MemoryFile) -> AclResult<T>,
    {
        let mut files = self.lock();
        match files.get_mut(path) {
            Some(file) => f(file),
            None => Err(AclError::NotFound(path.display().to_string())),
        }
    }
}

fn denied(path: &Path, what: &str) -> AclError {
    AclError::AccessDenied(format!("{}: {} rejected", path.display(), what))
}

impl AclBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read_acl(&self, path: &Path) -> AclResult<Vec<AccessControlEntry>> {
        self.with_file(path, |file| {
            if file.deny_acl_reads {
                return Err(denied(path, "ACL read"));
            }
            Ok(file.entries.clone())
        })
    }

    fn write_acl(&self, path: &Path, entries: &[AccessControlEntry]) -> AclResult<()> {
        self.with_file(path, |file| {
            if file.deny_acl_writes {
                return Err(denied(path, "ACL write"));
            }
            file.entries = entries.to_vec();
            file.acl_writes += 1;
            Ok(())
        })
    }

    fn owner(&self, path: &Path) -> Option<String> {
        self.get(path).and_then(|file| file.owner)
    }

    fn is_read_only(&self, path: &Path) -> AclResult<bool> {
        self.with_file(path, |file| Ok(file.read_only))
    }

    fn set_read_only(&self, path: &Path, read_only: bool) -> AclResult<()> {
        self.with_file(path, |file| {
            if file.deny_attribute_writes {
                return Err(denied(path, "attribute write"));
            }
            file.read_only = read_only;
            Ok(())
        })
    }
}
