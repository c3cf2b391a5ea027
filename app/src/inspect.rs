use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::acl::{AccessControlEntry, PrincipalKind};
use storage::backend::AclBackend;
use storage::error::{AclError, AclResult};
use storage::file::{read_metadata, FileMetadata};

/// 判断系统/管理员之外是否有人可写该文件
///
/// 对非特权主体授予 Write、Modify 或 FullControl 的 Allow 条目使文件可写，
/// 除非同一主体另有覆盖 Write 的 Deny 条目。Everyone 上的 Deny 覆盖所有非特权主体。
pub fn effective_writable(entries: &[AccessControlEntry]) -> bool {
    let denies_write = |entry: &&AccessControlEntry| !entry.is_allow() && entry.rights.grants_write();

    if entries
        .iter()
        .filter(denies_write)
        .any(|deny| deny.principal.kind == PrincipalKind::Everyone)
    {
        return false;
    }

    entries
        .iter()
        .filter(|e| e.is_allow() && !e.principal.is_privileged() && e.rights.grants_write())
        .any(|allow| {
            !entries
                .iter()
                .filter(denies_write)
                .any(|deny| deny.principal.sid == allow.principal.sid)
        })
}

/// 读取到的ACL
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum AclListing {
    Entries(Vec<AccessControlEntry>),
    /// ACL不可读，保存原因
    Unreadable(String),
}

impl AclListing {
    pub fn entries(&self) -> Option<&[AccessControlEntry]> {
        match self {
            AclListing::Entries(entries) => Some(entries),
            AclListing::Unreadable(_) => None,
        }
    }

    /// 每个条目一行；ACL不可读时只有一行诊断信息
    pub fn display_lines(&self) -> Vec<String> {
        match self {
            AclListing::Entries(entries) => entries.iter().map(|e| e.to_string()).collect(),
            AclListing::Unreadable(reason) => {
                vec![format!("permissions could not be read: {}", reason)]
            }
        }
    }
}

/// 单个路径的检查结果
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub metadata: FileMetadata,
    pub acl: AclListing,
    /// 系统只读属性，读取失败时为 `None`
    pub read_only: Option<bool>,
    /// 决定界面上显示的开关状态
    pub effective_writable: bool,
    /// 非致命的降级信息，例如无法解析所有者
    pub notes: Vec<String>,
}

impl Inspection {
    pub fn path(&self) -> &Path {
        &self.metadata.path
    }
}

/// 后端能提供的单个路径信息
struct AclProbe {
    acl: AclResult<Vec<AccessControlEntry>>,
    read_only: AclResult<bool>,
    owner: Option<String>,
}

impl AclProbe {
    fn collect(backend: &dyn AclBackend, path: &Path) -> Self {
        Self {
            acl: backend.read_acl(path),
            read_only: backend.is_read_only(path),
            owner: backend.owner(path),
        }
    }
}

/// 读取路径的元数据和ACL，调用之间不保存状态
#[derive(Clone)]
pub struct Inspector {
    backend: Arc<dyn AclBackend>,
}

impl Inspector {
    pub fn new(backend: Arc<dyn AclBackend>) -> Self {
        Self { backend }
    }

    pub async fn inspect(&self, path: &Path) -> AclResult<Inspection> {
        let metadata = read_metadata(path).await?;
        log::debug!(
            "Inspecting {} with {} backend",
            metadata.path.display(),
            self.backend.name()
        );

        let backend = Arc::clone(&self.backend);
        let target: PathBuf = metadata.path.clone();
        let probe =
            tokio::task::spawn_blocking(move || AclProbe::collect(backend.as_ref(), &target))
                .await?;

        let mut notes = Vec::new();

        let acl = match probe.acl {
            Ok(entries) => AclListing::Entries(entries),
            Err(AclError::NotFound(p)) => return Err(AclError::NotFound(p)),
            Err(e) => {
                log::warn!("ACL of {} is unreadable: {}", metadata.path.display(), e);
                AclListing::Unreadable(e.to_string())
            }
        };

        let read_only = match probe.read_only {
            Ok(value) => Some(value),
            Err(AclError::NotFound(p)) => return Err(AclError::NotFound(p)),
            Err(e) => {
                let note = AclError::PartialMetadata(format!("read-only attribute: {}", e));
                notes.push(note.to_string());
                None
            }
        };

        let metadata = metadata.with_owner(probe.owner);
        for field in metadata.missing_fields() {
            notes.push(AclError::PartialMetadata(field.to_string()).to_string());
        }

        // With no ACL to evaluate, the attribute is the only signal left.
        let effective_writable = match acl.entries() {
            Some(entries) => effective_writable(entries),
            None => read_only.map(|ro| !ro).unwrap_or(false),
        };

        Ok(Inspection {
            metadata,
            acl,
            read_only,
            effective_writable,
            notes,
        })
    }
}
