use app::prelude::*;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use storage::acl::{AccessControlEntry, Principal, PrincipalKind, Rights};
use storage::error::{AclError, AclResult};
use storage::file::OWNER_NOT_FOUND;
use storage::memory::{MemoryBackend, MemoryFile};
use tempfile::{tempdir, TempDir};

/// 记录调用；可选地像 icacls 那样落下仅含 Everyone 的授权
struct RecordingTool {
    calls: Mutex<Vec<(PathBuf, AccessPolicy)>>,
    succeed: bool,
    lands_on: Option<Arc<MemoryBackend>>,
    sets_attribute: bool,
}

impl RecordingTool {
    fn new(succeed: bool) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            succeed,
            lands_on: None,
            sets_attribute: true,
        }
    }

    fn landing_on(backend: Arc<MemoryBackend>) -> Self {
        Self {
            lands_on: Some(backend),
            ..Self::new(true)
        }
    }

    /// 像 icacls 一样只改ACL，不碰只读属性
    fn keeping_attribute(mut self) -> Self {
        self.sets_attribute = false;
        self
    }

    fn calls(&self) -> Vec<(PathBuf, AccessPolicy)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrivilegedTool for RecordingTool {
    fn describe(&self, path: &Path, target: AccessPolicy) -> String {
        format!("record {} {}", path.display(), target)
    }

    async fn run(&self, path: &Path, target: AccessPolicy) -> AclResult<()> {
        self.calls.lock().unwrap().push((path.to_path_buf(), target));
        if !self.succeed {
            return Err(AclError::AccessDenied("elevation refused".to_string()));
        }
        if let Some(backend) = &self.lands_on {
            backend.update(path, |file| {
                file.entries = vec![AccessControlEntry::allow(
                    Principal::everyone(),
                    target.everyone_rights(),
                )];
                if self.sets_attribute {
                    file.read_only = target.is_read_only();
                }
            })?;
        }
        Ok(())
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A real file on disk whose ACL lives in the memory backend.
fn seeded(state: MemoryFile) -> (TempDir, PathBuf, Arc<MemoryBackend>) {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("report.txt");
    fs::write(&path, b"quarterly numbers").unwrap();

    let backend = Arc::new(MemoryBackend::new());
    backend.insert(&path, state);
    (dir, path, backend)
}

fn writable_file() -> MemoryFile {
    MemoryFile {
        entries: AccessPolicy::Writable.canonical_entries(),
        read_only: false,
        owner: Some("HOST\\alice".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn writable_file_becomes_canonical_read_only() -> AclResult<()> {
    let (_dir, path, backend) = seeded(writable_file());
    let service = PermissionService::new(backend.clone());

    let before = service.inspect(&path).await?;
    assert!(before.effective_writable);

    let change = service.apply(&path, AccessPolicy::ReadOnly).await?;
    assert_eq!(change.outcome, ApplyOutcome::Direct);

    let after = change.inspection;
    assert!(!after.effective_writable);
    assert_eq!(after.read_only, Some(true));
    assert_eq!(
        after.acl.entries().unwrap(),
        &[
            AccessControlEntry::allow(Principal::system(), Rights::FULL_CONTROL),
            AccessControlEntry::allow(Principal::administrators(), Rights::FULL_CONTROL),
            AccessControlEntry::allow(Principal::everyone(), Rights::READ_AND_EXECUTE),
        ][..]
    );
    Ok(())
}

#[tokio::test]
async fn applying_same_policy_twice_is_identical() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile {
        entries: vec![
            AccessControlEntry::allow(Principal::everyone(), Rights::MODIFY).inherited(),
            AccessControlEntry::deny(
                Principal::new("S-1-5-21-9-1001", "HOST\\bob", PrincipalKind::User),
                Rights::WRITE,
            ),
        ],
        ..Default::default()
    });
    let mutator = Mutator::new(backend.clone());

    mutator.apply_policy(&path, AccessPolicy::ReadOnly).await?;
    let once = backend.get(&path).unwrap();
    mutator.apply_policy(&path, AccessPolicy::ReadOnly).await?;
    let twice = backend.get(&path).unwrap();

    assert_eq!(once.entries, twice.entries);
    assert_eq!(once.entries, AccessPolicy::ReadOnly.canonical_entries());
    assert!(twice.entries.iter().all(|e| !e.is_inherited));
    assert_eq!(twice.acl_writes, 2);
    Ok(())
}

#[tokio::test]
async fn round_trip_in_both_directions() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile::default());
    let service = PermissionService::new(backend);

    let change = service.apply(&path, AccessPolicy::ReadOnly).await?;
    assert!(!change.inspection.effective_writable);
    assert_eq!(change.inspection.read_only, Some(true));

    let change = service.apply(&path, AccessPolicy::Writable).await?;
    assert!(change.inspection.effective_writable);
    assert_eq!(change.inspection.read_only, Some(false));
    Ok(())
}

#[tokio::test]
async fn toggle_flips_the_inspected_state() -> AclResult<()> {
    let (_dir, path, backend) = seeded(writable_file());
    let service = PermissionService::new(backend);

    let change = service.toggle(&path).await?;
    assert_eq!(change.target, AccessPolicy::ReadOnly);
    assert!(!change.inspection.effective_writable);

    let change = service.toggle(&path).await?;
    assert_eq!(change.target, AccessPolicy::Writable);
    assert!(change.inspection.effective_writable);
    Ok(())
}

#[tokio::test]
async fn denied_mutation_falls_back_to_privileged_tool() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile {
        deny_acl_writes: true,
        ..writable_file()
    });
    let tool = Arc::new(RecordingTool::landing_on(backend.clone()));
    let service = PermissionService::new(backend.clone()).with_fallback(tool.clone());

    let change = service.apply(&path, AccessPolicy::ReadOnly).await?;

    assert_eq!(change.outcome, ApplyOutcome::Fallback);
    assert_eq!(tool.calls(), vec![(path.clone(), AccessPolicy::ReadOnly)]);
    // Whatever the tool left behind is what the next inspection reports.
    assert!(!change.inspection.effective_writable);
    assert_eq!(
        change.inspection.acl.display_lines(),
        vec!["Everyone — ReadAndExecute"]
    );
    assert_eq!(backend.get(&path).unwrap().acl_writes, 0);
    Ok(())
}

#[tokio::test]
async fn failed_fallback_is_access_denied() {
    let (_dir, path, backend) = seeded(MemoryFile {
        deny_acl_writes: true,
        ..writable_file()
    });
    let tool = Arc::new(RecordingTool::new(false));
    let mutator = Mutator::new(backend.clone()).with_fallback(tool.clone());

    let err = mutator
        .apply_policy(&path, AccessPolicy::ReadOnly)
        .await
        .unwrap_err();

    assert!(err.is_access_denied());
    assert_eq!(tool.calls().len(), 1);
    // The attribute write went through and is not rolled back.
    assert!(backend.get(&path).unwrap().read_only);
}

#[tokio::test]
async fn denied_mutation_without_fallback_is_access_denied() {
    let (_dir, path, backend) = seeded(MemoryFile {
        deny_acl_writes: true,
        ..Default::default()
    });
    let err = Mutator::new(backend)
        .apply_policy(&path, AccessPolicy::Writable)
        .await
        .unwrap_err();
    assert!(err.is_access_denied());
}

#[tokio::test]
async fn fallback_is_not_tried_for_other_errors() {
    let (dir, path, backend) = seeded(writable_file());
    let tool = Arc::new(RecordingTool::new(true));
    let mutator = Mutator::new(backend).with_fallback(tool.clone());

    fs::remove_file(&path).unwrap();
    let err = mutator
        .apply_policy(&path, AccessPolicy::ReadOnly)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(tool.calls().is_empty());
    drop(dir);
}

#[tokio::test]
async fn rejected_attribute_write_does_not_fail_the_change() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile {
        deny_attribute_writes: true,
        ..writable_file()
    });
    let service = PermissionService::new(backend.clone());

    let change = service.apply(&path, AccessPolicy::ReadOnly).await?;

    assert_eq!(change.outcome, ApplyOutcome::Direct);
    let stored = backend.get(&path).unwrap();
    assert_eq!(stored.entries, AccessPolicy::ReadOnly.canonical_entries());
    // 重新检查如实反映未更新的属性
    assert_eq!(change.inspection.read_only, Some(false));
    assert!(!change.inspection.effective_writable);
    Ok(())
}

#[tokio::test]
async fn fallback_without_attribute_change_is_success() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile {
        deny_acl_writes: true,
        deny_attribute_writes: true,
        ..writable_file()
    });
    let tool = Arc::new(RecordingTool::landing_on(backend.clone()).keeping_attribute());
    let service = PermissionService::new(backend.clone()).with_fallback(tool.clone());

    let change = service.apply(&path, AccessPolicy::ReadOnly).await?;

    assert_eq!(change.outcome, ApplyOutcome::Fallback);
    assert_eq!(
        change.inspection.acl.display_lines(),
        vec!["Everyone — ReadAndExecute"]
    );
    assert_eq!(change.inspection.read_only, Some(false));
    Ok(())
}

#[tokio::test]
async fn inspecting_a_deleted_file_is_not_found() {
    let (_dir, path, backend) = seeded(writable_file());
    fs::remove_file(&path).unwrap();

    let err = Inspector::new(backend).inspect(&path).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn unreadable_acl_keeps_the_metadata() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile {
        deny_acl_reads: true,
        read_only: true,
        ..writable_file()
    });

    let inspection = Inspector::new(backend).inspect(&path).await?;

    assert_eq!(inspection.metadata.size_bytes, 17);
    assert_eq!(inspection.metadata.owner_display(), "HOST\\alice");
    let lines = inspection.acl.display_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("permissions could not be read:"));
    assert!(!inspection.effective_writable);
    Ok(())
}

#[tokio::test]
async fn dry_run_copy_of_unreadable_acl_still_inspects() -> AclResult<()> {
    let (_dir, path, source) = seeded(MemoryFile {
        deny_acl_reads: true,
        ..writable_file()
    });
    let snapshot = MemoryBackend::snapshot_of(source.as_ref(), &path)?;

    let inspection = Inspector::new(Arc::new(snapshot)).inspect(&path).await?;

    assert!(inspection.acl.entries().is_none());
    let lines = inspection.acl.display_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("permissions could not be read:"));
    assert_eq!(inspection.metadata.size_bytes, 17);
    Ok(())
}

#[tokio::test]
async fn unresolved_owner_uses_sentinel() -> AclResult<()> {
    let (_dir, path, backend) = seeded(MemoryFile::default());

    let inspection = Inspector::new(backend).inspect(&path).await?;

    assert_eq!(inspection.metadata.owner_display(), OWNER_NOT_FOUND);
    assert!(inspection.notes.iter().any(|n| n.contains("owner")));
    Ok(())
}

#[tokio::test]
async fn external_acl_change_is_picked_up() -> AclResult<()> {
    let (_dir, path, backend) = seeded(writable_file());
    let inspector = Inspector::new(backend.clone());

    assert!(inspector.inspect(&path).await?.effective_writable);

    backend.update(&path, |file| {
        file.entries
            .push(AccessControlEntry::deny(Principal::everyone(), Rights::WRITE));
    })?;

    assert!(!inspector.inspect(&path).await?.effective_writable);
    Ok(())
}

#[tokio::test]
async fn inspection_serializes_for_json_output() -> AclResult<()> {
    let (_dir, path, backend) = seeded(writable_file());
    let inspection = Inspector::new(backend).inspect(&path).await?;

    let value = serde_json::to_value(&inspection).unwrap();
    assert_eq!(value["metadata"]["size_bytes"], 17);
    assert_eq!(value["acl"]["status"], "entries");
    assert_eq!(value["acl"]["value"].as_array().unwrap().len(), 3);
    assert_eq!(value["effective_writable"], true);
    Ok(())
}

#[cfg(unix)]
mod posix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use storage::posix::PosixBackend;

    #[tokio::test]
    async fn real_file_round_trip() -> AclResult<()> {
        init_logging();
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.txt");
        fs::write(&path, b"numbers").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        let service = PermissionService::new(Arc::new(PosixBackend::new()));
        assert!(service.inspect(&path).await?.effective_writable);

        let change = service.apply(&path, AccessPolicy::ReadOnly).await?;
        assert!(!change.inspection.effective_writable);
        assert_eq!(change.inspection.read_only, Some(true));
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o555);

        let change = service.apply(&path, AccessPolicy::Writable).await?;
        assert!(change.inspection.effective_writable);
        assert_eq!(change.inspection.read_only, Some(false));
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o777);
        Ok(())
    }
}
