//! POSIX mode bits presented as an access-control list.
//!
//! The owning user, the owning group and "other" each become one entry. The
//! superuser bypasses mode checks, so it is listed as an implicit
//! FullControl entry and never needs to be written.

use nix::unistd::{Gid, Group, Uid, User};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use crate::acl::{AccessControlEntry, Principal, PrincipalKind, Rights};
use crate::backend::AclBackend;
use crate::error::{AclError, AclResult};

const ROOT_UID: u32 = 0;
const ROOT_GID: u32 = 0;

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

impl PosixBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Rights carried by one `rwx` triplet.
pub fn rights_from_triplet(bits: u32) -> Rights {
    let mut rights = Rights::empty();
    if bits & 0o4 != 0 {
        rights |= Rights::READ;
    }
    if bits & 0o2 != 0 {
        rights |= Rights::WRITE;
    }
    if bits & 0o1 != 0 {
        rights |= Rights::EXECUTE;
    }
    rights
}

/// `rwx` triplet for a set of rights; rights without a mode bit are dropped.
pub fn triplet_from_rights(rights: Rights) -> u32 {
    let mut bits = 0;
    if rights.contains(Rights::READ) {
        bits |= 0o4;
    }
    if rights.contains(Rights::WRITE) {
        bits |= 0o2;
    }
    if rights.contains(Rights::EXECUTE) {
        bits |= 0o1;
    }
    bits
}

/// Permission bits for a full ACL replacement.
///
/// Privileged grants are implicit for the superuser. Every non-privileged
/// class gets the same triplet: the union of non-privileged allows minus
/// the union of non-privileged denies.
pub fn mode_for_entries(entries: &[AccessControlEntry]) -> u32 {
    let mut allowed = Rights::empty();
    let mut denied = Rights::empty();
    for entry in entries.iter().filter(|e| !e.principal.is_privileged()) {
        if entry.is_allow() {
            allowed |= entry.rights;
        } else {
            denied |= entry.rights;
        }
    }

    let triplet = triplet_from_rights(allowed - denied);
    (triplet << 6) | (triplet << 3) | triplet
}

fn user_name(uid: u32) -> Option<String> {
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
}

fn group_name(gid: u32) -> Option<String> {
    Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name)
}

fn root_principal() -> Principal {
    Principal::new(
        format!("uid:{}", ROOT_UID),
        user_name(ROOT_UID).unwrap_or_else(|| "root".to_string()),
        PrincipalKind::System,
    )
}

impl AclBackend for PosixBackend {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn read_acl(&self, path: &Path) -> AclResult<Vec<AccessControlEntry>> {
        let metadata = std::fs::metadata(path).map_err(|e| AclError::from_io(e, path))?;
        let mode = metadata.mode();
        let (uid, gid) = (metadata.uid(), metadata.gid());

        let mut entries = Vec::with_capacity(4);

        if uid != ROOT_UID {
            entries.push(AccessControlEntry::allow(root_principal(), Rights::FULL_CONTROL));
        }

        let owner_kind = if uid == ROOT_UID {
            PrincipalKind::System
        } else {
            PrincipalKind::User
        };
        let owner = Principal::new(
            format!("uid:{}", uid),
            user_name(uid).unwrap_or_else(|| uid.to_string()),
            owner_kind,
        );
        entries.push(AccessControlEntry::allow(owner, rights_from_triplet(mode >> 6)));

        let group_kind = if gid == ROOT_GID {
            PrincipalKind::Administrators
        } else {
            PrincipalKind::Group
        };
        let group = Principal::new(
            format!("gid:{}", gid),
            group_name(gid).unwrap_or_else(|| gid.to_string()),
            group_kind,
        );
        entries.push(AccessControlEntry::allow(group, rights_from_triplet(mode >> 3)));

        entries.push(AccessControlEntry::allow(
            Principal::everyone(),
            rights_from_triplet(mode),
        ));

        Ok(entries)
    }

    fn write_acl(&self, path: &Path, entries: &[AccessControlEntry]) -> AclResult<()> {
        let mode = mode_for_entries(entries);
        log::debug!("posix: chmod {:o} {}", mode, path.display());
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| AclError::from_io(e, path))
    }

    fn owner(&self, path: &Path) -> Option<String> {
        let metadata = std::fs::metadata(path).ok()?;
        let name = user_name(metadata.uid())?;
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok());
        Some(match host {
            Some(host) => format!("{}\\{}", host, name),
            None => name,
        })
    }
}
