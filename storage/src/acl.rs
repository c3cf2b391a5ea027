//! Access-control entry model shared by every backend.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known SID of the local system account
pub const SID_LOCAL_SYSTEM: &str = "S-1-5-18";
/// Well-known SID of the builtin administrators group
pub const SID_ADMINISTRATORS: &str = "S-1-5-32-544";
/// Well-known SID of the world group
pub const SID_EVERYONE: &str = "S-1-1-0";

bitflags! {
    /// File rights carried by one entry.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct Rights: u16 {
        const READ = 0x01;
        const WRITE = 0x02;
        const EXECUTE = 0x04;
        const DELETE = 0x08;
        const CHANGE_PERMISSIONS = 0x10;
        const TAKE_OWNERSHIP = 0x20;

        const READ_AND_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
        const MODIFY = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits() | Self::DELETE.bits();
        const FULL_CONTROL = Self::MODIFY.bits() | Self::CHANGE_PERMISSIONS.bits() | Self::TAKE_OWNERSHIP.bits();
    }
}

impl Rights {
    /// True for Write, Modify and FullControl alike.
    pub fn grants_write(self) -> bool {
        self.contains(Rights::WRITE)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }

        let mut names = Vec::new();
        let mut rest = *self;
        for (name, composite) in [
            ("FullControl", Rights::FULL_CONTROL),
            ("Modify", Rights::MODIFY),
            ("ReadAndExecute", Rights::READ_AND_EXECUTE),
        ] {
            if rest.contains(composite) {
                names.push(name);
                rest.remove(composite);
            }
        }
        for (name, bit) in [
            ("Read", Rights::READ),
            ("Write", Rights::WRITE),
            ("Execute", Rights::EXECUTE),
            ("Delete", Rights::DELETE),
            ("ChangePermissions", Rights::CHANGE_PERMISSIONS),
            ("TakeOwnership", Rights::TAKE_OWNERSHIP),
        ] {
            if rest.contains(bit) {
                names.push(name);
            }
        }

        write!(f, "{}", names.join(", "))
    }
}

/// Principal classification used by the writability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalKind {
    System,
    Administrators,
    Everyone,
    User,
    Group,
}

impl PrincipalKind {
    pub fn is_privileged(self) -> bool {
        matches!(self, PrincipalKind::System | PrincipalKind::Administrators)
    }

    /// Kind implied by a well-known SID, if any.
    pub fn from_well_known_sid(sid: &str) -> Option<Self> {
        match sid {
            SID_LOCAL_SYSTEM => Some(PrincipalKind::System),
            SID_ADMINISTRATORS => Some(PrincipalKind::Administrators),
            SID_EVERYONE => Some(PrincipalKind::Everyone),
            _ => None,
        }
    }
}

/// Security identifier plus display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub sid: String,
    pub name: String,
    pub kind: PrincipalKind,
}

impl Principal {
    pub fn new(sid: impl Into<String>, name: impl Into<String>, kind: PrincipalKind) -> Self {
        Self {
            sid: sid.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn system() -> Self {
        Self::new(SID_LOCAL_SYSTEM, "NT AUTHORITY\\SYSTEM", PrincipalKind::System)
    }

    pub fn administrators() -> Self {
        Self::new(SID_ADMINISTRATORS, "BUILTIN\\Administrators", PrincipalKind::Administrators)
    }

    pub fn everyone() -> Self {
        Self::new(SID_EVERYONE, "Everyone", PrincipalKind::Everyone)
    }

    pub fn is_privileged(&self) -> bool {
        self.kind.is_privileged()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// ACE effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AceEffect {
    Allow,
    Deny,
}

/// One access-control rule, in the order the OS returned it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub principal: Principal,
    pub rights: Rights,
    pub effect: AceEffect,
    pub is_inherited: bool,
}

impl AccessControlEntry {
    pub fn allow(principal: Principal, rights: Rights) -> Self {
        Self {
            principal,
            rights,
            effect: AceEffect::Allow,
            is_inherited: false,
        }
    }

    pub fn deny(principal: Principal, rights: Rights) -> Self {
        Self {
            principal,
            rights,
            effect: AceEffect::Deny,
            is_inherited: false,
        }
    }

    pub fn inherited(mut self) -> Self {
        self.is_inherited = true;
        self
    }

    pub fn is_allow(&self) -> bool {
        self.effect == AceEffect::Allow
    }
}

/// `"<principal> — <rights>"`, tagged for deny and inherited entries.
impl fmt::Display for AccessControlEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {}", self.principal, self.rights)?;
        if self.effect == AceEffect::Deny {
            write!(f, " (deny)")?;
        }
        if self.is_inherited {
            write!(f, " (inherited)")?;
        }
        Ok(())
    }
}
