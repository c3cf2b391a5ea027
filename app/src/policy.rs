use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storage::acl::{AccessControlEntry, Principal, Rights};
use thiserror::Error;

/// 文件可在其间切换的两种权限状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    ReadOnly,
    Writable,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown policy '{0}', expected 'read-only' or 'writable'")]
pub struct ParsePolicyError(String);

impl AccessPolicy {
    pub fn from_writable(writable: bool) -> Self {
        if writable {
            AccessPolicy::Writable
        } else {
            AccessPolicy::ReadOnly
        }
    }

    pub fn is_read_only(self) -> bool {
        self == AccessPolicy::ReadOnly
    }

    pub fn is_writable(self) -> bool {
        self == AccessPolicy::Writable
    }

    pub fn toggled(self) -> Self {
        match self {
            AccessPolicy::ReadOnly => AccessPolicy::Writable,
            AccessPolicy::Writable => AccessPolicy::ReadOnly,
        }
    }

    /// 授予系统/管理员之外所有人的权限
    pub fn everyone_rights(self) -> Rights {
        match self {
            AccessPolicy::ReadOnly => Rights::READ | Rights::READ_AND_EXECUTE,
            AccessPolicy::Writable => Rights::FULL_CONTROL,
        }
    }

    /// 该策略对应的完整ACL
    ///
    /// 只取决于 `self`：应用时整体替换原有条目，结果与文件之前的ACL无关。
    /// 两种状态下系统和管理员都保留 FullControl。
    pub fn canonical_entries(self) -> Vec<AccessControlEntry> {
        vec![
            AccessControlEntry::allow(Principal::system(), Rights::FULL_CONTROL),
            AccessControlEntry::allow(Principal::administrators(), Rights::FULL_CONTROL),
            AccessControlEntry::allow(Principal::everyone(), self.everyone_rights()),
        ]
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPolicy::ReadOnly => write!(f, "read-only"),
            AccessPolicy::Writable => write!(f, "writable"),
        }
    }
}

impl FromStr for AccessPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read-only" | "readonly" | "ro" => Ok(AccessPolicy::ReadOnly),
            "writable" | "rw" => Ok(AccessPolicy::Writable),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::acl::PrincipalKind;

    #[test]
    fn canonical_read_only_shape() {
        let entries = AccessPolicy::ReadOnly.canonical_entries();
        let lines: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "NT AUTHORITY\\SYSTEM — FullControl",
                "BUILTIN\\Administrators — FullControl",
                "Everyone — ReadAndExecute",
            ]
        );
        assert!(entries.iter().all(|e| e.is_allow() && !e.is_inherited));
    }

    #[test]
    fn administrators_keep_full_control_in_every_state() {
        for policy in [AccessPolicy::ReadOnly, AccessPolicy::Writable] {
            let entries = policy.canonical_entries();
            for kind in [PrincipalKind::System, PrincipalKind::Administrators] {
                assert!(entries.iter().any(|e| e.principal.kind == kind
                    && e.is_allow()
                    && e.rights == Rights::FULL_CONTROL));
            }
        }
    }

    #[test]
    fn canonical_entries_depend_only_on_policy() {
        assert_eq!(
            AccessPolicy::Writable.canonical_entries(),
            AccessPolicy::Writable.canonical_entries()
        );
        assert_ne!(
            AccessPolicy::ReadOnly.canonical_entries(),
            AccessPolicy::Writable.canonical_entries()
        );
    }

    #[test]
    fn writable_grants_everyone_full_control() {
        assert_eq!(AccessPolicy::Writable.everyone_rights(), Rights::FULL_CONTROL);
        assert!(!AccessPolicy::ReadOnly.everyone_rights().grants_write());
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("read-only".parse::<AccessPolicy>(), Ok(AccessPolicy::ReadOnly));
        assert_eq!("RW".parse::<AccessPolicy>(), Ok(AccessPolicy::Writable));
        assert!("locked".parse::<AccessPolicy>().is_err());
        assert_eq!(AccessPolicy::ReadOnly.to_string(), "read-only");
        assert_eq!(AccessPolicy::ReadOnly.toggled(), AccessPolicy::Writable);
        assert_eq!(AccessPolicy::from_writable(false), AccessPolicy::ReadOnly);
    }
}
