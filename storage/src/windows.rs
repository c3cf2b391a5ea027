//! NTFS discretionary ACL access through the Win32 security API.

use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{
    LocalFree, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND,
    ERROR_PRIVILEGE_NOT_HELD, ERROR_SUCCESS,
};
use windows_sys::Win32::Security::Authorization::{
    ConvertSidToStringSidW, GetNamedSecurityInfoW, SetEntriesInAclW, SetNamedSecurityInfoW,
    DENY_ACCESS, EXPLICIT_ACCESS_W, NO_MULTIPLE_TRUSTEE, SET_ACCESS, SE_FILE_OBJECT,
    TRUSTEE_IS_GROUP, TRUSTEE_IS_SID, TRUSTEE_IS_USER, TRUSTEE_IS_WELL_KNOWN_GROUP, TRUSTEE_TYPE,
    TRUSTEE_W,
};
use windows_sys::Win32::Security::{
    CreateWellKnownSid, GetAce, LookupAccountSidW, MapGenericMask, SidTypeAlias, SidTypeGroup,
    SidTypeWellKnownGroup, WinBuiltinAdministratorsSid, WinLocalSystemSid, WinWorldSid,
    ACCESS_ALLOWED_ACE, ACE_HEADER, ACL, DACL_SECURITY_INFORMATION, GENERIC_MAPPING,
    NO_INHERITANCE, OWNER_SECURITY_INFORMATION, PROTECTED_DACL_SECURITY_INFORMATION,
    PSECURITY_DESCRIPTOR, SECURITY_MAX_SID_SIZE, SID_NAME_USE, WELL_KNOWN_SID_TYPE,
};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_ALL_ACCESS, FILE_APPEND_DATA, FILE_GENERIC_EXECUTE, FILE_GENERIC_READ,
    FILE_GENERIC_WRITE, FILE_READ_DATA, FILE_WRITE_DATA,
};

use crate::acl::{AccessControlEntry, AceEffect, Principal, PrincipalKind, Rights};
use crate::backend::AclBackend;
use crate::error::{AclError, AclResult};

const ACE_TYPE_ALLOWED: u8 = 0;
const ACE_TYPE_DENIED: u8 = 1;
const INHERITED_ACE_FLAG: u8 = 0x10;

const MASK_FILE_EXECUTE: u32 = 0x0000_0020;
const MASK_DELETE: u32 = 0x0001_0000;
const MASK_WRITE_DAC: u32 = 0x0004_0000;
const MASK_WRITE_OWNER: u32 = 0x0008_0000;

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Security descriptor allocated by the system, released with `LocalFree`.
struct SecurityDescriptor {
    raw: PSECURITY_DESCRIPTOR,
}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe {
                LocalFree(self.raw);
            }
        }
    }
}

struct LocalAcl {
    raw: *mut ACL,
}

impl Drop for LocalAcl {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe {
                LocalFree(self.raw as *mut _);
            }
        }
    }
}

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

fn status_error(status: u32, path: &Path, call: &str) -> AclError {
    match status {
        ERROR_ACCESS_DENIED | ERROR_PRIVILEGE_NOT_HELD => {
            AclError::AccessDenied(format!("{}: {} failed with Win32 error {}", path.display(), call, status))
        }
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => AclError::NotFound(path.display().to_string()),
        _ => AclError::Io(std::io::Error::from_raw_os_error(status as i32)),
    }
}

fn fetch_security(
    path: &Path,
    info: u32,
) -> AclResult<(SecurityDescriptor, *mut ACL, *mut core::ffi::c_void)> {
    let mut sd: PSECURITY_DESCRIPTOR = ptr::null_mut();
    let mut dacl: *mut ACL = ptr::null_mut();
    let mut owner: *mut core::ffi::c_void = ptr::null_mut();

    let wide = to_wide(path);
    let status = unsafe {
        GetNamedSecurityInfoW(
            wide.as_ptr(),
            SE_FILE_OBJECT,
            info,
            &mut owner,
            ptr::null_mut(),
            &mut dacl,
            ptr::null_mut(),
            &mut sd,
        )
    };
    if status != ERROR_SUCCESS {
        return Err(status_error(status, path, "GetNamedSecurityInfoW"));
    }

    Ok((SecurityDescriptor { raw: sd }, dacl, owner))
}

fn well_known_sid(kind: WELL_KNOWN_SID_TYPE) -> AclResult<Vec<u8>> {
    let mut sid = vec![0u8; SECURITY_MAX_SID_SIZE as usize];
    let mut size = sid.len() as u32;
    let ok = unsafe {
        CreateWellKnownSid(kind, ptr::null_mut(), sid.as_mut_ptr() as *mut _, &mut size)
    };
    if ok == 0 {
        return Err(AclError::Io(std::io::Error::last_os_error()));
    }
    sid.truncate(size as usize);
    Ok(sid)
}

fn sid_string(sid: *mut core::ffi::c_void) -> Option<String> {
    let mut raw: *mut u16 = ptr::null_mut();
    let ok = unsafe { ConvertSidToStringSidW(sid, &mut raw) };
    if ok == 0 || raw.is_null() {
        return None;
    }
    let value = unsafe {
        let mut len = 0;
        while *raw.add(len) != 0 {
            len += 1;
        }
        String::from_utf16_lossy(std::slice::from_raw_parts(raw, len))
    };
    unsafe {
        LocalFree(raw as *mut _);
    }
    Some(value)
}

/// `DOMAIN\name` and account type for a SID.
fn lookup_account(sid: *mut core::ffi::c_void) -> Option<(String, SID_NAME_USE)> {
    let mut name = vec![0u16; 256];
    let mut domain = vec![0u16; 256];
    let mut name_len = name.len() as u32;
    let mut domain_len = domain.len() as u32;
    let mut sid_use: SID_NAME_USE = 0;

    let ok = unsafe {
        LookupAccountSidW(
            ptr::null(),
            sid,
            name.as_mut_ptr(),
            &mut name_len,
            domain.as_mut_ptr(),
            &mut domain_len,
            &mut sid_use,
        )
    };
    if ok == 0 {
        return None;
    }

    let name = from_wide(&name);
    let domain = from_wide(&domain);
    let display = if domain.is_empty() {
        name
    } else {
        format!("{}\\{}", domain, name)
    };
    Some((display, sid_use))
}

fn principal_for_sid(sid: *mut core::ffi::c_void) -> Principal {
    let sid_text = sid_string(sid).unwrap_or_else(|| "unknown SID".to_string());
    let account = lookup_account(sid);

    let kind = PrincipalKind::from_well_known_sid(&sid_text).unwrap_or(match account {
        Some((_, use_)) if use_ == SidTypeGroup || use_ == SidTypeAlias || use_ == SidTypeWellKnownGroup => {
            PrincipalKind::Group
        }
        _ => PrincipalKind::User,
    });
    let name = account.map(|(name, _)| name).unwrap_or_else(|| sid_text.clone());

    Principal::new(sid_text, name, kind)
}

fn generic_mapping() -> GENERIC_MAPPING {
    GENERIC_MAPPING {
        GenericRead: FILE_GENERIC_READ,
        GenericWrite: FILE_GENERIC_WRITE,
        GenericExecute: FILE_GENERIC_EXECUTE,
        GenericAll: FILE_ALL_ACCESS,
    }
}

fn rights_from_mask(mut mask: u32) -> Rights {
    let mapping = generic_mapping();
    unsafe {
        MapGenericMask(&mut mask, &mapping);
    }

    if mask & FILE_ALL_ACCESS == FILE_ALL_ACCESS {
        return Rights::FULL_CONTROL;
    }

    let mut rights = Rights::empty();
    if mask & FILE_READ_DATA != 0 {
        rights |= Rights::READ;
    }
    if mask & (FILE_WRITE_DATA | FILE_APPEND_DATA) != 0 {
        rights |= Rights::WRITE;
    }
    if mask & MASK_FILE_EXECUTE != 0 {
        rights |= Rights::EXECUTE;
    }
    if mask & MASK_DELETE != 0 {
        rights |= Rights::DELETE;
    }
    if mask & MASK_WRITE_DAC != 0 {
        rights |= Rights::CHANGE_PERMISSIONS;
    }
    if mask & MASK_WRITE_OWNER != 0 {
        rights |= Rights::TAKE_OWNERSHIP;
    }
    rights
}

fn mask_from_rights(rights: Rights) -> u32 {
    if rights.contains(Rights::FULL_CONTROL) {
        return FILE_ALL_ACCESS;
    }

    let mut mask = 0u32;
    if rights.contains(Rights::READ) {
        mask |= FILE_GENERIC_READ;
    }
    if rights.contains(Rights::WRITE) {
        mask |= FILE_GENERIC_WRITE;
    }
    if rights.contains(Rights::EXECUTE) {
        mask |= FILE_GENERIC_EXECUTE;
    }
    if rights.contains(Rights::DELETE) {
        mask |= MASK_DELETE;
    }
    if rights.contains(Rights::CHANGE_PERMISSIONS) {
        mask |= MASK_WRITE_DAC;
    }
    if rights.contains(Rights::TAKE_OWNERSHIP) {
        mask |= MASK_WRITE_OWNER;
    }
    mask
}

/// SID bytes for a principal: well-known ones are built locally, others parsed from the SID string.
fn sid_bytes(principal: &Principal) -> AclResult<Vec<u8>> {
    match principal.kind {
        PrincipalKind::System => well_known_sid(WinLocalSystemSid),
        PrincipalKind::Administrators => well_known_sid(WinBuiltinAdministratorsSid),
        PrincipalKind::Everyone => well_known_sid(WinWorldSid),
        _ => Err(AclError::Unsupported(format!(
            "explicit grants for {} are not part of the canonical policy",
            principal.name
        ))),
    }
}

fn trustee_type(kind: PrincipalKind) -> TRUSTEE_TYPE {
    match kind {
        PrincipalKind::System | PrincipalKind::User => TRUSTEE_IS_USER,
        PrincipalKind::Everyone => TRUSTEE_IS_WELL_KNOWN_GROUP,
        PrincipalKind::Administrators | PrincipalKind::Group => TRUSTEE_IS_GROUP,
    }
}

impl AclBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn read_acl(&self, path: &Path) -> AclResult<Vec<AccessControlEntry>> {
        let (_sd, dacl, _owner) = fetch_security(path, DACL_SECURITY_INFORMATION)?;
        if dacl.is_null() {
            // A null DACL grants everyone full access.
            return Ok(vec![AccessControlEntry::allow(
                Principal::everyone(),
                Rights::FULL_CONTROL,
            )]);
        }

        let count = unsafe { (*dacl).AceCount };
        let mut entries = Vec::with_capacity(count as usize);
        for idx in 0..count {
            let mut ace_ptr: *mut core::ffi::c_void = ptr::null_mut();
            let ok = unsafe { GetAce(dacl, idx as u32, &mut ace_ptr) };
            if ok == 0 || ace_ptr.is_null() {
                return Err(AclError::Io(std::io::Error::last_os_error()));
            }
            let header = unsafe { *(ace_ptr as *const ACE_HEADER) };
            let effect = match header.AceType {
                ACE_TYPE_ALLOWED => AceEffect::Allow,
                ACE_TYPE_DENIED => AceEffect::Deny,
                // Object and callback ACEs do not apply to plain files.
                _ => continue,
            };

            // Allowed and denied ACEs share one layout.
            let ace = unsafe { &*(ace_ptr as *const ACCESS_ALLOWED_ACE) };
            let sid = &ace.SidStart as *const u32 as *mut core::ffi::c_void;

            entries.push(AccessControlEntry {
                principal: principal_for_sid(sid),
                rights: rights_from_mask(ace.Mask),
                effect,
                is_inherited: header.AceFlags & INHERITED_ACE_FLAG != 0,
            });
        }

        Ok(entries)
    }

    fn write_acl(&self, path: &Path, entries: &[AccessControlEntry]) -> AclResult<()> {
        // The SID buffers must outlive the EXPLICIT_ACCESS_W array pointing into them.
        let sids = entries
            .iter()
            .map(|e| sid_bytes(&e.principal))
            .collect::<AclResult<Vec<_>>>()?;

        let explicit: Vec<EXPLICIT_ACCESS_W> = entries
            .iter()
            .zip(sids.iter())
            .map(|(entry, sid)| EXPLICIT_ACCESS_W {
                grfAccessPermissions: mask_from_rights(entry.rights),
                grfAccessMode: match entry.effect {
                    AceEffect::Allow => SET_ACCESS,
                    AceEffect::Deny => DENY_ACCESS,
                },
                grfInheritance: NO_INHERITANCE,
                Trustee: TRUSTEE_W {
                    pMultipleTrustee: ptr::null_mut(),
                    MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
                    TrusteeForm: TRUSTEE_IS_SID,
                    TrusteeType: trustee_type(entry.principal.kind),
                    ptstrName: sid.as_ptr() as *mut u16,
                },
            })
            .collect();

        // No base ACL: the result contains exactly these entries.
        let mut new_acl: *mut ACL = ptr::null_mut();
        let status = unsafe {
            SetEntriesInAclW(explicit.len() as u32, explicit.as_ptr(), ptr::null(), &mut new_acl)
        };
        if status != ERROR_SUCCESS {
            return Err(status_error(status, path, "SetEntriesInAclW"));
        }
        let new_acl = LocalAcl { raw: new_acl };

        let wide = to_wide(path);
        let status = unsafe {
            SetNamedSecurityInfoW(
                wide.as_ptr(),
                SE_FILE_OBJECT,
                DACL_SECURITY_INFORMATION | PROTECTED_DACL_SECURITY_INFORMATION,
                ptr::null_mut(),
                ptr::null_mut(),
                new_acl.raw,
                ptr::null(),
            )
        };
        if status != ERROR_SUCCESS {
            return Err(status_error(status, path, "SetNamedSecurityInfoW"));
        }

        Ok(())
    }

    fn owner(&self, path: &Path) -> Option<String> {
        let (_sd, _dacl, owner) = fetch_security(path, OWNER_SECURITY_INFORMATION).ok()?;
        if owner.is_null() {
            return None;
        }
        lookup_account(owner).map(|(name, _)| name)
    }
}
