use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs as tokio_fs;

use crate::error::{AclError, AclResult};

/// Shown in place of an owner that could not be resolved
pub const OWNER_NOT_FOUND: &str = "owner not found";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Snapshot of one file, taken when it is selected
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    /// Absolute path
    pub path: PathBuf,
    pub size_bytes: u64,
    /// `None` when the filesystem does not record it
    pub created_at: Option<DateTime<Local>>,
    pub modified_at: Option<DateTime<Local>>,
    /// `None` when the owner lookup failed
    pub owner: Option<String>,
}

impl FileMetadata {
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    pub fn owner_display(&self) -> &str {
        self.owner.as_deref().unwrap_or(OWNER_NOT_FOUND)
    }

    /// Size in KiB with two decimals, e.g. `1.50 KB`
    pub fn size_display(&self) -> String {
        format!("{:.2} KB", self.size_bytes as f64 / 1024.0)
    }

    pub fn created_display(&self) -> String {
        format_timestamp(self.created_at.as_ref())
    }

    pub fn modified_display(&self) -> String {
        format_timestamp(self.modified_at.as_ref())
    }

    /// Names of the fields that degraded to a placeholder.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.created_at.is_none() {
            missing.push("created");
        }
        if self.modified_at.is_none() {
            missing.push("modified");
        }
        if self.owner.is_none() {
            missing.push("owner");
        }
        missing
    }
}

fn format_timestamp(ts: Option<&DateTime<Local>>) -> String {
    ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn local_time(time: std::io::Result<SystemTime>) -> Option<DateTime<Local>> {
    time.ok().map(DateTime::<Local>::from)
}

/// Read size and timestamps of a regular file.
///
/// The owner is left empty; it comes from the ACL backend.
pub async fn read_metadata(path: &Path) -> AclResult<FileMetadata> {
    let path = std::path::absolute(path).map_err(|e| AclError::from_io(e, path))?;
    let metadata = tokio_fs::metadata(&path)
        .await
        .map_err(|e| AclError::from_io(e, &path))?;

    if !metadata.is_file() {
        return Err(AclError::NotAFile(path.display().to_string()));
    }

    Ok(FileMetadata {
        size_bytes: metadata.len(),
        created_at: local_time(metadata.created()),
        modified_at: local_time(metadata.modified()),
        owner: None,
        path,
    })
}
