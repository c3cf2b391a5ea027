use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AclError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Metadata field unavailable: {0}")]
    PartialMetadata(String),

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type AclResult<T> = std::result::Result<T, AclError>;

impl AclError {
    /// Classify an IO error raised while touching `path`.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => AclError::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => {
                AclError::AccessDenied(format!("{}: {}", path.display(), err))
            }
            _ => AclError::Io(err),
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, AclError::AccessDenied(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AclError::NotFound(_))
    }
}

impl From<tokio::task::JoinError> for AclError {
    fn from(err: tokio::task::JoinError) -> Self {
        AclError::Task(err.to_string())
    }
}

impl From<AclError> for utils::error::Error {
    fn from(err: AclError) -> Self {
        utils::error::Error::Message(err.to_string())
    }
}
