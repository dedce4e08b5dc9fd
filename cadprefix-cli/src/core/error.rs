use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the authoring host or the filesystem seam
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("Document not found: {0}")]
    NotFound(PathBuf),

    #[error("File is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("Host is busy or in a failed internal state: {0}")]
    Transient(String),

    #[error("Operation not supported by the host: {0}")]
    NotSupported(String),

    #[error("Authoring session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Invalid document handle: {0}")]
    InvalidHandle(u64),

    #[error("Host protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl HostError {
    /// Faults worth another attempt after a short wait
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Transient(_) | HostError::Locked(_))
    }

    pub fn from_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => HostError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::WouldBlock => {
                HostError::Locked(path.to_path_buf())
            }
            _ if is_sharing_violation(err) => HostError::Locked(path.to_path_buf()),
            _ => HostError::Io(format!("{}: {}", path.display(), err)),
        }
    }
}

/// Windows reports files held open by another process as ERROR_SHARING_VIOLATION (32)
/// or ERROR_LOCK_VIOLATION (33)
fn is_sharing_violation(err: &std::io::Error) -> bool {
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Why a single occurrence or view reference could not be repaired
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepairError {
    #[error("Target does not exist: {0}")]
    TargetMissing(PathBuf),

    #[error("Target is still locked: {0}")]
    LockConflict(PathBuf),

    #[error("Reference could not be repaired: {0}")]
    Unresolved(String),
}

/// Errors that abort a whole campaign
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Authoring session could not be started: {0}")]
    SessionInit(HostError),

    #[error("Failed to discover documents under {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    #[error("Invalid prefix '{0}': prefixes must be non-empty and contain no path separators")]
    InvalidPrefix(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} document(s) still open after closing all; refusing to move files")]
    HandlesStillOpen(usize),
}
