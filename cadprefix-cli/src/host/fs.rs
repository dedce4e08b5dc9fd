use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use crate::core::error::{HostError, HostResult};

/// Filesystem operations the campaign performs outside the authoring host
pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;

    /// Whether another process currently holds the file
    fn is_locked(&self, path: &Path) -> bool;

    fn move_file(&self, from: &Path, to: &Path) -> HostResult<()>;

    fn copy_file(&self, from: &Path, to: &Path) -> HostResult<()>;
}

/// The real local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_locked(&self, path: &Path) -> bool {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => return matches!(HostError::from_io(path, &e), HostError::Locked(_)),
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }

    fn move_file(&self, from: &Path, to: &Path) -> HostResult<()> {
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(
                    "Cross-device move of {}, falling back to copy + remove",
                    from.display()
                );
                move_by_copy(from, to, |path| fs::remove_file(path))
            }
            Err(e) => Err(HostError::from_io(from, &e)),
        }
    }

    fn copy_file(&self, from: &Path, to: &Path) -> HostResult<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| HostError::from_io(parent, &e))?;
        }
        fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| HostError::from_io(from, &e))
    }
}

/// Copy then remove the original. When the original cannot be removed the copy
/// is deleted again, so a failed move never leaves a file at `to`.
fn move_by_copy<R>(from: &Path, to: &Path, remove: R) -> HostResult<()>
where
    R: FnOnce(&Path) -> io::Result<()>,
{
    LocalFs.copy_file(from, to)?;
    if let Err(e) = remove(from) {
        if let Err(cleanup) = fs::remove_file(to) {
            tracing::warn!("Could not remove partial copy {}: {}", to.display(), cleanup);
        }
        return Err(HostError::from_io(from, &e));
    }
    Ok(())
}

/// EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows
fn is_cross_device(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}
