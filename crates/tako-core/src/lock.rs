use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::TakoError;

/// Exclusive advisory lock on a named file under the runtime locks
/// directory. Only one `tako run`/`tako app` process may hold this per
/// workspace at a time.
///
/// The underlying `File` is released when this value is dropped — on every
/// exit path including panics, since the OS reclaims the advisory lock when
/// the file descriptor closes.
pub struct InstanceLock {
    path: PathBuf,
    file: File,
}

impl InstanceLock {
    /// Acquire the lock, or fail with `TakoError::PreconditionFailure` if
    /// another instance already holds it.
    pub fn acquire(path: &Path) -> Result<Self, TakoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TakoError::PreconditionFailure(format!("cannot create lock dir: {e}")))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TakoError::PreconditionFailure(format!("cannot open lock file: {e}")))?;

        file.try_lock_exclusive().map_err(|_| {
            TakoError::PreconditionFailure(format!(
                "another Tako instance is already running (lock: {})",
                path.display()
            ))
        })?;

        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("tako.lock");
        let first = InstanceLock::acquire(&lock_path).expect("first acquire succeeds");
        let second = InstanceLock::acquire(&lock_path);
        assert!(second.is_err());
        drop(first);
        let third = InstanceLock::acquire(&lock_path);
        assert!(third.is_ok());
    }
}
