//! Exclusive run lock

use crate::error::{IoResultExt, Result, TuneError};
use std::path::{Path, PathBuf};

/// Held for the duration of a run; released when dropped
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<std::fs::File>,
}

impl RunLock {
    /// Take the lock without blocking
    ///
    /// Fails with [`TuneError::LockHeld`] when another run holds it.
    #[cfg(unix)]
    pub fn acquire(path: &Path) -> Result<Self> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_path(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                tracing::debug!("Acquired run lock {}", path.display());
                Ok(Self {
                    path: path.to_path_buf(),
                    _lock: lock,
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                Err(TuneError::LockHeld(path.to_path_buf()))
            }
            Err((_, errno)) => Err(TuneError::io(path, std::io::Error::from(errno))),
        }
    }

    #[cfg(not(unix))]
    pub fn acquire(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run/nodetune.lock");

        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, TuneError::LockHeld(_)));

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
