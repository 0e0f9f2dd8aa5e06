//! Single-instance guard for long-running servers.
//!
//! On unix this is an advisory `flock(LOCK_EX | LOCK_NB)` on
//! `.steward/locks/<resource>.lock`; the kernel drops it if the process dies,
//! so there is no stale-lock cleanup. Elsewhere the lock is the existence of
//! the file itself.

use crate::error::{Result, StewardError};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: Option<File>,
}

impl ProcessLock {
    /// Take the lock or fail immediately with [`StewardError::LockHeld`].
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = open_exclusive(path)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Give the lock up. Calling it again is a no-op.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = unlock(file, &self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        } else {
            debug!(path = %self.path.display(), "lock released");
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn held(path: &Path) -> StewardError {
    let holder = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse().ok());
    StewardError::LockHeld {
        path: path.display().to_string(),
        holder,
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    // SAFETY: the descriptor is owned by `file` and outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(file);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Err(held(path))
    } else {
        Err(err.into())
    }
}

#[cfg(unix)]
fn unlock(file: File, _path: &Path) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    file.set_len(0)?;
    // SAFETY: as above.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path) -> Result<File> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(held(path)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn unlock(file: File, path: &Path) -> std::io::Result<()> {
    drop(file);
    std::fs::remove_file(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_with_holder_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks/odoo.lock");
        let _first = ProcessLock::acquire(&path).unwrap();

        match ProcessLock::acquire(&path).unwrap_err() {
            StewardError::LockHeld { holder, .. } => {
                assert_eq!(holder, Some(std::process::id()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn release_is_idempotent_and_frees_the_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odoo.lock");
        let mut lock = ProcessLock::acquire(&path).unwrap();
        lock.release();
        lock.release();
        assert!(!lock.is_held());
        let again = ProcessLock::acquire(&path).unwrap();
        assert!(again.is_held());
    }

    #[test]
    fn drop_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("email.lock");
        {
            let _lock = ProcessLock::acquire(&path).unwrap();
        }
        assert!(ProcessLock::acquire(&path).is_ok());
    }

    #[test]
    fn distinct_resources_do_not_conflict() {
        let dir = TempDir::new().unwrap();
        let _a = ProcessLock::acquire(&dir.path().join("a.lock")).unwrap();
        assert!(ProcessLock::acquire(&dir.path().join("b.lock")).is_ok());
    }
}
