//! Advisory lock on the store directory
//!
//! On Unix this is `flock(2)` on a dedicated lock file: the kernel drops the
//! lock when the holder exits, so a crashed process never wedges the pool.
//! Elsewhere a sentinel file created with `create_new` stands in, and shared
//! locks are taken exclusively. The sentinel holds the pid of its owner; if
//! that process dies without dropping the lock the file stays behind and
//! every caller times out until it is deleted by hand.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Delay between attempts while the lock is held elsewhere
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    /// Acquire the lock, waiting at most `timeout`
    ///
    /// Gives up with `ConcurrencyConflict` when another process keeps the
    /// lock for longer than that.
    pub fn acquire(path: &Path, mode: LockMode, timeout: Duration) -> Result<Self> {
        let started = Instant::now();
        loop {
            match Self::try_acquire(path, mode)? {
                Some(lock) => {
                    debug!(path = ?path, ?mode, waited = ?started.elapsed(), "Acquired store lock");
                    return Ok(lock);
                }
                None if started.elapsed() >= timeout => {
                    return Err(Error::ConcurrencyConflict(format!(
                        "store lock {} still held after {:?}{}",
                        path.display(),
                        timeout,
                        Self::holder_hint(path)
                    )));
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    #[cfg(unix)]
    fn try_acquire(path: &Path, mode: LockMode) -> Result<Option<Self>> {
        use std::io::ErrorKind;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::Storage(format!("Failed to open lock file: {}", e)))?;

        let operation = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };

        loop {
            // SAFETY: the descriptor belongs to `file`, which outlives the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), operation | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                }));
            }

            let err = std::io::Error::last_os_error();
            match err.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock => return Ok(None),
                _ => return Err(Error::Storage(format!("flock failed: {}", err))),
            }
        }
    }

    #[cfg(unix)]
    fn holder_hint(_path: &Path) -> String {
        String::new()
    }

    #[cfg(not(unix))]
    fn try_acquire(path: &Path, mode: LockMode) -> Result<Option<Self>> {
        use std::io::{ErrorKind, Write};

        let sentinel = Self::sentinel(path);
        match OpenOptions::new().write(true).create_new(true).open(&sentinel) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())
                    .map_err(|e| Error::Storage(format!("Failed to write lock sentinel: {}", e)))?;
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to create lock sentinel: {}", e))),
        }
    }

    /// Points at the sentinel and its owner so a stale lock can be removed
    #[cfg(not(unix))]
    fn holder_hint(path: &Path) -> String {
        let sentinel = Self::sentinel(path);
        match std::fs::read_to_string(&sentinel) {
            Ok(pid) => format!(
                " by pid {}; delete {} if that process is gone",
                pid.trim(),
                sentinel.display()
            ),
            Err(_) => String::new(),
        }
    }

    #[cfg(not(unix))]
    fn sentinel(path: &Path) -> PathBuf {
        path.with_extension("lock.held")
    }
}

impl Drop for StoreLock {
    #[cfg(unix)]
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(path = ?self.path, "Released store lock");
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        std::fs::remove_file(Self::sentinel(&self.path)).ok();
        debug!(path = ?self.path, "Released store lock");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn lock_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vlan_lock_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("pool.lock")
    }

    #[test]
    fn test_exclusive_lock_blocks_second_holder() -> Result<()> {
        let path = lock_path("exclusive");
        let held = StoreLock::acquire(&path, LockMode::Exclusive, Duration::from_millis(100))?;
        assert_eq!(held.mode(), LockMode::Exclusive);

        let second = StoreLock::acquire(&path, LockMode::Exclusive, Duration::from_millis(30));
        assert!(matches!(second, Err(Error::ConcurrencyConflict(_))));

        let shared = StoreLock::acquire(&path, LockMode::Shared, Duration::from_millis(30));
        assert!(matches!(shared, Err(Error::ConcurrencyConflict(_))));

        drop(held);
        let again = StoreLock::acquire(&path, LockMode::Exclusive, Duration::from_millis(100));
        assert!(again.is_ok());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
        Ok(())
    }

    #[test]
    fn test_shared_locks_coexist() -> Result<()> {
        let path = lock_path("shared");
        let _a = StoreLock::acquire(&path, LockMode::Shared, Duration::from_millis(100))?;
        let _b = StoreLock::acquire(&path, LockMode::Shared, Duration::from_millis(100))?;

        let writer = StoreLock::acquire(&path, LockMode::Exclusive, Duration::from_millis(30));
        assert!(writer.is_err());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
        Ok(())
    }
}
