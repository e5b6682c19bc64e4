//! Exclusive run lock for deploy and rollback.
//!
//! A lock file created with create-new semantics in the state directory.
//! It holds the owner's pid and is removed when the guard drops. A lock
//! whose owner no longer exists (the process was killed before it could
//! clean up) is reclaimed once.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{StateError, StateResult};

/// Held for the full duration of a deploy or rollback.
#[derive(Debug)]
pub struct RunLock {
    lock_path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail fast with [`StateError::Locked`].
    pub fn acquire(lock_path: &Path) -> StateResult<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Lock(e.to_string()))?;
        }

        match try_create(lock_path) {
            Ok(lock) => Ok(lock),
            Err(StateError::Locked { holder, .. }) if holder_is_gone(&holder) => {
                warn!(path = ?lock_path, %holder, "reclaiming stale run lock");
                fs::remove_file(lock_path).map_err(|e| StateError::Lock(e.to_string()))?;
                try_create(lock_path)
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
        debug!(path = ?self.lock_path, "run lock released");
    }
}

fn try_create(lock_path: &Path) -> StateResult<RunLock> {
    match OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            writeln!(file, "{}", std::process::id())
                .map_err(|e| StateError::Lock(e.to_string()))?;
            debug!(path = ?lock_path, "run lock acquired");
            Ok(RunLock {
                lock_path: lock_path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let holder = fs::read_to_string(lock_path)
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            Err(StateError::Locked {
                path: lock_path.to_path_buf(),
                holder: if holder.is_empty() {
                    "unknown".to_string()
                } else {
                    format!("pid {holder}")
                },
            })
        }
        Err(e) => Err(StateError::Lock(e.to_string())),
    }
}

/// Only decidable where `/proc` exists; elsewhere the lock is kept.
fn holder_is_gone(holder: &str) -> bool {
    let Some(pid) = holder.strip_prefix("pid ") else {
        return false;
    };
    if pid.parse::<u32>().is_err() {
        return false;
    }
    let proc_root = Path::new("/proc");
    proc_root.is_dir() && !proc_root.join(pid).exists()
}
