//! Exclusive workspace lock.
//!
//! Disk tools act on machine-global state, so only one workflow may run per
//! workspace. The lock combines a process-wide registry of held lock paths
//! with a lock file holding the owner's PID; a file left by a dead process is
//! reclaimed.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::Mutex;
use sysinfo::{Pid, System};

use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// Lock paths held by any `WorkspaceLock` of this process.
static HELD_IN_PROCESS: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

pub struct WorkspaceLock {
    path: PathBuf,
    key: PathBuf,
}

/// Held for the duration of one workflow. Removes the lock file on drop.
pub struct WorkspaceLockGuard<'a> {
    path: &'a Path,
    key: &'a Path,
}

impl WorkspaceLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = std::path::absolute(&path).unwrap_or_else(|_| path.clone());
        Self { path, key }
    }

    /// Take the lock or fail with `ResourceBusy`.
    ///
    /// Two handles on the same path in one process exclude each other.
    pub fn try_acquire(&self) -> VhdbranchResult<WorkspaceLockGuard<'_>> {
        if !HELD_IN_PROCESS.lock().insert(self.key.clone()) {
            return Err(VhdbranchError::ResourceBusy(format!(
                "another workflow is running on {} in this process",
                self.path.display()
            )));
        }
        let guard = WorkspaceLockGuard {
            path: &self.path,
            key: &self.key,
        };

        match self.create_lock_file() {
            Ok(()) => Ok(guard),
            Err(e) => {
                guard.forget_file();
                Err(e)
            }
        }
    }

    fn create_lock_file(&self) -> VhdbranchResult<()> {
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    if let Err(e) = write!(file, "{}", std::process::id()) {
                        let _ = std::fs::remove_file(&self.path);
                        return Err(e.into());
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let owner = std::fs::read_to_string(&self.path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    // The registry already excludes this process, so our own
                    // PID here is a leftover from an earlier process.
                    if let Some(pid) = owner
                        && pid != std::process::id()
                        && process_alive(pid)
                    {
                        return Err(VhdbranchError::ResourceBusy(format!(
                            "workspace is locked by process {pid} ({})",
                            self.path.display()
                        )));
                    }
                    tracing::warn!("Reclaiming stale workspace lock {}", self.path.display());
                    match std::fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(VhdbranchError::ResourceBusy(format!(
            "could not acquire workspace lock {}",
            self.path.display()
        )))
    }
}

impl WorkspaceLockGuard<'_> {
    /// Release the registry slot without touching the lock file.
    fn forget_file(self) {
        HELD_IN_PROCESS.lock().remove(self.key);
        std::mem::forget(self);
    }
}

impl Drop for WorkspaceLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.path) {
            tracing::warn!("Failed to remove workspace lock {}: {}", self.path.display(), e);
        }
        HELD_IN_PROCESS.lock().remove(self.key);
    }
}

fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}
