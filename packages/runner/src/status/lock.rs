// packages/runner/src/status/lock.rs
//! Single-active-runner lock
//!
//! An exclusive `flock(2)` on a lock file. The lock is released when the
//! guard is dropped or the process exits, including on crash or restart.

use crate::utils::errors::{Result, RunnerError};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the lifetime of one runner invocation
#[derive(Debug)]
pub struct RunnerLock {
    file: File,
    path: PathBuf,
}

impl RunnerLock {
    /// Take the lock without blocking; `LockHeld` if another runner has it
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|e| RunnerError::io(path, e))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(e) if e == Errno::EWOULDBLOCK => {
                return Err(RunnerError::LockHeld(path.to_path_buf()))
            }
            Err(e) => return Err(RunnerError::io(path, e.into())),
        }

        file.set_len(0).map_err(|e| RunnerError::io(path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| RunnerError::io(path, e))?;

        debug!("Acquired runner lock {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunnerLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}
