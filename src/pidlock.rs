use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::ipc::endpoint::runtime_dir;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance (pid {pid}) holds {path:?}")]
    Held { pid: u32, path: PathBuf },

    #[error("pid file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Single-instance guard backed by `<runtime-dir>/<name>.pid`.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    held: bool,
}

impl PidLock {
    pub fn new(name: &str) -> Self {
        Self::with_path(runtime_dir().join(format!("{name}.pid")))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Write our pid, unless a live process other than us already owns the file.
    pub fn lock(&mut self) -> Result<(), LockError> {
        if self.held {
            return Ok(());
        }
        let ours = std::process::id();
        if let Some(pid) = self.read_pid()? {
            if pid != ours && process_alive(pid) {
                return Err(LockError::Held {
                    pid,
                    path: self.path.clone(),
                });
            }
            debug!(pid, path = ?self.path, "Replacing stale pid file");
        }
        fs::write(&self.path, ours.to_string()).map_err(|source| self.io_error(source))?;
        self.held = true;
        Ok(())
    }

    /// Remove the pid file if it still names this process.
    pub fn unlock(&mut self) -> Result<(), LockError> {
        self.held = false;
        match self.read_pid()? {
            Some(pid) if pid == std::process::id() => {
                fs::remove_file(&self.path).map_err(|source| self.io_error(source))
            }
            _ => Ok(()),
        }
    }

    fn read_pid(&self) -> Result<Option<u32>, LockError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if self.held {
            let _ = self.unlock();
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 probes for existence; EPERM means it exists under another user.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

// No cheap liveness probe here; an existing pid file is treated as stale.
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}
