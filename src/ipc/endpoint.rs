use std::path::{Path, PathBuf};

/// File name of the first IPC socket a presence host listens on.
pub const IPC_NAME: &str = "discord-ipc-0";

/// Named pipe used on Windows.
pub const WINDOWS_PIPE: &str = r"\\?\pipe\discord-ipc-0";

/// Environment variables checked, in order, for the runtime directory.
pub const RUNTIME_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

const DEFAULT_RUNTIME_DIR: &str = "/tmp";

/// Resolve the runtime directory from an environment lookup.
/// The first variable with a non-empty value wins, `/tmp` otherwise.
pub fn runtime_dir_with<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    RUNTIME_DIR_VARS
        .iter()
        .filter_map(|var| lookup(var))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR))
}

/// Resolve the runtime directory from the process environment.
pub fn runtime_dir() -> PathBuf {
    runtime_dir_with(|var| std::env::var(var).ok())
}

/// Location of the presence host's local channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    /// The platform default endpoint.
    #[cfg(windows)]
    pub fn resolve() -> Self {
        Self::from_path(WINDOWS_PIPE)
    }

    /// The platform default endpoint.
    #[cfg(not(windows))]
    pub fn resolve() -> Self {
        Self::from_path(runtime_dir().join(IPC_NAME))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existence probe done before every connection attempt.
    pub fn exists(&self) -> bool {
        std::fs::metadata(&self.path).is_ok()
    }
}
