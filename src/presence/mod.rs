// Editor presence controller
// Turns "the user is looking at this buffer" into rate-limited SET_ACTIVITY
// requests on a single IPC session.

pub mod activity;
pub mod filetype;
pub mod ratelimit;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::time::Instant;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ipc::{self, IpcError, Session};
use crate::pidlock::{LockError, PidLock};

pub use activity::{Activity, Assets, Timestamps};
pub use filetype::FiletypeResolver;
pub use ratelimit::{Limit, RateLimiter};
pub use workspace::find_workspace;

/// What the editor knows about the buffer being shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub path: PathBuf,
    /// Filetype as detected by the editor, if any
    pub filetype: Option<String>,
    /// Workspace name; looked up from the path when `None`
    pub workspace: Option<String>,
    pub readonly: bool,
}

impl BufferInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Readonly,
    NoFile,
    Blacklisted,
    NoFiletype,
    FiletypeBlacklisted,
    SameFile,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The host confirmed the activity; carries its echo.
    Sent(Value),
    Skipped(SkipReason),
    /// Rate limited; kept for [`Presence::retry_deferred`].
    Deferred,
    /// The host is gone or the reconnect budget is spent.
    Disabled,
}

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

pub struct Presence {
    config: Config,
    blacklist: Vec<Regex>,
    session: Option<Session>,
    lock: PidLock,
    resolver: FiletypeResolver,
    limiter: RateLimiter,
    activity: Activity,
    pending: Option<BufferInfo>,
    disabled: bool,
}

impl Presence {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let lock = PidLock::new(&config.lock_name);
        Self::with_lock(config, lock)
    }

    pub fn with_lock(config: Config, lock: PidLock) -> anyhow::Result<Self> {
        config.validate()?;
        let blacklist = config.blacklist_patterns()?;
        let resolver = FiletypeResolver::new(config.fts_aliases.clone());

        Ok(Self {
            config,
            blacklist,
            session: None,
            lock,
            resolver,
            limiter: RateLimiter::new(Instant::now()),
            activity: Activity::default(),
            pending: None,
            disabled: false,
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn clear_cache(&mut self) {
        self.resolver.clear_cache();
    }

    pub fn update(&mut self, buffer: &BufferInfo, force: bool) -> Result<UpdateOutcome, PresenceError> {
        self.update_at(buffer, force, Instant::now())
    }

    /// Report `buffer` as the current activity, as of `now`.
    pub fn update_at(
        &mut self,
        buffer: &BufferInfo,
        force: bool,
        now: Instant,
    ) -> Result<UpdateOutcome, PresenceError> {
        if self.disabled {
            return Ok(UpdateOutcome::Disabled);
        }

        self.activity.editor_assets();
        self.activity.start_clock(chrono::Utc::now().timestamp());

        if self.session.is_none() {
            self.lock.lock()?;
            let endpoint = self.config.endpoint();
            debug!(path = ?endpoint.path(), "Connecting to presence host");
            match ipc::connect_to(
                endpoint,
                self.config.io_timeout(),
                self.config.client_id.clone(),
                self.config.reconnect_threshold,
            ) {
                Ok(session) => self.session = Some(session),
                Err(err) => return self.fail(err),
            }
        }

        if buffer.readonly {
            return Ok(UpdateOutcome::Skipped(SkipReason::Readonly));
        }

        if !self.config.rich_presence {
            self.activity.idle();
            return self.send();
        }

        let path_text = buffer.path.to_string_lossy();
        let Some(file_name) = buffer.path.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            return Ok(UpdateOutcome::Skipped(SkipReason::NoFile));
        };
        if self.is_blacklisted(&path_text) {
            debug!(path = %path_text, "Blacklisted");
            return Ok(UpdateOutcome::Skipped(SkipReason::Blacklisted));
        }

        let Some(mut ft) = self.resolver.resolve(&file_name, buffer.filetype.as_deref()) else {
            return Ok(UpdateOutcome::Skipped(SkipReason::NoFiletype));
        };
        debug!(ft = %ft, "Resolved filetype");
        if self.config.fts_blacklist.contains(&ft) {
            return Ok(UpdateOutcome::Skipped(SkipReason::FiletypeBlacklisted));
        }
        if !filetype::is_supported(&ft) {
            ft = filetype::UNKNOWN.to_string();
        }

        if force {
            self.limiter.record(&buffer.path);
        } else {
            match self.limiter.check(&buffer.path, now) {
                Limit::Allowed => {}
                Limit::SameFile => return Ok(UpdateOutcome::Skipped(SkipReason::SameFile)),
                Limit::Window => {
                    debug!(path = %path_text, "Rate limited, deferring");
                    self.pending = Some(buffer.clone());
                    return Ok(UpdateOutcome::Deferred);
                }
            }
        }
        self.pending = None;

        let workspace = buffer
            .workspace
            .clone()
            .or_else(|| find_workspace(&buffer.path));
        self.activity.editing(&file_name, &ft, workspace.as_deref());
        self.send()
    }

    /// Re-run the most recent deferred update, if any.
    pub fn retry_deferred(&mut self) -> Result<Option<UpdateOutcome>, PresenceError> {
        self.retry_deferred_at(Instant::now())
    }

    pub fn retry_deferred_at(&mut self, now: Instant) -> Result<Option<UpdateOutcome>, PresenceError> {
        match self.pending.take() {
            Some(buffer) => self.update_at(&buffer, false, now).map(Some),
            None => Ok(None),
        }
    }

    /// Release the pid lock and close the session.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.lock.unlock() {
            warn!("{err}");
        }
        self.pending = None;
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
    }

    fn is_blacklisted(&self, path: &str) -> bool {
        // Patterns must match from the start of the path.
        self.blacklist
            .iter()
            .any(|regex| regex.find(path).is_some_and(|m| m.start() == 0))
    }

    fn send(&mut self) -> Result<UpdateOutcome, PresenceError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(UpdateOutcome::Disabled);
        };
        match session.set_activity(&self.activity, std::process::id()) {
            Ok(mut payload) => {
                info!(details = ?self.activity.details, "Presence updated");
                let echo = payload.get_mut("data").map(Value::take).unwrap_or_default();
                Ok(UpdateOutcome::Sent(echo))
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: IpcError) -> Result<UpdateOutcome, PresenceError> {
        if !err.is_fatal() {
            return Err(err.into());
        }
        match &err {
            IpcError::HostUnavailable { .. } => warn!("Local presence host not found: {err}"),
            _ => warn!("Ran out of reconnect attempts: {err}"),
        }
        self.disabled = true;
        self.pending = None;
        Ok(UpdateOutcome::Disabled)
    }
}

impl Drop for Presence {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolve a path against the working directory without touching the disk.
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
