use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Length of one rate-limit window.
pub const WINDOW: Duration = Duration::from_secs(15);

/// Verdict for a prospective update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Allowed,
    /// The file is the one reported last; nothing to update.
    SameFile,
    /// The current window already had its update.
    Window,
}

/// One update per window, and never twice in a row for the same file.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    window_start: Instant,
    last_used: bool,
    last_file: Option<PathBuf>,
}

impl RateLimiter {
    pub fn new(now: Instant) -> Self {
        Self::with_window(WINDOW, now)
    }

    pub fn with_window(window: Duration, now: Instant) -> Self {
        Self {
            window,
            window_start: now,
            last_used: false,
            last_file: None,
        }
    }

    /// Decide whether `file` may be reported at `now`, recording it if so.
    pub fn check(&mut self, file: &Path, now: Instant) -> Limit {
        if self.last_file.as_deref() == Some(file) {
            return Limit::SameFile;
        }
        if now.saturating_duration_since(self.window_start) >= self.window {
            self.last_used = false;
            self.window_start = now;
        }
        if self.last_used {
            return Limit::Window;
        }
        self.last_used = true;
        self.last_file = Some(file.to_path_buf());
        Limit::Allowed
    }

    /// Record a forced update that bypassed [`RateLimiter::check`].
    pub fn record(&mut self, file: &Path) {
        self.last_file = Some(file.to_path_buf());
    }

    pub fn last_file(&self) -> Option<&Path> {
        self.last_file.as_deref()
    }
}
