use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ipc::protocol::Frame;
use crate::presence::{self, BufferInfo, Presence, UpdateOutcome, filetype};

/// presence - editor activity reporter for a local presence host
#[derive(Parser, Debug)]
#[command(name = "presence")]
#[command(version)]
#[command(about = "Report editor activity to a local presence host")]
#[command(long_about = "presence talks to a locally running presence host (a chat client exposing
a discord-ipc socket or pipe) and keeps its 'currently editing' status up to date.

Quick start:
  1. Run 'presence --init' to generate a config file
  2. Edit .presence.toml to set blacklists or filetype aliases (optional)
  3. Run 'presence set src/main.rs' for a one-shot update
  4. Or run 'presence watch .' to follow file changes in a directory")]
pub struct Cli {
    /// Path to config file (defaults to .presence.toml)
    #[arg(short, long, default_value = ".presence.toml")]
    pub config: String,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long)]
    pub debug: bool,

    /// Initialize a new .presence.toml config file with defaults
    #[arg(long)]
    pub init: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Report a single file as the current activity
    Set {
        /// The file being edited
        file: PathBuf,
        /// Editor filetype (guessed from the file name if omitted)
        #[arg(long)]
        filetype: Option<String>,
        /// Workspace name (defaults to the enclosing repository)
        #[arg(long)]
        workspace: Option<String>,
        /// Bypass the rate limiter
        #[arg(long)]
        force: bool,
    },
    /// Watch a directory and report every file that changes
    #[command(visible_alias = "w")]
    Watch {
        /// Directory to watch recursively
        dir: PathBuf,
    },
    /// List filetypes with artwork, optionally filtered by a regex
    #[command(visible_alias = "ft")]
    Filetypes {
        pattern: Option<String>,
    },
    /// Run a local host emulator and print every frame it receives
    Host {
        /// Socket to listen on (defaults to the client endpoint)
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

/// Initialize a new config file with default settings
pub fn init_config(config_path: &str) -> anyhow::Result<()> {
    if Path::new(config_path).exists() {
        println!("Config file '{}' already exists.", config_path);
        return Ok(());
    }

    Config::default()
        .save(config_path)
        .with_context(|| format!("Failed to write config to '{}'", config_path))?;

    // Append commented-out optional settings
    use std::fs::OpenOptions;
    use std::io::Write;
    let mut file = OpenOptions::new()
        .append(true)
        .open(config_path)
        .with_context(|| format!("Failed to append to '{}'", config_path))?;
    writeln!(file, "\n# Override the host endpoint (defaults to <runtime dir>/discord-ipc-0)")?;
    writeln!(file, "# socket_path = \"/run/user/1000/discord-ipc-0\"")?;
    writeln!(file, "# Give up on a silent host after this many milliseconds")?;
    writeln!(file, "# io_timeout_ms = 2000")?;

    println!("Created {}", config_path);
    println!("\nNext steps:");
    println!("  1. Edit {} to set blacklists or filetype aliases", config_path);
    println!("  2. Run 'presence watch .' to start reporting");
    Ok(())
}

/// Load and validate the config, using defaults when the file is missing.
pub fn load_config(config_path: &str) -> anyhow::Result<Config> {
    let config = Config::load_or_default(config_path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config '{}'", config_path))?;
    Ok(config)
}

/// Human-readable summary of an update.
pub fn describe_outcome(outcome: &UpdateOutcome) -> String {
    match outcome {
        UpdateOutcome::Sent(echo) => {
            serde_json::to_string_pretty(echo).unwrap_or_else(|_| echo.to_string())
        }
        UpdateOutcome::Skipped(reason) => format!("Skipped ({:?})", reason),
        UpdateOutcome::Deferred => "Rate limited, update deferred".to_string(),
        UpdateOutcome::Disabled => "Presence disabled: host unavailable".to_string(),
    }
}

pub fn run_set(
    config: Config,
    file: &Path,
    filetype: Option<String>,
    workspace: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let mut presence = Presence::new(config)?;
    let buffer = BufferInfo {
        path: presence::absolute(file),
        filetype,
        workspace,
        readonly: false,
    };

    let outcome = presence.update(&buffer, force);
    presence.shutdown();

    let outcome = outcome?;
    if outcome == UpdateOutcome::Disabled {
        return Err(anyhow!(describe_outcome(&outcome)));
    }
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

pub fn filetypes_listing(pattern: Option<&str>) -> anyhow::Result<Vec<&'static str>> {
    match pattern {
        Some(pattern) => filetype::matching_filetypes(pattern)
            .with_context(|| format!("Invalid filetype pattern '{}'", pattern)),
        None => Ok(filetype::supported_filetypes().to_vec()),
    }
}

pub fn run_filetypes(pattern: Option<&str>) -> anyhow::Result<()> {
    for ft in filetypes_listing(pattern)? {
        println!("{}", ft);
    }
    Ok(())
}

/// Files touched by a watcher event, ignoring VCS metadata.
pub fn reportable_paths(event: &Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| {
            !path.components().any(|c| {
                matches!(c.as_os_str().to_str(), Some(".git" | ".hg" | ".svn"))
            })
        })
        .filter(|path| path.is_file())
        .cloned()
        .collect()
}

/// Follow file changes under `dir` until Ctrl-C.
pub async fn run_watch(config: Config, dir: &Path) -> anyhow::Result<()> {
    let dir = presence::absolute(dir);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher
        .watch(&dir, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;
    info!(dir = ?dir, "Watching for changes");

    let mut presence = Presence::new(config)?;
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
            _ = tick.tick() => {
                if presence.has_pending() {
                    let outcome = tokio::task::block_in_place(|| presence.retry_deferred());
                    if let Err(err) = outcome {
                        warn!("Deferred update failed: {err}");
                    }
                }
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    break Err(anyhow!("file watcher stopped"));
                };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("Watch error: {err}");
                        continue;
                    }
                };
                for path in reportable_paths(&event) {
                    let buffer = BufferInfo::new(path);
                    match tokio::task::block_in_place(|| presence.update(&buffer, false)) {
                        Ok(outcome) => debug!(path = ?buffer.path, "{}", describe_outcome(&outcome)),
                        Err(err) => warn!(path = ?buffer.path, "Update failed: {err}"),
                    }
                }
                if presence.is_disabled() {
                    break Err(anyhow!("presence host unavailable, stopping"));
                }
            }
        }
    };

    presence.shutdown();
    result
}

pub fn format_frame(frame: &Frame) -> String {
    format!("{:?} {}", frame.opcode, frame.payload)
}

/// Run the host emulator until Ctrl-C, printing received frames.
#[cfg(unix)]
pub async fn run_host(config: &Config, socket: Option<PathBuf>) -> anyhow::Result<()> {
    use crate::ipc::host::{self, PresenceHost};

    let socket = socket.unwrap_or_else(|| config.endpoint().path().to_path_buf());
    let listener = PresenceHost::bind(&socket)
        .with_context(|| format!("Failed to bind host socket at {:?}", socket))?;
    println!("Host listening on {}", socket.display());

    // A plain thread, so a blocked accept() does not hold up runtime shutdown.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let result = (|| -> anyhow::Result<()> {
            loop {
                let mut conn = listener.accept()?;
                info!("Client connected");
                let served = conn.serve(|frame| {
                    println!("{}", format_frame(frame));
                    host::default_reply(frame)
                });
                match served {
                    Ok(frames) => info!(frames = frames.len(), "Client disconnected"),
                    Err(err) => warn!("Connection error: {err}"),
                }
            }
        })();
        let _ = done_tx.send(result);
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, removing {:?}", socket);
            let _ = std::fs::remove_file(&socket);
            Ok(())
        }
        done = done_rx => done.unwrap_or_else(|_| Err(anyhow!("host thread exited"))),
    }
}

#[cfg(not(unix))]
pub async fn run_host(_config: &Config, _socket: Option<PathBuf>) -> anyhow::Result<()> {
    Err(anyhow!("the host emulator needs Unix domain sockets"))
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
