use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the IPC session.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The presence host's endpoint is missing or refused the connection.
    #[error("presence host not available at {path:?}")]
    HostUnavailable {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },

    /// The session used up its reconnect budget. Recreate it to try again.
    #[error("ran out of reconnect attempts ({attempts} > {threshold})")]
    ReconnectExhausted { attempts: u32, threshold: u32 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Raw transport failure. The session turns these into reconnects.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl IpcError {
    pub fn host_unavailable(path: impl Into<PathBuf>, source: Option<io::Error>) -> Self {
        Self::HostUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller should stop sending presence updates.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HostUnavailable { .. } | Self::ReconnectExhausted { .. }
        )
    }
}

/// The host answered with something the protocol does not allow.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("host reported error {code:?}: {message}")]
    Host { code: Option<i64>, message: String },

    #[error("malformed payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("unexpected opcode {0}")]
    UnexpectedOpcode(i32),

    #[error("invalid payload length {0}")]
    InvalidLength(i64),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unexpected command {0:?} in response")]
    UnexpectedCommand(Option<String>),

    #[error("nonce mismatch: sent {expected}, got {actual:?}")]
    NonceMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("host sent an empty response")]
    EmptyResponse,
}

pub type Result<T, E = IpcError> = std::result::Result<T, E>;
