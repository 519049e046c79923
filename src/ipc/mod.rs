// IPC client for a local presence host
// Framed JSON over a Unix socket (POSIX) or named pipe (Windows)

pub mod endpoint;
pub mod error;
#[cfg(unix)]
pub mod host;
pub mod nonce;
pub mod protocol;
pub mod session;
pub mod transport;

use std::time::Duration;

pub use endpoint::Endpoint;
pub use error::{IpcError, ProtocolError};
pub use nonce::Nonce;
pub use protocol::{Frame, Opcode};
pub use session::{Session, SessionState};
pub use transport::{PlatformTransport, Transport};

/// Connect to the platform default endpoint and authenticate.
pub fn connect(
    client_id: impl Into<String>,
    reconnect_threshold: u32,
) -> Result<Session<PlatformTransport>, IpcError> {
    connect_to(Endpoint::resolve(), None, client_id, reconnect_threshold)
}

/// Connect to a specific endpoint and authenticate.
pub fn connect_to(
    endpoint: Endpoint,
    timeout: Option<Duration>,
    client_id: impl Into<String>,
    reconnect_threshold: u32,
) -> Result<Session<PlatformTransport>, IpcError> {
    let transport = transport::platform_transport(endpoint, timeout);
    let mut session = Session::with_transport(client_id, reconnect_threshold, transport);
    session.connect()?;
    Ok(session)
}
