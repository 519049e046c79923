// Local presence host emulator.
// Speaks the host side of the frame protocol over a Unix socket so the
// client can be exercised without a running desktop application.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};

use super::protocol::{self, CMD_SET_ACTIVITY, EVT_READY, Frame, HEADER_LEN, Header, Opcode};

fn invalid_data(err: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Listening side of the presence host.
pub struct PresenceHost {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl PresenceHost {
    /// Bind to the given socket path.
    /// Removes any stale socket file that may exist.
    pub fn bind(socket_path: impl AsRef<Path>) -> io::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Block until a client connects.
    pub fn accept(&self) -> io::Result<HostConnection> {
        let (stream, _addr) = self.listener.accept()?;
        Ok(HostConnection { stream })
    }

    /// Remove the socket file
    pub fn cleanup(&self) -> io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        Ok(())
    }
}

impl Drop for PresenceHost {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// One accepted client connection.
pub struct HostConnection {
    stream: UnixStream,
}

impl HostConnection {
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    /// Read the next frame. Returns `None` once the client hangs up.
    pub fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        let mut head = [0u8; HEADER_LEN];
        match self.stream.read_exact(&mut head) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let header = Header::parse(&head).map_err(invalid_data)?;
        let mut body = vec![0u8; header.payload_len().map_err(invalid_data)?];
        self.stream.read_exact(&mut body)?;

        Frame::from_parts(header.opcode, &body)
            .map(Some)
            .map_err(invalid_data)
    }

    pub fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let bytes = frame.encode().map_err(invalid_data)?;
        self.write_raw(&bytes)
    }

    /// Write bytes as-is, for replies that break the protocol on purpose.
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    /// Answer frames until the client sends CLOSE or hangs up.
    /// The responder decides the reply for each frame; `None` sends nothing.
    /// Returns the frames received.
    pub fn serve<F>(&mut self, mut responder: F) -> io::Result<Vec<Frame>>
    where
        F: FnMut(&Frame) -> Option<Frame>,
    {
        let mut received = Vec::new();
        while let Some(frame) = self.read_frame()? {
            if let Some(reply) = responder(&frame) {
                self.write_frame(&reply)?;
            }
            let closing = frame.opcode == Opcode::Close;
            received.push(frame);
            if closing {
                break;
            }
        }
        Ok(received)
    }
}

/// The READY dispatch a host sends after AUTHENTICATE.
pub fn ready_frame() -> Frame {
    Frame::new(
        Opcode::Frame,
        json!({
            "cmd": "DISPATCH",
            "evt": EVT_READY,
            "data": {"v": protocol::PROTOCOL_VERSION, "config": {}},
            "nonce": null,
        }),
    )
}

/// Confirmation for a SET_ACTIVITY request, echoing its nonce and activity.
pub fn confirm_frame(request: &Frame) -> Frame {
    Frame::new(
        Opcode::Frame,
        json!({
            "cmd": CMD_SET_ACTIVITY,
            "data": request.payload["args"]["activity"].clone(),
            "evt": null,
            "nonce": request.payload.get("nonce").cloned().unwrap_or(Value::Null),
        }),
    )
}

/// Default host behavior: READY on AUTHENTICATE, confirm every command.
pub fn default_reply(frame: &Frame) -> Option<Frame> {
    match frame.opcode {
        Opcode::Authenticate => Some(ready_frame()),
        Opcode::Frame => Some(confirm_frame(frame)),
        Opcode::Close => None,
    }
}
