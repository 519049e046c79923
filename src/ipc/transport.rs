use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::debug;

use super::endpoint::Endpoint;
use super::error::IpcError;

/// Blocking byte stream to the presence host.
pub trait Transport {
    /// Probe the endpoint and connect. Fails with `HostUnavailable`.
    fn open(&mut self) -> Result<(), IpcError>;

    /// Drop the connection. Safe to call when closed, never fails.
    fn close(&mut self);

    /// Write all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read exactly `len` bytes.
    fn read(&mut self, len: usize) -> io::Result<Vec<u8>>;

    fn is_open(&self) -> bool;
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is not open")
}

fn read_exact_from(reader: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Unix domain socket transport. The stream stays open across calls.
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixTransport {
    endpoint: Endpoint,
    timeout: Option<Duration>,
    stream: Option<std::os::unix::net::UnixStream>,
}

#[cfg(unix)]
impl UnixTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: None,
            stream: None,
        }
    }

    /// Read/write deadline. A timeout surfaces as a transport failure.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn stream(&mut self) -> io::Result<&mut std::os::unix::net::UnixStream> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

#[cfg(unix)]
impl Transport for UnixTransport {
    fn open(&mut self) -> Result<(), IpcError> {
        use std::os::unix::net::UnixStream;

        let path = self.endpoint.path();
        if !self.endpoint.exists() {
            return Err(IpcError::host_unavailable(path, None));
        }
        let stream = UnixStream::connect(path)
            .map_err(|e| IpcError::host_unavailable(path, Some(e)))?;
        stream
            .set_read_timeout(self.timeout)
            .and_then(|_| stream.set_write_timeout(self.timeout))
            .map_err(|e| IpcError::host_unavailable(path, Some(e)))?;

        debug!(path = %path.display(), "opened unix socket");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Already-closed and broken-pipe errors are irrelevant here.
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        read_exact_from(self.stream()?, len)
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Windows named pipe transport.
///
/// Each write is flushed and the handle closed right after, so the next
/// operation reopens the pipe. Reads reopen on demand and close when done.
#[cfg(windows)]
#[derive(Debug)]
pub struct PipeTransport {
    endpoint: Endpoint,
    pipe: Option<std::fs::File>,
}

#[cfg(windows)]
impl PipeTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            pipe: None,
        }
    }

    /// Named pipes opened as files have no deadline support.
    pub fn with_timeout(self, _timeout: Option<Duration>) -> Self {
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn pipe(&mut self) -> io::Result<&mut std::fs::File> {
        if self.pipe.is_none() {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.endpoint.path())?;
            self.pipe = Some(file);
        }
        self.pipe.as_mut().ok_or_else(not_connected)
    }
}

#[cfg(windows)]
impl Transport for PipeTransport {
    fn open(&mut self) -> Result<(), IpcError> {
        let path = self.endpoint.path().to_path_buf();
        if !self.endpoint.exists() {
            return Err(IpcError::host_unavailable(path, None));
        }
        self.pipe()
            .map_err(|e| IpcError::host_unavailable(&path, Some(e)))?;
        debug!(path = %path.display(), "opened named pipe");
        Ok(())
    }

    fn close(&mut self) {
        self.pipe = None;
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let result = self.pipe().and_then(|pipe| {
            pipe.write_all(bytes)?;
            pipe.flush()
        });
        self.close();
        result
    }

    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let result = self.pipe().and_then(|pipe| read_exact_from(pipe, len));
        self.close();
        result
    }

    fn is_open(&self) -> bool {
        self.pipe.is_some()
    }
}

/// Transport chosen for the target platform at compile time.
#[cfg(unix)]
pub type PlatformTransport = UnixTransport;

/// Transport chosen for the target platform at compile time.
#[cfg(windows)]
pub type PlatformTransport = PipeTransport;

/// Build the platform transport for an endpoint.
pub fn platform_transport(endpoint: Endpoint, timeout: Option<Duration>) -> PlatformTransport {
    PlatformTransport::new(endpoint).with_timeout(timeout)
}
