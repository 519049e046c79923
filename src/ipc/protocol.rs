use serde::Deserialize;
use serde_json::{Value, json};

use super::error::ProtocolError;
use super::nonce::Nonce;

/// Size of the fixed frame header: opcode + payload length, both `i32` LE.
pub const HEADER_LEN: usize = 8;

/// Upper bound on a payload we are willing to read from the host.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 1;
pub const CMD_SET_ACTIVITY: &str = "SET_ACTIVITY";
pub const EVT_READY: &str = "READY";
pub const EVT_ERROR: &str = "ERROR";

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Authenticate = 0,
    Frame = 1,
    Close = 2,
}

impl TryFrom<i32> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Authenticate),
            1 => Ok(Self::Frame),
            2 => Ok(Self::Close),
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }
}

impl From<Opcode> for i32 {
    fn from(op: Opcode) -> Self {
        op as i32
    }
}

/// The raw 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub opcode: i32,
    pub length: i32,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; HEADER_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidLength(bytes.len() as i64))?;
        let [o0, o1, o2, o3, l0, l1, l2, l3] = bytes;
        Ok(Self {
            opcode: i32::from_le_bytes([o0, o1, o2, o3]),
            length: i32::from_le_bytes([l0, l1, l2, l3]),
        })
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.opcode.to_le_bytes());
        out[4..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Payload length as a buffer size. Negative or oversized lengths are rejected.
    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        usize::try_from(self.length)
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LEN)
            .ok_or(ProtocolError::InvalidLength(i64::from(self.length)))
    }
}

/// One opcode-tagged JSON message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Value,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Value) -> Self {
        Self { opcode, payload }
    }

    /// Serialize to wire bytes: header followed by compact UTF-8 JSON.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = serde_json::to_vec(&self.payload)?;
        if body.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidLength(body.len() as i64));
        }
        let header = Header {
            opcode: self.opcode.into(),
            length: body.len() as i32,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one complete frame. The buffer must hold exactly the header and its payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::InvalidLength(bytes.len() as i64));
        }
        let (head, body) = bytes.split_at(HEADER_LEN);
        let header = Header::parse(head)?;
        if header.payload_len()? != body.len() {
            return Err(ProtocolError::InvalidLength(body.len() as i64));
        }
        Self::from_parts(header.opcode, body)
    }

    /// Build a frame from a header opcode and the payload read after it.
    pub fn from_parts(opcode: i32, body: &[u8]) -> Result<Self, ProtocolError> {
        let opcode = Opcode::try_from(opcode)?;
        let payload = serde_json::from_slice(body)?;
        Ok(Self { opcode, payload })
    }
}

/// AUTHENTICATE payload. The client id always goes out as a string.
pub fn authenticate(client_id: &str) -> Frame {
    Frame::new(
        Opcode::Authenticate,
        json!({ "v": PROTOCOL_VERSION, "client_id": client_id }),
    )
}

/// SET_ACTIVITY command frame.
pub fn set_activity(activity: Value, pid: u32, nonce: &Nonce) -> Frame {
    Frame::new(
        Opcode::Frame,
        json!({
            "cmd": CMD_SET_ACTIVITY,
            "args": { "activity": activity, "pid": pid },
            "nonce": nonce.as_str(),
        }),
    )
}

/// CLOSE frame sent on shutdown.
pub fn close() -> Frame {
    Frame::new(Opcode::Close, json!({}))
}

/// Fields of a host message the session inspects.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub evt: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Response {
    pub fn from_payload(payload: &Value) -> Result<Self, ProtocolError> {
        Ok(Self::deserialize(payload)?)
    }

    pub fn is_event(&self, evt: &str) -> bool {
        self.evt.as_deref() == Some(evt)
    }

    /// The host's error, if this is an ERROR event.
    pub fn host_error(&self) -> Option<ProtocolError> {
        if !self.is_event(EVT_ERROR) {
            return None;
        }
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let code = self.data.get("code").and_then(Value::as_i64);
        Some(ProtocolError::Host { code, message })
    }
}
