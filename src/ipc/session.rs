use std::fmt;
use std::io;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::endpoint::Endpoint;
use super::error::{IpcError, ProtocolError, Result};
use super::nonce::Nonce;
use super::protocol::{self, CMD_SET_ACTIVITY, EVT_READY, Frame, HEADER_LEN, Header, Opcode, Response};
use super::transport::{PlatformTransport, Transport, platform_transport};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
    /// Reconnect budget spent. The session will not connect again.
    Exhausted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one guarded transport step.
enum Step<V> {
    Done(V),
    /// The step failed and the session reconnected; nothing was produced.
    Reconnected,
}

/// Result of one SET_ACTIVITY exchange.
enum Attempt {
    Confirmed(Value),
    Reconnected,
    Empty,
}

/// Authenticated connection to a presence host.
///
/// Every read and write goes through the reconnect policy: a transport
/// failure closes the connection, bumps the reconnect counter and runs the
/// handshake again. A failure that finds the counter already past the
/// threshold exhausts the session, and every call then fails with
/// [`IpcError::ReconnectExhausted`].
pub struct Session<T: Transport = PlatformTransport> {
    client_id: String,
    transport: T,
    state: SessionState,
    reconnect_counter: u32,
    reconnect_threshold: u32,
}

impl Session<PlatformTransport> {
    /// Session against the platform default endpoint.
    pub fn new(client_id: impl Into<String>, reconnect_threshold: u32) -> Self {
        Self::with_transport(
            client_id,
            reconnect_threshold,
            platform_transport(Endpoint::resolve(), None),
        )
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(client_id: impl Into<String>, reconnect_threshold: u32, transport: T) -> Self {
        Self {
            client_id: client_id.into(),
            transport,
            state: SessionState::Disconnected,
            reconnect_counter: 0,
            reconnect_threshold,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_counter
    }

    pub fn reconnect_threshold(&self) -> u32 {
        self.reconnect_threshold
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the transport and authenticate.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Exhausted => return Err(self.exhausted()),
            other => {
                return Err(IpcError::InvalidState {
                    expected: SessionState::Disconnected.as_str(),
                    actual: other.as_str(),
                });
            }
        }

        self.state = SessionState::Connecting;
        if let Err(err) = self.transport.open() {
            self.state = SessionState::Disconnected;
            return Err(err);
        }

        match self.handshake() {
            Ok(()) => {
                self.state = SessionState::Authenticated;
                info!(client_id = %self.client_id, "connected to presence host");
                Ok(())
            }
            Err(err) => {
                if self.state != SessionState::Exhausted {
                    self.transport.close();
                    self.state = SessionState::Disconnected;
                }
                Err(err)
            }
        }
    }

    fn handshake(&mut self) -> Result<()> {
        let hello = protocol::authenticate(&self.client_id);
        let Step::Done(()) = self.send(&hello)? else {
            // A nested reconnect already authenticated the new connection.
            return Ok(());
        };
        let Step::Done(header) = self.read_header()? else {
            return Ok(());
        };
        let len = header.payload_len()?;
        if len == 0 {
            return Err(ProtocolError::EmptyResponse.into());
        }
        let Step::Done(body) = self.read_payload(len)? else {
            return Ok(());
        };

        let frame = Frame::from_parts(header.opcode, &body)?;
        let response = Response::from_payload(&frame.payload)?;
        if frame.opcode != Opcode::Frame {
            let reason = response
                .data
                .get("message")
                .or_else(|| frame.payload.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(ProtocolError::Handshake(format!(
                "host answered with opcode {}: {reason}",
                header.opcode
            ))
            .into());
        }
        if let Some(err) = response.host_error() {
            return Err(ProtocolError::Handshake(err.to_string()).into());
        }
        if !response.is_event(EVT_READY) {
            return Err(ProtocolError::Handshake(format!(
                "expected {EVT_READY} event, got {:?}",
                response.evt
            ))
            .into());
        }

        debug!("handshake complete");
        Ok(())
    }

    /// Publish an activity and return the host's confirmation payload.
    ///
    /// Transport failures are retried transparently while the reconnect
    /// budget lasts. An empty response is retried once.
    pub fn set_activity<A: Serialize + ?Sized>(&mut self, activity: &A, pid: u32) -> Result<Value> {
        let activity = serde_json::to_value(activity).map_err(ProtocolError::from)?;
        let mut retried_empty = false;

        loop {
            self.ensure_authenticated()?;
            let attempt = match self.exchange_activity(&activity, pid) {
                Ok(attempt) => attempt,
                Err(err) => {
                    self.discard_if_desynced(&err);
                    return Err(err);
                }
            };
            match attempt {
                Attempt::Confirmed(payload) => return Ok(payload),
                Attempt::Reconnected => {
                    debug!("retrying SET_ACTIVITY after reconnect");
                }
                Attempt::Empty if !retried_empty => {
                    debug!("empty response, retrying SET_ACTIVITY");
                    retried_empty = true;
                }
                Attempt::Empty => return Err(ProtocolError::EmptyResponse.into()),
            }
        }
    }

    fn ensure_authenticated(&mut self) -> Result<()> {
        match self.state {
            SessionState::Authenticated => Ok(()),
            SessionState::Disconnected => self.connect(),
            SessionState::Exhausted => Err(self.exhausted()),
            SessionState::Connecting => Err(IpcError::InvalidState {
                expected: SessionState::Authenticated.as_str(),
                actual: SessionState::Connecting.as_str(),
            }),
        }
    }

    fn exchange_activity(&mut self, activity: &Value, pid: u32) -> Result<Attempt> {
        let nonce = Nonce::generate();
        debug!(%nonce, pid, "sending SET_ACTIVITY");

        let request = protocol::set_activity(activity.clone(), pid, &nonce);
        let Step::Done(()) = self.send(&request)? else {
            return Ok(Attempt::Reconnected);
        };
        let Step::Done(header) = self.read_header()? else {
            return Ok(Attempt::Reconnected);
        };
        let len = header.payload_len()?;
        if len == 0 {
            return Ok(Attempt::Empty);
        }
        let Step::Done(body) = self.read_payload(len)? else {
            return Ok(Attempt::Reconnected);
        };

        let frame = Frame::from_parts(header.opcode, &body)?;
        let response = Response::from_payload(&frame.payload)?;
        if let Some(err) = response.host_error() {
            return Err(err.into());
        }
        if response.cmd.as_deref() != Some(CMD_SET_ACTIVITY) {
            return Err(ProtocolError::UnexpectedCommand(response.cmd).into());
        }
        if !nonce.matches(response.nonce.as_deref()) {
            return Err(ProtocolError::NonceMismatch {
                expected: nonce.into(),
                actual: response.nonce,
            }
            .into());
        }

        Ok(Attempt::Confirmed(frame.payload))
    }

    /// Drop the connection after a reply that may have left bytes behind.
    /// The next call connects again on a clean stream. Host ERROR events are
    /// complete replies and keep the connection.
    fn discard_if_desynced(&mut self, err: &IpcError) {
        let IpcError::Protocol(cause) = err else {
            return;
        };
        if matches!(cause, ProtocolError::Host { .. }) || self.state != SessionState::Authenticated {
            return;
        }
        debug!(error = %cause, "dropping connection after protocol error");
        self.transport.close();
        self.state = SessionState::Disconnected;
    }

    /// Best-effort CLOSE, then drop the transport. Never fails.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Authenticated {
            match protocol::close().encode() {
                Ok(bytes) => {
                    if let Err(err) = self.transport.write(&bytes) {
                        debug!(error = %err, "ignoring failed CLOSE");
                    }
                }
                Err(err) => debug!(error = %err, "could not encode CLOSE"),
            }
        }
        self.transport.close();
        if self.state != SessionState::Exhausted {
            self.state = SessionState::Disconnected;
        }
    }

    fn send(&mut self, frame: &Frame) -> Result<Step<()>> {
        let bytes = frame.encode()?;
        let outcome = self.transport.write(&bytes);
        self.recover(outcome)
    }

    fn read_header(&mut self) -> Result<Step<Header>> {
        let outcome = self.transport.read(HEADER_LEN);
        match self.recover(outcome)? {
            Step::Done(bytes) => Ok(Step::Done(Header::parse(&bytes)?)),
            Step::Reconnected => Ok(Step::Reconnected),
        }
    }

    fn read_payload(&mut self, len: usize) -> Result<Step<Vec<u8>>> {
        let outcome = self.transport.read(len);
        self.recover(outcome)
    }

    fn recover<V>(&mut self, outcome: io::Result<V>) -> Result<Step<V>> {
        match outcome {
            Ok(value) => Ok(Step::Done(value)),
            Err(err) => {
                warn!(error = %err, "transport failure");
                self.reconnect()?;
                Ok(Step::Reconnected)
            }
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        self.transport.close();

        if self.reconnect_counter > self.reconnect_threshold {
            self.state = SessionState::Exhausted;
            warn!(
                attempts = self.reconnect_counter,
                threshold = self.reconnect_threshold,
                "ran out of reconnect attempts"
            );
            return Err(self.exhausted());
        }

        self.state = SessionState::Disconnected;
        self.reconnect_counter += 1;
        info!(
            attempt = self.reconnect_counter,
            threshold = self.reconnect_threshold,
            "reconnecting to presence host"
        );
        self.connect()
    }

    fn exhausted(&self) -> IpcError {
        IpcError::ReconnectExhausted {
            attempts: self.reconnect_counter,
            threshold: self.reconnect_threshold,
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("reconnect_counter", &self.reconnect_counter)
            .field("reconnect_threshold", &self.reconnect_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::rc::Rc;

    /// How the scripted host answers SET_ACTIVITY.
    #[derive(Debug, Clone, PartialEq)]
    enum Reply {
        Confirm,
        WrongNonce,
        WrongCommand,
        HostError(&'static str),
        Empty,
        EmptyOnce,
        Garbage,
        /// A header with a negative length, followed by a reply the client never asked for.
        BadLengthOnce,
        WrongNonceOnce,
    }

    struct HostState {
        present: bool,
        open: bool,
        opens: usize,
        fail_writes: usize,
        fail_reads: usize,
        ready: Frame,
        reply: Reply,
        inbox: VecDeque<u8>,
        received: Vec<Frame>,
    }

    impl Default for HostState {
        fn default() -> Self {
            Self {
                present: true,
                open: false,
                opens: 0,
                fail_writes: 0,
                fail_reads: 0,
                ready: Frame::new(Opcode::Frame, json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1}})),
                reply: Reply::Confirm,
                inbox: VecDeque::new(),
                received: Vec::new(),
            }
        }
    }

    impl HostState {
        fn push(&mut self, opcode: Opcode, body: &[u8]) {
            let header = Header {
                opcode: opcode.into(),
                length: body.len() as i32,
            };
            self.inbox.extend(header.to_bytes());
            self.inbox.extend(body);
        }

        fn push_frame(&mut self, frame: &Frame) {
            let bytes = frame.encode().unwrap();
            self.inbox.extend(bytes);
        }

        fn answer(&mut self, frame: &Frame) {
            match frame.opcode {
                Opcode::Authenticate => {
                    let ready = self.ready.clone();
                    self.push_frame(&ready);
                }
                Opcode::Close => {}
                Opcode::Frame => {
                    let nonce = frame.payload["nonce"].clone();
                    let confirm = json!({
                        "cmd": "SET_ACTIVITY",
                        "data": frame.payload["args"]["activity"].clone(),
                        "evt": null,
                        "nonce": nonce,
                    });
                    match self.reply.clone() {
                        Reply::Confirm => self.push_frame(&Frame::new(Opcode::Frame, confirm)),
                        Reply::WrongNonce => {
                            let mut payload = confirm;
                            payload["nonce"] = json!("00000000-0000-0000-0000-000000000000");
                            self.push_frame(&Frame::new(Opcode::Frame, payload));
                        }
                        Reply::WrongCommand => {
                            let mut payload = confirm;
                            payload["cmd"] = json!("SET_PRESENCE");
                            self.push_frame(&Frame::new(Opcode::Frame, payload));
                        }
                        Reply::HostError(message) => {
                            let payload = json!({
                                "cmd": "SET_ACTIVITY",
                                "evt": "ERROR",
                                "data": {"code": 4000, "message": message},
                                "nonce": nonce,
                            });
                            self.push_frame(&Frame::new(Opcode::Frame, payload));
                        }
                        Reply::Empty => self.push(Opcode::Frame, b""),
                        Reply::EmptyOnce => {
                            self.push(Opcode::Frame, b"");
                            self.reply = Reply::Confirm;
                        }
                        Reply::Garbage => self.push(Opcode::Frame, b"{\"cmd\":"),
                        Reply::BadLengthOnce => {
                            let header = Header {
                                opcode: Opcode::Frame.into(),
                                length: -1,
                            };
                            self.inbox.extend(header.to_bytes());
                            self.push_frame(&Frame::new(Opcode::Frame, confirm));
                            self.reply = Reply::Confirm;
                        }
                        Reply::WrongNonceOnce => {
                            let mut payload = confirm;
                            payload["nonce"] = json!("00000000-0000-0000-0000-000000000000");
                            self.push_frame(&Frame::new(Opcode::Frame, payload));
                            self.reply = Reply::Confirm;
                        }
                    }
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport(Rc<RefCell<HostState>>);

    impl ScriptedTransport {
        fn host(&self) -> std::cell::RefMut<'_, HostState> {
            self.0.borrow_mut()
        }
    }

    impl Transport for ScriptedTransport {
        fn open(&mut self) -> Result<()> {
            let mut host = self.host();
            if !host.present {
                return Err(IpcError::host_unavailable(PathBuf::from("/tmp/discord-ipc-0"), None));
            }
            host.open = true;
            host.opens += 1;
            host.inbox.clear();
            Ok(())
        }

        fn close(&mut self) {
            let mut host = self.host();
            host.open = false;
            host.inbox.clear();
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            let mut host = self.host();
            if !host.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            if host.fail_writes > 0 {
                host.fail_writes -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            let frame = Frame::decode(bytes).expect("client sent a malformed frame");
            host.answer(&frame);
            host.received.push(frame);
            Ok(())
        }

        fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
            let mut host = self.host();
            if !host.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            if host.fail_reads > 0 {
                host.fail_reads -= 1;
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            if host.inbox.len() < len {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no data"));
            }
            Ok(host.inbox.drain(..len).collect())
        }

        fn is_open(&self) -> bool {
            self.0.borrow().open
        }
    }

    fn session(threshold: u32) -> (Session<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::default();
        let session = Session::with_transport("492721776145596416", threshold, transport.clone());
        (session, transport)
    }

    fn connected(threshold: u32) -> (Session<ScriptedTransport>, ScriptedTransport) {
        let (mut session, transport) = session(threshold);
        session.connect().unwrap();
        (session, transport)
    }

    fn sent_opcodes(transport: &ScriptedTransport) -> Vec<Opcode> {
        transport.host().received.iter().map(|f| f.opcode).collect()
    }

    #[test]
    fn new_session_starts_disconnected() {
        let (session, transport) = session(5);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.reconnect_count(), 0);
        assert_eq!(session.reconnect_threshold(), 5);
        assert_eq!(session.client_id(), "492721776145596416");
        assert!(!transport.is_open());
    }

    #[test]
    fn connect_authenticates_with_client_id() {
        let (session, transport) = connected(5);
        assert_eq!(session.state(), SessionState::Authenticated);

        let host = transport.host();
        assert_eq!(host.opens, 1);
        assert_eq!(host.received.len(), 1);
        assert_eq!(host.received[0].opcode, Opcode::Authenticate);
        assert_eq!(
            host.received[0].payload,
            json!({"v": 1, "client_id": "492721776145596416"})
        );
    }

    #[test]
    fn connect_without_host_fails_before_handshake() {
        let (mut session, transport) = session(5);
        transport.host().present = false;

        let err = session.connect().unwrap_err();
        assert!(matches!(err, IpcError::HostUnavailable { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(transport.host().received.is_empty());
    }

    #[test]
    fn connect_twice_is_rejected() {
        let (mut session, _transport) = connected(5);
        let err = session.connect().unwrap_err();
        assert!(matches!(
            err,
            IpcError::InvalidState {
                actual: "authenticated",
                ..
            }
        ));
    }

    #[test]
    fn handshake_rejects_non_ready_event() {
        let (mut session, transport) = session(5);
        transport.host().ready = Frame::new(Opcode::Frame, json!({"evt": "SUBSCRIBE"}));

        let err = session.connect().unwrap_err();
        assert!(matches!(err, IpcError::Protocol(ProtocolError::Handshake(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!transport.is_open());
    }

    #[test]
    fn handshake_reports_host_close_reason() {
        let (mut session, transport) = session(5);
        transport.host().ready = Frame::new(
            Opcode::Close,
            json!({"code": 4000, "message": "Invalid Client ID"}),
        );

        let err = session.connect().unwrap_err();
        match err {
            IpcError::Protocol(ProtocolError::Handshake(reason)) => {
                assert!(reason.contains("Invalid Client ID"), "{reason}");
            }
            other => panic!("expected handshake error, got {other:?}"),
        }
    }

    #[test]
    fn set_activity_returns_confirmation() {
        let (mut session, transport) = connected(5);
        let confirmation = session
            .set_activity(&json!({"details": "Editing x.rs"}), 1234)
            .unwrap();

        assert_eq!(confirmation["cmd"], "SET_ACTIVITY");
        assert_eq!(confirmation["data"]["details"], "Editing x.rs");

        let host = transport.host();
        let request = &host.received[1];
        assert_eq!(request.opcode, Opcode::Frame);
        assert_eq!(request.payload["cmd"], "SET_ACTIVITY");
        assert_eq!(
            request.payload["args"],
            json!({"activity": {"details": "Editing x.rs"}, "pid": 1234})
        );
        assert_eq!(request.payload["nonce"], confirmation["nonce"]);
    }

    #[test]
    fn each_request_carries_a_fresh_nonce() {
        let (mut session, transport) = connected(5);
        session.set_activity(&json!({}), 1).unwrap();
        session.set_activity(&json!({}), 1).unwrap();

        let host = transport.host();
        assert_ne!(host.received[1].payload["nonce"], host.received[2].payload["nonce"]);
    }

    #[test]
    fn set_activity_connects_lazily() {
        let (mut session, transport) = session(5);
        session.set_activity(&json!({"state": "idle"}), 7).unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(sent_opcodes(&transport), vec![Opcode::Authenticate, Opcode::Frame]);
    }

    #[test]
    fn mismatched_nonce_is_a_protocol_error() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::WrongNonce;

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        assert!(matches!(
            err,
            IpcError::Protocol(ProtocolError::NonceMismatch { .. })
        ));
        assert_eq!(session.reconnect_count(), 0);
    }

    #[test]
    fn wrong_command_is_a_protocol_error() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::WrongCommand;

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        match err {
            IpcError::Protocol(ProtocolError::UnexpectedCommand(cmd)) => {
                assert_eq!(cmd.as_deref(), Some("SET_PRESENCE"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn host_error_event_carries_message() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::HostError("child \"activity\" fails");

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        match err {
            IpcError::Protocol(ProtocolError::Host { code, message }) => {
                assert_eq!(code, Some(4000));
                assert_eq!(message, "child \"activity\" fails");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::Garbage;

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        assert!(matches!(
            err,
            IpcError::Protocol(ProtocolError::MalformedJson(_))
        ));
    }

    #[test]
    fn empty_response_is_retried_once() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::EmptyOnce;

        session.set_activity(&json!({}), 1).unwrap();
        assert_eq!(
            sent_opcodes(&transport),
            vec![Opcode::Authenticate, Opcode::Frame, Opcode::Frame]
        );
    }

    #[test]
    fn repeated_empty_response_fails() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::Empty;

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        assert!(matches!(
            err,
            IpcError::Protocol(ProtocolError::EmptyResponse)
        ));
        assert_eq!(transport.host().received.len(), 3);
    }

    #[test]
    fn broken_pipe_on_write_reconnects_and_retries() {
        let (mut session, transport) = connected(5);
        transport.host().fail_writes = 1;

        let confirmation = session
            .set_activity(&json!({"details": "Editing x.rs"}), 1234)
            .unwrap();
        assert_eq!(confirmation["data"]["details"], "Editing x.rs");
        assert_eq!(session.reconnect_count(), 1);
        assert_eq!(session.state(), SessionState::Authenticated);

        // Second open re-ran the handshake before the retried request.
        assert_eq!(transport.host().opens, 2);
        assert_eq!(
            sent_opcodes(&transport),
            vec![Opcode::Authenticate, Opcode::Authenticate, Opcode::Frame]
        );
    }

    #[test]
    fn reset_on_header_read_reconnects_and_retries() {
        let (mut session, transport) = connected(5);
        transport.host().fail_reads = 1;

        session.set_activity(&json!({}), 1).unwrap();
        assert_eq!(session.reconnect_count(), 1);
        assert_eq!(
            sent_opcodes(&transport),
            vec![
                Opcode::Authenticate,
                Opcode::Frame,
                Opcode::Authenticate,
                Opcode::Frame
            ]
        );
    }

    #[test]
    fn exhausts_once_threshold_plus_one_reconnects_are_spent() {
        let threshold = 2;
        let (mut session, transport) = connected(threshold);
        transport.host().fail_writes = usize::MAX;

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        match err {
            IpcError::ReconnectExhausted {
                attempts,
                threshold: t,
            } => {
                assert_eq!(attempts, threshold + 1);
                assert_eq!(t, threshold);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Exhausted);
        // One initial open plus threshold + 1 reconnects.
        assert_eq!(transport.host().opens, 2 + threshold as usize);
        assert!(!transport.is_open());
    }

    #[test]
    fn exhausted_session_never_reconnects() {
        let (mut session, transport) = connected(1);
        transport.host().fail_writes = usize::MAX;
        assert!(session.set_activity(&json!({}), 1).is_err());
        let opens = transport.host().opens;

        transport.host().fail_writes = 0;
        let err = session.set_activity(&json!({}), 1).unwrap_err();
        assert!(matches!(err, IpcError::ReconnectExhausted { .. }));
        assert!(matches!(
            session.connect().unwrap_err(),
            IpcError::ReconnectExhausted { .. }
        ));
        assert_eq!(transport.host().opens, opens);
    }

    #[test]
    fn zero_threshold_still_allows_one_reconnect() {
        let (mut session, transport) = connected(0);
        transport.host().fail_writes = 1;

        session.set_activity(&json!({"state": "a"}), 1).unwrap();
        assert_eq!(session.reconnect_count(), 1);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(transport.host().opens, 2);

        transport.host().fail_writes = 1;
        let err = session.set_activity(&json!({"state": "b"}), 1).unwrap_err();
        assert!(matches!(err, IpcError::ReconnectExhausted { attempts: 1, threshold: 0 }));
        assert_eq!(session.state(), SessionState::Exhausted);
        assert_eq!(transport.host().opens, 2);
    }

    #[test]
    fn invalid_length_drops_connection_and_next_call_starts_clean() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::BadLengthOnce;

        let err = session.set_activity(&json!({"state": "a"}), 1).unwrap_err();
        assert!(matches!(err, IpcError::Protocol(ProtocolError::InvalidLength(-1))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!transport.is_open());

        // The unread reply is gone with the old connection.
        let confirmation = session.set_activity(&json!({"state": "b"}), 1).unwrap();
        assert_eq!(confirmation["data"]["state"], "b");
        assert_eq!(session.reconnect_count(), 0);
        assert_eq!(transport.host().opens, 2);
    }

    #[test]
    fn nonce_mismatch_drops_connection() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::WrongNonceOnce;

        assert!(session.set_activity(&json!({}), 1).is_err());
        assert_eq!(session.state(), SessionState::Disconnected);

        session.set_activity(&json!({"state": "b"}), 1).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(
            sent_opcodes(&transport),
            vec![
                Opcode::Authenticate,
                Opcode::Frame,
                Opcode::Authenticate,
                Opcode::Frame
            ]
        );
    }

    #[test]
    fn host_error_keeps_connection() {
        let (mut session, transport) = connected(5);
        transport.host().reply = Reply::HostError("bad activity");

        assert!(session.set_activity(&json!({}), 1).is_err());
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(transport.is_open());
        assert_eq!(transport.host().opens, 1);
    }

    #[test]
    fn reconnect_counter_accumulates_across_calls() {
        let (mut session, transport) = connected(5);
        transport.host().fail_writes = 1;
        session.set_activity(&json!({}), 1).unwrap();
        transport.host().fail_reads = 1;
        session.set_activity(&json!({}), 1).unwrap();

        assert_eq!(session.reconnect_count(), 2);
    }

    #[test]
    fn reconnect_surfaces_missing_host() {
        let (mut session, transport) = connected(5);
        {
            let mut host = transport.host();
            host.fail_writes = 1;
            host.present = false;
        }

        let err = session.set_activity(&json!({}), 1).unwrap_err();
        assert!(matches!(err, IpcError::HostUnavailable { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn shutdown_sends_close_and_closes_transport() {
        let (mut session, transport) = connected(5);
        session.shutdown();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!transport.is_open());
        let host = transport.host();
        let last = host.received.last().unwrap();
        assert_eq!(last.opcode, Opcode::Close);
        assert_eq!(last.payload, json!({}));
    }

    #[test]
    fn shutdown_on_never_connected_session_is_silent() {
        let (mut session, transport) = session(5);
        session.shutdown();
        session.shutdown();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!transport.is_open());
        assert!(transport.host().received.is_empty());
    }

    #[test]
    fn shutdown_swallows_write_failure() {
        let (mut session, transport) = connected(5);
        transport.host().fail_writes = 1;
        session.shutdown();

        assert!(!transport.is_open());
        assert_eq!(session.reconnect_count(), 0);
    }

    #[test]
    fn drop_shuts_down() {
        let (session, transport) = connected(5);
        drop(session);

        assert!(!transport.is_open());
        assert_eq!(sent_opcodes(&transport).last(), Some(&Opcode::Close));
    }
}
