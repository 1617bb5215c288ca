//! Pure translation and validation logic for the session bridge.
//!
//! Nothing in this module performs I/O.  It turns browser events into bridge
//! commands, validates connect requests into SSH targets, renders failures as
//! the messages the browser displays, and decodes shell output into text.
//!
//! ```text
//! Browser → Bridge:  ClientEvent     → BridgeCommand   translate_client_event()
//!                    ConnectRequest  → SshTarget       validate_connect_request()
//! Bridge  → Browser: BridgeError     → String          client_message()
//!                    shell bytes     → String          OutputDecoder::decode()
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::messages::{ClientEvent, ConnectRequest, PortField, TermSize};

// ── Error type ────────────────────────────────────────────────────────────────

/// Failures a session bridge reports to its browser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The connect request lacked a required field or carried a bad value.
    #[error("invalid connection request: {field}")]
    InvalidRequest { field: &'static str },

    /// TCP connect, handshake or negotiation failed, or the deadline passed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server rejected every credential offered.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Authentication succeeded but the PTY or shell request was refused.
    #[error("shell open failed: {0}")]
    ShellOpen(String),

    /// Writing to or resizing an open channel failed.
    #[error("channel transport failed: {0}")]
    Transport(String),

    /// A second connect request arrived while a session was live.
    #[error("an SSH session is already active on this connection")]
    AlreadyActive,
}

impl BridgeError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, BridgeError::Authentication(_))
    }
}

/// Renders `err` as the text shown in the browser's `error` event.
///
/// Authentication failures never echo the underlying detail; the browser gets
/// `auth_failure_message` so it can prompt for new credentials.
pub fn client_message(err: &BridgeError, auth_failure_message: &str) -> String {
    match err {
        BridgeError::InvalidRequest { field } => format!("Invalid connection request: {field}"),
        BridgeError::Handshake(detail) => format!("SSH Error: {detail}"),
        BridgeError::Authentication(_) => auth_failure_message.to_string(),
        BridgeError::ShellOpen(detail) => format!("Failed to open shell: {detail}"),
        BridgeError::Transport(detail) => format!("SSH Error: {detail}"),
        BridgeError::AlreadyActive => "SSH session already active".to_string(),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// What the gateway asks a session bridge to do.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    /// Open the SSH session (`open`).
    Connect(ConnectRequest),
    /// Bytes for the shell's stdin (`forward-in`).
    Input(Vec<u8>),
    /// New terminal dimensions (`resize`).
    Resize(TermSize),
    /// A `connect-ssh` event whose payload did not decode; `field` names the
    /// offending key.
    InvalidConnect { field: &'static str },
}

impl BridgeCommand {
    /// Short variant name for log lines; never includes the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeCommand::Connect(_) => "Connect",
            BridgeCommand::Input(_) => "Input",
            BridgeCommand::Resize(_) => "Resize",
            BridgeCommand::InvalidConnect { .. } => "InvalidConnect",
        }
    }
}

/// Translates a parsed browser event into a bridge command.
pub fn translate_client_event(event: ClientEvent) -> BridgeCommand {
    match event {
        ClientEvent::ConnectSsh(request) => BridgeCommand::Connect(request),
        ClientEvent::TerminalData(text) => BridgeCommand::Input(text.into_bytes()),
        ClientEvent::TerminalResize(size) => BridgeCommand::Resize(size),
    }
}

/// Names the field that kept a `connect-ssh` frame from decoding.
///
/// Returns `None` when `text` is not a `connect-ssh` event at all, so other
/// malformed frames are still skipped.  A payload that is not an object, or
/// fails for a reason no single field explains, is reported as `data`.
pub fn malformed_connect_field(text: &str) -> Option<&'static str> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("event")?.as_str()? != "connect-ssh" {
        return None;
    }
    let Some(data) = value.get("data").and_then(Value::as_object) else {
        return Some("data");
    };

    fn fits<T: DeserializeOwned>(data: &Map<String, Value>, key: &str) -> bool {
        data.get(key)
            .map_or(true, |v| serde_json::from_value::<Option<T>>(v.clone()).is_ok())
    }

    const TEXT_FIELDS: [&str; 6] = [
        "host",
        "username",
        "password",
        "privateKey",
        "passphrase",
        "authMethod",
    ];
    if let Some(key) = TEXT_FIELDS.into_iter().find(|key| !fits::<String>(data, key)) {
        return Some(key);
    }
    if !fits::<PortField>(data, "port") {
        return Some("port");
    }
    if !fits::<TermSize>(data, "termSize") {
        return Some("termSize");
    }
    Some("data")
}

// ── Connect request validation ────────────────────────────────────────────────

/// How the bridge proves its identity to the SSH server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey {
        /// OpenSSH or PEM encoded key text.
        pem: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey { .. } => f.write_str("PrivateKey(<redacted>)"),
        }
    }
}

/// A connect request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub term_size: TermSize,
}

/// Validates a browser connect request.
///
/// Key authentication is used when `authMethod` is `"key"` and a private key
/// is present; otherwise a password is required.  A missing `termSize` falls
/// back to 80x24, and zero dimensions are rejected.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] naming the first missing or
/// malformed field.
pub fn validate_connect_request(request: ConnectRequest) -> Result<SshTarget, BridgeError> {
    let host = non_blank(request.host.as_deref()).ok_or(BridgeError::InvalidRequest { field: "host" })?;
    let port = parse_port(request.port.as_ref())?;
    let username = non_blank(request.username.as_deref())
        .ok_or(BridgeError::InvalidRequest { field: "username" })?;

    let key = request
        .private_key
        .as_deref()
        .filter(|pem| !pem.trim().is_empty());

    let credential = match (request.wants_key_auth(), key, request.password) {
        (true, Some(pem), _) => Credential::PrivateKey {
            pem: pem.to_string(),
            passphrase: request.passphrase.filter(|p| !p.is_empty()),
        },
        (_, _, Some(password)) => Credential::Password(password),
        (true, None, None) => return Err(BridgeError::InvalidRequest { field: "privateKey" }),
        (false, _, None) => return Err(BridgeError::InvalidRequest { field: "password" }),
    };

    let term_size = request.term_size.unwrap_or_default();
    if term_size.rows == 0 || term_size.cols == 0 {
        return Err(BridgeError::InvalidRequest { field: "termSize" });
    }

    Ok(SshTarget {
        host: host.to_string(),
        port,
        username: username.to_string(),
        credential,
        term_size,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_port(port: Option<&PortField>) -> Result<u16, BridgeError> {
    let invalid = BridgeError::InvalidRequest { field: "port" };
    let value = match port {
        Some(PortField::Number(n)) => u16::try_from(*n).map_err(|_| invalid.clone())?,
        Some(PortField::Text(text)) => text.trim().parse::<u16>().map_err(|_| invalid.clone())?,
        None => return Err(invalid),
    };
    if value == 0 {
        return Err(invalid);
    }
    Ok(value)
}

// ── Output decoding ───────────────────────────────────────────────────────────

/// Streaming UTF-8 decoder for shell output.
///
/// The SSH channel delivers arbitrary byte chunks, so a multi-byte character
/// can straddle two chunks.  The decoder holds back an incomplete trailing
/// sequence (at most three bytes) and prepends it to the next chunk.  Bytes
/// that can never form valid UTF-8 are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    pending: Vec<u8>,
}

impl OutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one chunk.  Returns an empty string when the chunk held
    /// nothing but the start of a character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let cut = incomplete_tail_start(&self.pending);
        let tail = self.pending.split_off(cut);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    /// Flushes any held-back bytes, replacing them with U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Index where an unfinished UTF-8 sequence begins at the end of `buf`, or
/// `buf.len()` when the buffer ends on a character boundary.
fn incomplete_tail_start(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let i = len - back;
        let byte = buf[i];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if back < needed { i } else { len };
    }
    len
}

// ── Tests ─────────────────────────────────────────────────────────────────────
