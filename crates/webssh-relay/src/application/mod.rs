//! Application layer for webssh-relay.
//!
//! Knows *what* a session bridge does: validate connect requests, translate
//! browser events into commands, sequence the session state machine and
//! forward terminal bytes.  It reaches the network only through the
//! [`ShellConnector`] / [`RemoteShell`] traits, so every path here runs in
//! tests without an SSH server.

pub mod bridge_service;
pub mod session_bridge;

pub use bridge_service::{
    client_message, malformed_connect_field, translate_client_event, validate_connect_request,
    BridgeCommand, BridgeError, Credential, OutputDecoder, SshTarget,
};
pub use session_bridge::{RemoteShell, SessionBridge, ShellConnector};
