//! webssh-relay library crate.
//!
//! Relays a browser terminal to a remote SSH shell: the browser speaks a small
//! JSON event protocol over a WebSocket, and each connection gets its own SSH
//! session with an interactive PTY.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON events over WebSocket)
//!         ↕
//! [webssh-relay]
//!   ├── domain/           Pure types: client/server events, session state, config
//!   ├── application/      Request validation, SessionBridge, UTF-8 output decoding
//!   └── infrastructure/
//!         ├── ws_server/     axum gateway: /socket upgrade + static assets
//!         ├── remote_shell/  russh connector and shell channel
//!         └── config_file/   optional TOML settings
//!         ↕
//! SSH server (PTY + shell)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and defines the [`ShellConnector`] /
//!   [`RemoteShell`] seam; it never names `russh` or `axum`.
//! - `infrastructure` implements the seam and owns every socket.
//!
//! [`ShellConnector`]: application::ShellConnector
//! [`RemoteShell`]: application::RemoteShell

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: per-connection session logic.
pub mod application;

/// Infrastructure layer: HTTP/WebSocket gateway, SSH client, config file.
pub mod infrastructure;
