//! Infrastructure layer for webssh-relay.
//!
//! Everything that touches a socket or the file system lives here:
//!
//! - [`ws_server`]: the `axum` HTTP/WebSocket gateway and static assets
//! - [`remote_shell`]: the `russh` SSH client, plus an in-memory mock host
//! - [`config_file`]: the optional TOML configuration file
//!
//! Event translation and session rules belong to the application layer;
//! message and config types belong to the domain layer.

pub mod config_file;
pub mod remote_shell;
pub mod ws_server;

pub use config_file::{FileConfig, FileConfigError};
pub use remote_shell::RusshConnector;
pub use ws_server::{build_router, run_server, serve, AppState};
