//! Domain layer for webssh-relay.
//!
//! Pure types with no I/O: the JSON event language spoken with the browser,
//! the per-connection session state machine, and configuration structures.
//! No `tokio`, sockets or SSH types belong here.

pub mod config;
pub mod messages;
pub mod session;

pub use config::{AlgorithmPreferences, ConfigError, RelayConfig, SshSettings};
pub use messages::{ClientEvent, ConnectRequest, PortField, ServerEvent, SessionStatus, TermSize};
pub use session::{SessionState, SessionStateError};
