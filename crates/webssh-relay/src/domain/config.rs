//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! `main.rs` assembles it from built-in defaults, an optional TOML file,
//! environment variables and CLI flags, then shares it across connections
//! behind an `Arc`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default user-facing message for a rejected login.
///
/// Override it with `[ssh] auth_failure_message` in the config file.
pub const DEFAULT_AUTH_FAILURE_MESSAGE: &str = "身份验证失败，请检查您的凭据。";

/// Default terminal type announced in the PTY request.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// A configuration value that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid configuration value for {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

/// All runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// Directory holding the built front-end bundle.
    ///
    /// Unmatched paths fall back to `index.html` in this directory.
    pub static_dir: PathBuf,

    /// How often the gateway pings each browser.
    pub ping_interval: Duration,

    /// Silence from a browser longer than this closes its connection.
    pub ping_timeout: Duration,

    /// Settings applied to every outgoing SSH session.
    pub ssh: SshSettings,
}

/// Settings for outgoing SSH sessions.
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Upper bound on TCP connect + handshake + authentication.
    pub ready_timeout: Duration,

    /// `TERM` value sent with the PTY request.
    pub term: String,

    /// Message shown to the browser when authentication fails.
    pub auth_failure_message: String,

    /// Ordered algorithm preferences for negotiation.
    pub algorithms: AlgorithmPreferences,
}

/// Ordered algorithm preference lists, most preferred first.
///
/// Names use the SSH wire spelling (`curve25519-sha256`, `aes128-ctr`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmPreferences {
    pub kex: Vec<String>,
    pub cipher: Vec<String>,
    pub server_host_key: Vec<String>,
    pub hmac: Vec<String>,
}

impl Default for AlgorithmPreferences {
    /// Fast modern algorithms first, with broadly deployed fallbacks.
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| (*s).to_string()).collect()
        }

        Self {
            kex: names(&[
                "curve25519-sha256",
                "curve25519-sha256@libssh.org",
                "ecdh-sha2-nistp256",
                "ecdh-sha2-nistp384",
                "ecdh-sha2-nistp521",
                "diffie-hellman-group-exchange-sha256",
                "diffie-hellman-group14-sha256",
            ]),
            cipher: names(&[
                "aes128-ctr",
                "aes192-ctr",
                "aes256-ctr",
                "aes128-gcm@openssh.com",
                "aes256-gcm@openssh.com",
                "chacha20-poly1305@openssh.com",
            ]),
            server_host_key: names(&[
                "ssh-ed25519",
                "ecdsa-sha2-nistp256",
                "ecdsa-sha2-nistp384",
                "ecdsa-sha2-nistp521",
                "ssh-rsa",
            ]),
            hmac: names(&[
                "hmac-sha2-256-etm@openssh.com",
                "hmac-sha2-512-etm@openssh.com",
                "hmac-sha2-256",
                "hmac-sha2-512",
            ]),
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            term: DEFAULT_TERM.to_string(),
            auth_failure_message: DEFAULT_AUTH_FAILURE_MESSAGE.to_string(),
            algorithms: AlgorithmPreferences::default(),
        }
    }
}

impl Default for RelayConfig {
    /// | Field           | Default         |
    /// |-----------------|-----------------|
    /// | bind_addr       | `0.0.0.0:3000`  |
    /// | static_dir      | `frontend/dist` |
    /// | ping_interval   | 5 seconds       |
    /// | ping_timeout    | 10 seconds      |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            static_dir: PathBuf::from("frontend/dist"),
            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(10),
            ssh: SshSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Checks cross-field constraints that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval.is_zero() {
            return Err(ConfigError {
                field: "ping_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ping_timeout <= self.ping_interval {
            return Err(ConfigError {
                field: "ping_timeout",
                reason: format!(
                    "must exceed ping_interval ({}s)",
                    self.ping_interval.as_secs()
                ),
            });
        }
        if self.ssh.ready_timeout.is_zero() {
            return Err(ConfigError {
                field: "ready_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ssh.term.trim().is_empty() {
            return Err(ConfigError {
                field: "term",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
