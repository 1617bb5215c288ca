//! Optional TOML configuration file.
//!
//! Every key is optional; anything omitted keeps the built-in default (or is
//! later overridden by environment variables and CLI flags, see `main.rs`).
//!
//! ```toml
//! port = 3000
//! bind = "0.0.0.0"
//! static_dir = "frontend/dist"
//! ping_interval = 5       # seconds
//! ping_timeout = 10       # seconds
//!
//! [ssh]
//! ready_timeout = 20      # seconds
//! term = "xterm-256color"
//! auth_failure_message = "身份验证失败，请检查您的凭据。"
//!
//! [ssh.algorithms]
//! kex = ["curve25519-sha256", "ecdh-sha2-nistp256"]
//! cipher = ["aes128-ctr", "chacha20-poly1305@openssh.com"]
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::config::{AlgorithmPreferences, RelayConfig};

/// Error type for configuration file loading.
#[derive(Debug, Error)]
pub enum FileConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk shape of the configuration file.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub static_dir: Option<PathBuf>,
    pub ping_interval: Option<u64>,
    pub ping_timeout: Option<u64>,
    #[serde(default)]
    pub ssh: FileSshConfig,
}

/// `[ssh]` table.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSshConfig {
    pub ready_timeout: Option<u64>,
    pub term: Option<String>,
    pub auth_failure_message: Option<String>,
    pub algorithms: Option<AlgorithmPreferences>,
}

impl FileConfig {
    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// [`FileConfigError::Io`] if the file cannot be read (a missing file is
    /// an error here: the caller asked for it explicitly) and
    /// [`FileConfigError::Parse`] if the TOML is malformed or has unknown keys.
    pub fn load(path: &Path) -> Result<Self, FileConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| FileConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| FileConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overwrites the fields of `config` that this file sets.
    pub fn apply(self, config: &mut RelayConfig) {
        if let Some(ip) = self.bind {
            config.bind_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(dir) = self.static_dir {
            config.static_dir = dir;
        }
        if let Some(secs) = self.ping_interval {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.ping_timeout {
            config.ping_timeout = Duration::from_secs(secs);
        }

        let ssh = self.ssh;
        if let Some(secs) = ssh.ready_timeout {
            config.ssh.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(term) = ssh.term {
            config.ssh.term = term;
        }
        if let Some(message) = ssh.auth_failure_message {
            config.ssh.auth_failure_message = message;
        }
        if let Some(algorithms) = ssh.algorithms {
            config.ssh.algorithms = algorithms;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_changes_nothing() {
        // Arrange
        let file: FileConfig = toml::from_str("").unwrap();
        let mut cfg = RelayConfig::default();

        // Act
        file.apply(&mut cfg);

        // Assert
        assert_eq!(cfg.bind_addr, RelayConfig::default().bind_addr);
        assert_eq!(cfg.ssh.term, "xterm-256color");
    }

    #[test]
    fn test_full_file_overrides_every_field() {
        // Arrange
        let text = r#"
            port = 8022
            bind = "127.0.0.1"
            static_dir = "/srv/relay"
            ping_interval = 15
            ping_timeout = 45

            [ssh]
            ready_timeout = 7
            term = "vt100"
            auth_failure_message = "Anmeldung fehlgeschlagen"

            [ssh.algorithms]
            kex = ["curve25519-sha256"]
        "#;
        let mut cfg = RelayConfig::default();

        // Act
        toml::from_str::<FileConfig>(text).unwrap().apply(&mut cfg);

        // Assert
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8022");
        assert_eq!(cfg.static_dir, PathBuf::from("/srv/relay"));
        assert_eq!(cfg.ping_interval, Duration::from_secs(15));
        assert_eq!(cfg.ping_timeout, Duration::from_secs(45));
        assert_eq!(cfg.ssh.ready_timeout, Duration::from_secs(7));
        assert_eq!(cfg.ssh.term, "vt100");
        assert_eq!(cfg.ssh.auth_failure_message, "Anmeldung fehlgeschlagen");
        assert_eq!(cfg.ssh.algorithms.kex, vec!["curve25519-sha256"]);
        // Lists not named in the table keep their defaults.
        assert_eq!(
            cfg.ssh.algorithms.cipher,
            AlgorithmPreferences::default().cipher
        );
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = toml::from_str::<FileConfig>("prot = 3000");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reports_missing_file_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, FileConfigError::Io { .. }));
    }

    #[test]
    fn test_load_reports_bad_toml_as_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let err = FileConfig::load(&path).unwrap_err();

        assert!(matches!(err, FileConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "port = 4000\n").unwrap();

        let file = FileConfig::load(&path).unwrap();

        assert_eq!(file.port, Some(4000));
    }
}
