//! SSH client side of the relay, built on `russh`.
//!
//! [`RusshConnector`] turns a validated [`SshTarget`] into an authenticated
//! [`RusshShell`]:
//!
//! 1. TCP connect with `TCP_NODELAY` (keystroke latency matters more than
//!    segment efficiency for an interactive terminal).
//! 2. SSH handshake using the configured algorithm preference order.
//! 3. Password or public-key authentication.
//!
//! Steps 1-3 share one `ready_timeout` deadline.  Opening the PTY and shell
//! afterwards is not time-bounded.
//!
//! Authentication failures are recognised from `russh`'s structured result
//! (`AuthResult::success()` and the `NotAuthenticated` / `NoAuthMethod`
//! variants), never from error message text.

pub mod mock;

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key::{self, HashAlg};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use russh::{cipher, kex, mac, Channel, ChannelMsg, Disconnect, Preferred};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::bridge_service::{BridgeError, Credential, SshTarget};
use crate::application::session_bridge::{RemoteShell, ShellConnector};
use crate::domain::config::{AlgorithmPreferences, SshSettings};
use crate::domain::messages::TermSize;

// ── Algorithm negotiation ─────────────────────────────────────────────────────

/// Builds the `russh` negotiation preferences from configured algorithm names.
///
/// Order is preserved.  Names `russh` does not implement are skipped with a
/// warning; a category that resolves to nothing keeps the library default.
/// The client extension markers are appended to the kex list so server-sig-algs
/// and strict key exchange still negotiate.
pub fn preferred_algorithms(prefs: &AlgorithmPreferences) -> Preferred {
    let defaults = Preferred::default();

    let mut kex_list = resolve("kex", &prefs.kex, |n| kex::Name::try_from(n).ok());
    if kex_list.is_empty() {
        kex_list = defaults.kex.to_vec();
    } else {
        kex_list.push(kex::EXTENSION_SUPPORT_AS_CLIENT);
        kex_list.push(kex::EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT);
    }

    let mut key_list = resolve("server host key", &prefs.server_host_key, |n| {
        ssh_key::Algorithm::new(n).ok()
    });
    if key_list.is_empty() {
        key_list = defaults.key.to_vec();
    }

    let mut cipher_list = resolve("cipher", &prefs.cipher, |n| cipher::Name::try_from(n).ok());
    if cipher_list.is_empty() {
        cipher_list = defaults.cipher.to_vec();
    }

    let mut mac_list = resolve("mac", &prefs.hmac, |n| mac::Name::try_from(n).ok());
    if mac_list.is_empty() {
        mac_list = defaults.mac.to_vec();
    }

    Preferred {
        kex: Cow::Owned(kex_list),
        key: Cow::Owned(key_list),
        cipher: Cow::Owned(cipher_list),
        mac: Cow::Owned(mac_list),
        ..defaults
    }
}

fn resolve<T>(category: &str, names: &[String], lookup: impl Fn(&str) -> Option<T>) -> Vec<T> {
    names
        .iter()
        .filter_map(|name| {
            let found = lookup(name);
            if found.is_none() {
                warn!("{category} algorithm '{name}' is not supported; skipping");
            }
            found
        })
        .collect()
}

// ── Client handler ────────────────────────────────────────────────────────────

/// `russh` callback object for one outgoing session.
struct RelayClientHandler {
    host: String,
}

impl client::Handler for RelayClientHandler {
    type Error = russh::Error;

    // Host keys are accepted without verification; the fingerprint is logged
    // so operators can audit what was trusted.
    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "host key for {}: {} {}",
            self.host,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Production [`ShellConnector`].
pub struct RusshConnector {
    config: Arc<client::Config>,
    ready_timeout: Duration,
}

impl RusshConnector {
    pub fn new(settings: &SshSettings) -> Self {
        let config = client::Config {
            preferred: preferred_algorithms(&settings.algorithms),
            ..client::Config::default()
        };
        Self {
            config: Arc::new(config),
            ready_timeout: settings.ready_timeout,
        }
    }

    async fn handshake(
        &self,
        target: &SshTarget,
    ) -> Result<Handle<RelayClientHandler>, BridgeError> {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| BridgeError::Handshake(e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY for {}: {e}", target.host);
        }

        let handler = RelayClientHandler {
            host: target.host.clone(),
        };
        let mut handle = client::connect_stream(Arc::clone(&self.config), stream, handler)
            .await
            .map_err(|e| BridgeError::Handshake(e.to_string()))?;

        let result = match &target.credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(target.username.clone(), password.clone())
                    .await
            }
            Credential::PrivateKey { pem, passphrase } => {
                let key = decode_secret_key(pem, passphrase.as_deref()).map_err(|e| {
                    BridgeError::Authentication(format!("unusable private key: {e}"))
                })?;
                let hash_alg = if matches!(key.algorithm(), ssh_key::Algorithm::Rsa { .. }) {
                    handle
                        .best_supported_rsa_hash()
                        .await
                        .map_err(|e| BridgeError::Handshake(e.to_string()))?
                        .flatten()
                } else {
                    None
                };
                handle
                    .authenticate_publickey(
                        target.username.clone(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
            }
        };

        let outcome = result.map_err(classify_auth_error)?;
        if !outcome.success() {
            return Err(BridgeError::Authentication(format!(
                "server refused credentials for {}",
                target.username
            )));
        }
        Ok(handle)
    }
}

#[async_trait]
impl ShellConnector for RusshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteShell>, BridgeError> {
        let handle = timeout(self.ready_timeout, self.handshake(target))
            .await
            .map_err(|_| {
                BridgeError::Handshake(format!(
                    "timed out after {}s while waiting for handshake",
                    self.ready_timeout.as_secs()
                ))
            })??;
        Ok(Box::new(RusshShell::new(handle)))
    }
}

/// Splits `russh` errors raised during authentication into credential
/// rejections and everything else.
fn classify_auth_error(err: russh::Error) -> BridgeError {
    match err {
        russh::Error::NotAuthenticated | russh::Error::NoAuthMethod => {
            BridgeError::Authentication(err.to_string())
        }
        other => BridgeError::Handshake(other.to_string()),
    }
}

// ── Shell ─────────────────────────────────────────────────────────────────────

/// An authenticated `russh` session plus its interactive channel.
pub struct RusshShell {
    handle: Handle<RelayClientHandler>,
    channel: Option<Channel<Msg>>,
    /// Output that arrived while waiting for PTY/shell replies.
    backlog: VecDeque<Vec<u8>>,
    closed: bool,
}

impl RusshShell {
    fn new(handle: Handle<RelayClientHandler>) -> Self {
        Self {
            handle,
            channel: None,
            backlog: VecDeque::new(),
            closed: false,
        }
    }

    fn channel(&self) -> Result<&Channel<Msg>, BridgeError> {
        self.channel
            .as_ref()
            .ok_or_else(|| BridgeError::Transport("shell channel is not open".to_string()))
    }
}

/// Waits for the server's answer to a `want_reply` channel request.
async fn await_reply(
    channel: &mut Channel<Msg>,
    backlog: &mut VecDeque<Vec<u8>>,
    request: &str,
) -> Result<(), BridgeError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(BridgeError::ShellOpen(format!("{request} request denied")))
            }
            Some(ChannelMsg::Data { data }) => backlog.push_back(data.to_vec()),
            Some(ChannelMsg::ExtendedData { data, .. }) => backlog.push_back(data.to_vec()),
            Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                return Err(BridgeError::ShellOpen(format!(
                    "channel closed during {request} request"
                )))
            }
            Some(_) => {}
        }
    }
}

#[async_trait]
impl RemoteShell for RusshShell {
    async fn open_shell(&mut self, term: &str, size: TermSize) -> Result<(), BridgeError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::ShellOpen(e.to_string()))?;

        channel
            .request_pty(
                true,
                term,
                u32::from(size.cols),
                u32::from(size.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| BridgeError::ShellOpen(e.to_string()))?;
        await_reply(&mut channel, &mut self.backlog, "pty").await?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| BridgeError::ShellOpen(e.to_string()))?;
        await_reply(&mut channel, &mut self.backlog, "shell").await?;

        self.channel = Some(channel);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        self.channel()?
            .data(data)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn resize(&mut self, size: TermSize) -> Result<(), BridgeError> {
        self.channel()?
            .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn next_output(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.backlog.pop_front() {
            return Some(chunk);
        }
        let channel = self.channel.as_mut()?;
        loop {
            match channel.wait().await? {
                ChannelMsg::Data { data } => return Some(data.to_vec()),
                ChannelMsg::ExtendedData { data, .. } => return Some(data.to_vec()),
                ChannelMsg::ExitStatus { exit_status } => {
                    debug!("remote shell exited with status {exit_status}");
                }
                ChannelMsg::Close => return None,
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("channel close failed: {e}");
            }
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("disconnect failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preferences_keep_configured_kex_order() {
        // Arrange
        let prefs = AlgorithmPreferences::default();

        // Act
        let preferred = preferred_algorithms(&prefs);

        // Assert: the first configured kex is first on the wire
        assert_eq!(
            preferred.kex.first(),
            Some(&kex::Name::try_from("curve25519-sha256").unwrap())
        );
        assert_eq!(
            preferred.key.first(),
            Some(&ssh_key::Algorithm::Ed25519)
        );
    }

    #[test]
    fn test_extension_markers_are_appended_to_kex() {
        let preferred = preferred_algorithms(&AlgorithmPreferences::default());
        let tail: Vec<_> = preferred.kex.iter().rev().take(2).copied().collect();
        assert!(tail.contains(&kex::EXTENSION_SUPPORT_AS_CLIENT));
        assert!(tail.contains(&kex::EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT));
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let prefs = AlgorithmPreferences {
            cipher: vec![
                "rot13-cbc".to_string(),
                "chacha20-poly1305@openssh.com".to_string(),
            ],
            ..AlgorithmPreferences::default()
        };

        let preferred = preferred_algorithms(&prefs);

        assert_eq!(preferred.cipher.as_ref(), &[cipher::CHACHA20_POLY1305]);
    }

    #[test]
    fn test_empty_category_falls_back_to_library_default() {
        let prefs = AlgorithmPreferences {
            hmac: vec!["hmac-md5-but-worse".to_string()],
            ..AlgorithmPreferences::default()
        };

        let preferred = preferred_algorithms(&prefs);

        assert_eq!(preferred.mac, Preferred::default().mac);
    }

    #[test]
    fn test_auth_errors_are_classified_structurally() {
        assert!(classify_auth_error(russh::Error::NotAuthenticated).is_authentication());
        assert!(classify_auth_error(russh::Error::NoAuthMethod).is_authentication());
        assert!(!classify_auth_error(russh::Error::Disconnect).is_authentication());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_handshake_error() {
        // Arrange: bind then drop a listener so the port is known to be closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = RusshConnector::new(&SshSettings::default());
        let target = SshTarget {
            host: "127.0.0.1".to_string(),
            port,
            username: "nobody".to_string(),
            credential: Credential::Password("x".to_string()),
            term_size: TermSize::default(),
        };

        // Act
        let result = connector.connect(&target).await;

        // Assert
        assert!(matches!(result, Err(BridgeError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_silent_server_hits_ready_timeout() {
        // Arrange: a listener that accepts but never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let settings = SshSettings {
            ready_timeout: Duration::from_millis(200),
            ..SshSettings::default()
        };
        let connector = RusshConnector::new(&settings);
        let target = SshTarget {
            host: "127.0.0.1".to_string(),
            port,
            username: "nobody".to_string(),
            credential: Credential::Password("x".to_string()),
            term_size: TermSize::default(),
        };

        // Act
        let result = connector.connect(&target).await;

        // Assert
        match result {
            Err(BridgeError::Handshake(msg)) => assert!(msg.contains("timed out"), "{msg}"),
            Err(other) => panic!("expected handshake timeout, got {other:?}"),
            Ok(_) => panic!("expected handshake timeout, got a session"),
        }
    }
}
