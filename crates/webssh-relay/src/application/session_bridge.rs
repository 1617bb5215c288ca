//! Per-connection session bridge.
//!
//! A [`SessionBridge`] owns everything that belongs to one browser connection:
//! its [`SessionState`], at most one [`RemoteShell`], any resize that arrived
//! while the session was still being set up, and the UTF-8 decoder for shell
//! output.  Nothing here is shared with other connections.
//!
//! The gateway feeds the bridge [`BridgeCommand`]s over a bounded channel and
//! drains [`ServerEvent`]s from another.  Dropping the command sender is how
//! the gateway signals a browser disconnect; the bridge returning (and so
//! dropping its event sender) is how it tells the gateway the session is over.
//!
//! # Phases
//!
//! | Phase          | Waits on                              | Exit                       |
//! |----------------|---------------------------------------|----------------------------|
//! | idle           | commands                              | valid `Connect`            |
//! | connecting     | connect+shell future, commands        | shell open, error, hang-up |
//! | shell_ready    | shell output, commands                | remote close, hang-up      |
//! | closed         | nothing                               | -                          |

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::bridge_service::{
    client_message, validate_connect_request, BridgeCommand, BridgeError, OutputDecoder,
    SshTarget,
};
use crate::domain::config::SshSettings;
use crate::domain::messages::{ServerEvent, SessionStatus, TermSize};
use crate::domain::session::SessionState;

// ── Remote shell seam ─────────────────────────────────────────────────────────

/// Opens authenticated SSH sessions.
///
/// The production implementation is
/// [`RusshConnector`](crate::infrastructure::remote_shell::RusshConnector);
/// tests use [`MockRemoteHost`](crate::infrastructure::remote_shell::mock::MockRemoteHost).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Connects and authenticates, bounded by the handshake deadline.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Authentication`] when the credentials were refused,
    /// [`BridgeError::Handshake`] for every other failure.
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteShell>, BridgeError>;
}

/// One authenticated SSH session and, once opened, its shell channel.
#[async_trait]
pub trait RemoteShell: Send {
    /// Requests a PTY of `size` with terminal type `term`, then a shell.
    async fn open_shell(&mut self, term: &str, size: TermSize) -> Result<(), BridgeError>;

    /// Writes bytes to the shell's stdin.
    async fn write(&mut self, data: &[u8]) -> Result<(), BridgeError>;

    /// Sends a window-change request.
    async fn resize(&mut self, size: TermSize) -> Result<(), BridgeError>;

    /// Next chunk of shell output; `None` once the channel has closed.
    ///
    /// Must be cancel safe: the bridge polls it inside `select!`.
    async fn next_output(&mut self) -> Option<Vec<u8>>;

    /// Disconnects the SSH session.
    async fn close(&mut self);
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// The per-connection context object.
pub struct SessionBridge {
    connection_id: Uuid,
    connector: Arc<dyn ShellConnector>,
    settings: Arc<SshSettings>,
    state: SessionState,
    shell: Option<Box<dyn RemoteShell>>,
    pending_resize: Option<TermSize>,
    decoder: OutputDecoder,
}

enum RelayStep {
    Output(Option<Vec<u8>>),
    Command(Option<BridgeCommand>),
}

impl SessionBridge {
    pub fn new(
        connection_id: Uuid,
        connector: Arc<dyn ShellConnector>,
        settings: Arc<SshSettings>,
    ) -> Self {
        Self {
            connection_id,
            connector,
            settings,
            state: SessionState::Idle,
            shell: None,
            pending_resize: None,
            decoder: OutputDecoder::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the bridge through its phases until either side goes away.
    ///
    /// Returns after the remote session (if any) has been closed.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<BridgeCommand>,
        events: mpsc::Sender<ServerEvent>,
    ) {
        if let Some(target) = self.await_connect_request(&mut commands, &events).await {
            if self.establish(target, &mut commands, &events).await {
                self.relay(&mut commands, &events).await;
            }
        }
        self.close().await;
        debug!("connection {}: session bridge finished", self.connection_id);
    }

    /// Terminates the remote session if one is open.
    ///
    /// Safe to call repeatedly; only the first call does anything.
    pub async fn close(&mut self) {
        if !self.state.close() {
            return;
        }
        if let Some(mut shell) = self.shell.take() {
            shell.close().await;
            info!("connection {}: remote session closed", self.connection_id);
        }
    }

    // ── idle ─────────────────────────────────────────────────────────────────

    async fn await_connect_request(
        &mut self,
        commands: &mut mpsc::Receiver<BridgeCommand>,
        events: &mpsc::Sender<ServerEvent>,
    ) -> Option<SshTarget> {
        while let Some(command) = commands.recv().await {
            match command {
                BridgeCommand::Connect(request) => match validate_connect_request(request) {
                    Ok(target) => return Some(target),
                    Err(err) => {
                        warn!("connection {}: rejected connect request: {err}", self.connection_id);
                        self.report(events, &err).await;
                    }
                },
                BridgeCommand::InvalidConnect { field } => {
                    let err = BridgeError::InvalidRequest { field };
                    warn!("connection {}: rejected connect request: {err}", self.connection_id);
                    self.report(events, &err).await;
                }
                BridgeCommand::Resize(size) => {
                    debug!(
                        "connection {}: resize to {}x{} before connect dropped",
                        self.connection_id, size.cols, size.rows
                    );
                }
                BridgeCommand::Input(data) => {
                    debug!(
                        "connection {}: {} input bytes before connect dropped",
                        self.connection_id,
                        data.len()
                    );
                }
            }
        }
        debug!("connection {}: browser left before connecting", self.connection_id);
        None
    }

    // ── connecting ───────────────────────────────────────────────────────────

    /// Connects, authenticates and opens the shell.  Returns `true` once the
    /// shell is ready; `false` if the attempt failed or the browser left.
    async fn establish(
        &mut self,
        target: SshTarget,
        commands: &mut mpsc::Receiver<BridgeCommand>,
        events: &mpsc::Sender<ServerEvent>,
    ) -> bool {
        if let Err(err) = self.state.begin_connect() {
            warn!("connection {}: {err}", self.connection_id);
            return false;
        }

        info!(
            "connection {}: connecting to {}@{}:{}",
            self.connection_id, target.username, target.host, target.port
        );

        let initial_size = target.term_size;
        let connector = Arc::clone(&self.connector);
        let term = self.settings.term.clone();
        let ready_events = events.clone();
        let connection_id = self.connection_id;

        // The remote session lives inside this future until it resolves, so
        // dropping it (browser left mid-handshake) tears the session down.
        let open = async move {
            let mut shell = connector.connect(&target).await?;
            info!("connection {connection_id}: authenticated as {}", target.username);
            // A closed event channel means the browser is gone; the command
            // channel reports that on the next poll.
            let _ = ready_events
                .send(ServerEvent::Status(SessionStatus::SshReady))
                .await;

            if let Err(err) = shell.open_shell(&term, target.term_size).await {
                shell.close().await;
                return Err(err);
            }
            Ok(shell)
        };
        tokio::pin!(open);

        let shell = loop {
            tokio::select! {
                result = &mut open => match result {
                    Ok(shell) => break shell,
                    Err(err) => {
                        if err.is_authentication() {
                            info!("connection {}: {err}", self.connection_id);
                        } else {
                            warn!("connection {}: {err}", self.connection_id);
                        }
                        self.report(events, &err).await;
                        return false;
                    }
                },
                command = commands.recv() => match command {
                    None => {
                        info!(
                            "connection {}: browser disconnected while connecting; abandoning session",
                            self.connection_id
                        );
                        return false;
                    }
                    Some(BridgeCommand::Resize(size)) => {
                        debug!(
                            "connection {}: deferring resize to {}x{} until the shell is ready",
                            self.connection_id, size.cols, size.rows
                        );
                        self.pending_resize = Some(size);
                    }
                    Some(BridgeCommand::Input(data)) => {
                        debug!(
                            "connection {}: {} input bytes while connecting dropped",
                            self.connection_id,
                            data.len()
                        );
                    }
                    Some(BridgeCommand::Connect(_) | BridgeCommand::InvalidConnect { .. }) => {
                        self.report(events, &BridgeError::AlreadyActive).await;
                    }
                },
            }
        };

        self.shell = Some(shell);
        if let Err(err) = self.state.shell_opened() {
            warn!("connection {}: {err}", self.connection_id);
            return false;
        }
        info!("connection {}: shell ready", self.connection_id);
        let _ = events
            .send(ServerEvent::Status(SessionStatus::Connected))
            .await;

        if let Some(size) = self.pending_resize.take().filter(|s| *s != initial_size) {
            self.apply_resize(size).await;
        }
        true
    }

    // ── shell_ready ──────────────────────────────────────────────────────────

    async fn relay(
        &mut self,
        commands: &mut mpsc::Receiver<BridgeCommand>,
        events: &mpsc::Sender<ServerEvent>,
    ) {
        loop {
            let Some(shell) = self.shell.as_mut() else {
                return;
            };

            let step = tokio::select! {
                chunk = shell.next_output() => RelayStep::Output(chunk),
                command = commands.recv() => RelayStep::Command(command),
            };

            match step {
                RelayStep::Output(Some(bytes)) => {
                    let text = self.decoder.decode(&bytes);
                    if text.is_empty() {
                        continue;
                    }
                    if events.send(ServerEvent::TerminalOutput(text)).await.is_err() {
                        debug!("connection {}: event channel closed", self.connection_id);
                        return;
                    }
                }
                RelayStep::Output(None) => {
                    info!("connection {}: remote shell closed", self.connection_id);
                    let rest = self.decoder.finish();
                    if !rest.is_empty() {
                        let _ = events.send(ServerEvent::TerminalOutput(rest)).await;
                    }
                    return;
                }
                RelayStep::Command(None) => {
                    info!("connection {}: browser disconnected", self.connection_id);
                    return;
                }
                RelayStep::Command(Some(BridgeCommand::Input(data))) => {
                    if !self.forward_input(&data).await {
                        return;
                    }
                }
                RelayStep::Command(Some(BridgeCommand::Resize(size))) => {
                    self.apply_resize(size).await;
                }
                RelayStep::Command(Some(
                    BridgeCommand::Connect(_) | BridgeCommand::InvalidConnect { .. },
                )) => {
                    self.report(events, &BridgeError::AlreadyActive).await;
                }
            }
        }
    }

    async fn forward_input(&mut self, data: &[u8]) -> bool {
        let Some(shell) = self.shell.as_mut() else {
            return false;
        };
        match shell.write(data).await {
            Ok(()) => true,
            Err(err) => {
                warn!("connection {}: {err}", self.connection_id);
                false
            }
        }
    }

    async fn apply_resize(&mut self, size: TermSize) {
        let Some(shell) = self.shell.as_mut() else {
            return;
        };
        match shell.resize(size).await {
            Ok(()) => debug!(
                "connection {}: terminal resized to {}x{}",
                self.connection_id, size.cols, size.rows
            ),
            Err(err) => warn!("connection {}: resize failed: {err}", self.connection_id),
        }
    }

    // `&mut self` keeps the future `Send`: the bridge itself is not `Sync`.
    async fn report(&mut self, events: &mpsc::Sender<ServerEvent>, err: &BridgeError) {
        let message = client_message(err, &self.settings.auth_failure_message);
        if events.send(ServerEvent::Error(message)).await.is_err() {
            debug!(
                "connection {}: browser gone before error could be delivered",
                self.connection_id
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{ConnectRequest, PortField};

    fn request() -> ConnectRequest {
        ConnectRequest {
            host: Some("192.0.2.10".to_string()),
            port: Some(PortField::Number(22)),
            username: Some("alice".to_string()),
            password: Some("wrong".to_string()),
            ..ConnectRequest::default()
        }
    }

    fn spawn_bridge(
        connector: MockShellConnector,
    ) -> (
        mpsc::Sender<BridgeCommand>,
        mpsc::Receiver<ServerEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (evt_tx, evt_rx) = mpsc::channel(16);
        let bridge = SessionBridge::new(
            Uuid::new_v4(),
            Arc::new(connector),
            Arc::new(SshSettings {
                auth_failure_message: "bad credentials".to_string(),
                ..SshSettings::default()
            }),
        );
        let task = tokio::spawn(bridge.run(cmd_rx, evt_tx));
        (cmd_tx, evt_rx, task)
    }

    async fn drain(mut rx: mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_auth_failure_emits_single_localized_error_and_ends() {
        // Arrange
        let mut connector = MockShellConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(BridgeError::Authentication("all methods failed".to_string())));
        let (cmd_tx, evt_rx, task) = spawn_bridge(connector);

        // Act
        cmd_tx.send(BridgeCommand::Connect(request())).await.unwrap();
        task.await.unwrap();
        let events = drain(evt_rx).await;

        // Assert: the bridge ended on its own, with exactly one error
        assert_eq!(events, vec![ServerEvent::Error("bad credentials".to_string())]);
    }

    #[tokio::test]
    async fn test_handshake_failure_is_reported_verbatim() {
        let mut connector = MockShellConnector::new();
        connector
            .expect_connect()
            .returning(|_| Err(BridgeError::Handshake("connection refused".to_string())));
        let (cmd_tx, evt_rx, task) = spawn_bridge(connector);

        cmd_tx.send(BridgeCommand::Connect(request())).await.unwrap();
        task.await.unwrap();

        assert_eq!(
            drain(evt_rx).await,
            vec![ServerEvent::Error("SSH Error: connection refused".to_string())]
        );
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_connector_and_keeps_bridge_idle() {
        // Arrange: connect() must never be called
        let mut connector = MockShellConnector::new();
        connector.expect_connect().times(0);
        let (cmd_tx, mut evt_rx, task) = spawn_bridge(connector);

        // Act
        let bad = ConnectRequest {
            host: None,
            ..request()
        };
        cmd_tx.send(BridgeCommand::Connect(bad)).await.unwrap();

        // Assert: an error arrives and the bridge is still running
        assert_eq!(
            evt_rx.recv().await,
            Some(ServerEvent::Error("Invalid connection request: host".to_string()))
        );
        assert!(!task.is_finished());

        drop(cmd_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_twice_is_a_no_op() {
        let bridge_connector = MockShellConnector::new();
        let mut bridge = SessionBridge::new(
            Uuid::new_v4(),
            Arc::new(bridge_connector),
            Arc::new(SshSettings::default()),
        );

        bridge.close().await;
        bridge.close().await;

        assert_eq!(bridge.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_finishes_without_events() {
        let connector = MockShellConnector::new();
        let (cmd_tx, evt_rx, task) = spawn_bridge(connector);

        cmd_tx
            .send(BridgeCommand::Resize(TermSize { rows: 1, cols: 1 }))
            .await
            .unwrap();
        drop(cmd_tx);
        task.await.unwrap();

        assert!(drain(evt_rx).await.is_empty());
    }
}
