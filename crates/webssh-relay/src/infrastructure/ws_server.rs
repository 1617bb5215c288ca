//! HTTP/WebSocket gateway.
//!
//! One `axum` router serves two things:
//!
//! - `GET /socket` upgrades to a WebSocket and starts a [`SessionBridge`] for
//!   the connection.
//! - Every other path is answered from the static asset directory, falling
//!   back to its `index.html` so client-side routes resolve.
//!
//! Each WebSocket runs three cooperating pieces:
//!
//! ```text
//!  browser ──frames──▶ read_loop ──BridgeCommand──▶ SessionBridge
//!  browser ◀─frames─── write_loop ◀──ServerEvent─── SessionBridge
//! ```
//!
//! The reader owns the command sender.  When the browser goes away the reader
//! returns, the sender and the writer (with its event receiver) are dropped,
//! and the bridge releases the SSH session even if it was blocked on a full
//! event queue.
//! When the bridge finishes first, the writer flushes its remaining events,
//! sends a Close frame and returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::bridge_service::{
    malformed_connect_field, translate_client_event, BridgeCommand,
};
use crate::application::session_bridge::{SessionBridge, ShellConnector};
use crate::domain::config::{RelayConfig, SshSettings};
use crate::domain::messages::{ClientEvent, ServerEvent};

/// Commands buffered between the WebSocket reader and the bridge.
///
/// A full queue stalls the reader, which pushes back on the browser.
const COMMAND_QUEUE: usize = 64;

/// Events buffered between the bridge and the WebSocket writer.
const EVENT_QUEUE: usize = 256;

// ── Router ────────────────────────────────────────────────────────────────────

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub ssh: Arc<SshSettings>,
    pub connector: Arc<dyn ShellConnector>,
}

impl AppState {
    pub fn new(config: RelayConfig, connector: Arc<dyn ShellConnector>) -> Self {
        let ssh = Arc::new(config.ssh.clone());
        Self {
            config: Arc::new(config),
            ssh,
            connector,
        }
    }
}

/// Builds the gateway router.
pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let assets =
        ServeDir::new(&static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .route("/socket", get(socket_handler))
        .fallback_service(assets)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `config.bind_addr` and serves until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server<F>(
    config: RelayConfig,
    connector: Arc<dyn ShellConnector>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.bind_addr))?;

    info!("relay listening on {}", config.bind_addr);
    serve(listener, AppState::new(config, connector), shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let index = state.config.static_dir.join("index.html");
    if index.is_file() {
        info!("serving static assets from {}", state.config.static_dir.display());
    } else {
        warn!(
            "{} not found; unmatched paths will return 404",
            index.display()
        );
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server terminated with an error")?;

    info!("relay stopped");
    Ok(())
}

async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ── Per-connection ────────────────────────────────────────────────────────────

/// Why the reader stopped.
#[derive(Debug, PartialEq, Eq)]
enum ReadEnd {
    /// Close frame, transport error or heartbeat timeout.
    ClientGone,
    /// The bridge dropped its command receiver.
    BridgeGone,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("connection {connection_id}: browser connected");

    let (ws_tx, ws_rx) = socket.split();
    let (cmd_tx, cmd_rx) = mpsc::channel::<BridgeCommand>(COMMAND_QUEUE);
    let (evt_tx, evt_rx) = mpsc::channel::<ServerEvent>(EVENT_QUEUE);

    let bridge = SessionBridge::new(
        connection_id,
        Arc::clone(&state.connector),
        Arc::clone(&state.ssh),
    );
    let bridge_task = tokio::spawn(bridge.run(cmd_rx, evt_tx));

    let mut writer = Box::pin(write_loop(
        connection_id,
        ws_tx,
        evt_rx,
        state.config.ping_interval,
    ));
    let reader = read_loop(connection_id, ws_rx, cmd_tx, state.config.ping_timeout);

    tokio::select! {
        () = &mut writer => {
            debug!("connection {connection_id}: bridge finished first");
        }
        end = reader => {
            debug!("connection {connection_id}: reader stopped ({end:?})");
            match end {
                ReadEnd::BridgeGone => writer.await,
                // Releases the event receiver so a bridge blocked on a full
                // queue sees the disconnect.
                ReadEnd::ClientGone => drop(writer),
            }
        }
    }

    // Both the command sender and the event receiver are gone by now, so the
    // bridge is winding down.
    if let Err(e) = bridge_task.await {
        warn!("connection {connection_id}: bridge task failed: {e}");
    }
    info!("connection {connection_id}: closed");
}

async fn read_loop(
    connection_id: Uuid,
    mut ws_rx: SplitStream<WebSocket>,
    commands: mpsc::Sender<BridgeCommand>,
    ping_timeout: Duration,
) -> ReadEnd {
    loop {
        let frame = match timeout(ping_timeout, ws_rx.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("connection {connection_id}: transport error: {e}");
                return ReadEnd::ClientGone;
            }
            Ok(None) => return ReadEnd::ClientGone,
            Err(_) => {
                info!(
                    "connection {connection_id}: nothing heard for {}s; dropping",
                    ping_timeout.as_secs()
                );
                return ReadEnd::ClientGone;
            }
        };

        let command = match frame {
            Message::Text(text) => match decode_client_text(connection_id, text.as_str()) {
                Some(command) => command,
                None => continue,
            },
            Message::Binary(bytes) => BridgeCommand::Input(bytes.to_vec()),
            Message::Close(_) => return ReadEnd::ClientGone,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if commands.send(command).await.is_err() {
            return ReadEnd::BridgeGone;
        }
    }
}

async fn write_loop(
    connection_id: Uuid,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
    ping_interval: Duration,
) {
    let mut heartbeat = interval(ping_interval);
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("connection {connection_id}: could not encode event: {e}");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    debug!("connection {connection_id}: browser went away mid-send");
                    return;
                }
            }
            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Parses one text frame.  Malformed events are logged and skipped.
fn decode_client_text(connection_id: Uuid, text: &str) -> Option<BridgeCommand> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => {
            debug!("connection {connection_id}: received {}", event.name());
            Some(translate_client_event(event))
        }
        Err(e) => match malformed_connect_field(text) {
            Some(field) => {
                warn!("connection {connection_id}: malformed connect request ({field}): {e}");
                Some(BridgeCommand::InvalidConnect { field })
            }
            None => {
                warn!("connection {connection_id}: ignoring malformed event: {e}");
                None
            }
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
