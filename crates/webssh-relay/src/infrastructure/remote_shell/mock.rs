//! In-memory remote host for tests.
//!
//! [`MockRemoteHost`] implements [`ShellConnector`] without any network I/O.
//! Its shells record everything written to them and, in [`MockBehavior::Echo`]
//! mode, echo input straight back as output, which is enough to exercise the
//! full relay path from a browser event to terminal output.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::application::bridge_service::{BridgeError, SshTarget};
use crate::application::session_bridge::{RemoteShell, ShellConnector};
use crate::domain::messages::TermSize;

/// How the mock host answers a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Accept everything; shells echo their input.
    Echo,
    /// Fail authentication.
    RejectAuth,
    /// Fail before the handshake, as if the port were closed.
    Unreachable,
    /// Authenticate, then deny the PTY request.
    RefuseShell,
    /// Like [`MockBehavior::Echo`], after a delay.
    Slow(Duration),
    /// Never finish connecting.
    Hang,
}

#[derive(Default)]
struct HostLog {
    connects: u32,
    closes: u32,
    targets: Vec<SshTarget>,
    inputs: Vec<Vec<u8>>,
    resizes: Vec<TermSize>,
    opened: Option<(String, TermSize)>,
    output: Option<UnboundedSender<Vec<u8>>>,
}

/// A scriptable stand-in for an SSH server.
///
/// Clones share the same log, so a test can keep one handle while the relay
/// owns another.
#[derive(Clone)]
pub struct MockRemoteHost {
    behavior: MockBehavior,
    log: Arc<Mutex<HostLog>>,
}

impl MockRemoteHost {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            log: Arc::new(Mutex::new(HostLog::default())),
        }
    }

    /// Number of connection attempts received.
    pub fn connects(&self) -> u32 {
        self.log.lock().expect("lock poisoned").connects
    }

    /// Number of shells closed by the relay.
    pub fn closes(&self) -> u32 {
        self.log.lock().expect("lock poisoned").closes
    }

    /// Targets passed to [`ShellConnector::connect`], oldest first.
    pub fn targets(&self) -> Vec<SshTarget> {
        self.log.lock().expect("lock poisoned").targets.clone()
    }

    /// Concatenation of every write the shell received.
    pub fn input(&self) -> Vec<u8> {
        self.log
            .lock()
            .expect("lock poisoned")
            .inputs
            .concat()
    }

    /// Window changes applied after the shell opened.
    pub fn resizes(&self) -> Vec<TermSize> {
        self.log.lock().expect("lock poisoned").resizes.clone()
    }

    /// `TERM` and size of the opened PTY, if one was opened.
    pub fn opened(&self) -> Option<(String, TermSize)> {
        self.log.lock().expect("lock poisoned").opened.clone()
    }

    /// Emits `bytes` as shell output.  Returns `false` if no shell is open.
    pub fn push_output(&self, bytes: &[u8]) -> bool {
        let guard = self.log.lock().expect("lock poisoned");
        match guard.output {
            Some(ref tx) => tx.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulates the server closing the channel (e.g. the user typed `exit`).
    pub fn close_remote(&self) {
        self.log.lock().expect("lock poisoned").output = None;
    }

    fn open_channel(&self, echo: bool) -> Box<dyn RemoteShell> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.log.lock().expect("lock poisoned").output = Some(tx);
        Box::new(MockShell {
            echo,
            log: Arc::clone(&self.log),
            output: rx,
            closed: false,
        })
    }
}

#[async_trait]
impl ShellConnector for MockRemoteHost {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteShell>, BridgeError> {
        {
            let mut log = self.log.lock().expect("lock poisoned");
            log.connects += 1;
            log.targets.push(target.clone());
        }

        match self.behavior {
            MockBehavior::Unreachable => Err(BridgeError::Handshake(format!(
                "connect ECONNREFUSED {}:{}",
                target.host, target.port
            ))),
            MockBehavior::RejectAuth => Err(BridgeError::Authentication(format!(
                "server refused credentials for {}",
                target.username
            ))),
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.open_channel(true))
            }
            MockBehavior::Echo => Ok(self.open_channel(true)),
            MockBehavior::RefuseShell => Ok(self.open_channel(false)),
        }
    }
}

struct MockShell {
    echo: bool,
    log: Arc<Mutex<HostLog>>,
    output: UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn open_shell(&mut self, term: &str, size: TermSize) -> Result<(), BridgeError> {
        if !self.echo {
            return Err(BridgeError::ShellOpen("pty request denied".to_string()));
        }
        self.log.lock().expect("lock poisoned").opened = Some((term.to_string(), size));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let mut log = self.log.lock().expect("lock poisoned");
        log.inputs.push(data.to_vec());
        if let Some(ref tx) = log.output {
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }

    async fn resize(&mut self, size: TermSize) -> Result<(), BridgeError> {
        self.log.lock().expect("lock poisoned").resizes.push(size);
        Ok(())
    }

    async fn next_output(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.output.close();
        let mut log = self.log.lock().expect("lock poisoned");
        log.closes += 1;
        log.output = None;
    }
}
