//! Console stream multiplexing
//!
//! One interactive shell per workload, shared by every attached viewer. The
//! first viewer opens the shell and starts the broadcast task; the task tears
//! the shell down once the last viewer is gone or the remote side closes.
//! A session stays registered as `Closing` until its shell is closed, so a
//! new attach never overlaps a shell that is still shutting down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};

use gs_core::config::ConsoleConfig;
use gs_core::error::{LifecycleError, RemoteError};
use gs_core::traits::{RemoteExecutor, ShellHandle};
use gs_core::types::{TerminalSize, WorkloadId, WorkloadStatus};

use crate::lifecycle::LifecycleOrchestrator;

/// Prefix of messages generated by the controller rather than the workload
pub const NOTICE_PREFIX: &str = "[PGSM]";

pub type ViewerId = u64;

/// What a viewer receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// Raw terminal output
    Output(Bytes),
    /// Controller diagnostic, already prefixed
    Notice(String),
}

/// An attached viewer. Dropping it counts as a detach.
#[derive(Debug)]
pub struct Viewer {
    pub id: ViewerId,
    pub workload: WorkloadId,
    pub events: mpsc::Receiver<ConsoleEvent>,
}

impl Viewer {
    pub async fn recv(&mut self) -> Option<ConsoleEvent> {
        self.events.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Streaming,
    Closing,
}

struct ConsoleSession {
    state: SessionState,
    viewers: HashMap<ViewerId, mpsc::Sender<ConsoleEvent>>,
    pending_resize: Option<TerminalSize>,
    /// Flips to `true` once the shell is closed and the entry removed
    closed: watch::Receiver<bool>,
}

impl ConsoleSession {
    fn notify(&self, message: &str) {
        for tx in self.viewers.values() {
            let _ = tx.try_send(ConsoleEvent::Notice(message.to_string()));
        }
    }

    /// Stop accepting viewers; dropping the senders ends every viewer stream
    fn begin_closing(&mut self) {
        self.state = SessionState::Closing;
        self.viewers.clear();
        self.pending_resize = None;
    }
}

/// Shared console registry
type SessionRegistry = Arc<Mutex<HashMap<WorkloadId, ConsoleSession>>>;

/// Fans one shell per workload out to many viewers
pub struct ConsoleMultiplexer {
    lifecycle: Arc<LifecycleOrchestrator>,
    remote: Arc<dyn RemoteExecutor>,
    config: ConsoleConfig,
    sessions: SessionRegistry,
    next_viewer: AtomicU64,
}

impl ConsoleMultiplexer {
    pub fn new(
        lifecycle: Arc<LifecycleOrchestrator>,
        remote: Arc<dyn RemoteExecutor>,
        config: ConsoleConfig,
    ) -> Self {
        Self {
            lifecycle,
            remote,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_viewer: AtomicU64::new(1),
        }
    }

    /// Default geometry for new shells
    pub fn default_size(&self) -> TerminalSize {
        TerminalSize::new(self.config.cols, self.config.rows)
    }

    /// Attach a viewer, opening the shared shell if this is the first one.
    ///
    /// Only running workloads can be attached. If the shell cannot be opened
    /// every waiting viewer is sent a notice and the error is returned.
    pub async fn attach(
        &self,
        id: WorkloadId,
        size: Option<TerminalSize>,
    ) -> Result<Viewer, LifecycleError> {
        let workload = self.lifecycle.workload(&id).await?;
        if workload.status != WorkloadStatus::Running {
            return Err(LifecycleError::NotRunning {
                id,
                status: workload.status,
            });
        }

        let viewer_id = self.next_viewer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.viewer_buffer.max(1));
        let viewer = Viewer {
            id: viewer_id,
            workload: id,
            events: rx,
        };

        let closed_tx = loop {
            let mut sessions = self.sessions.lock().await;
            let mut closed = match sessions.get_mut(&id) {
                Some(session) if session.state == SessionState::Closing => session.closed.clone(),
                Some(session) => {
                    session.viewers.insert(viewer_id, tx);
                    tracing::debug!(
                        "Viewer {} joined console of {} ({} viewers)",
                        viewer_id,
                        id,
                        session.viewers.len()
                    );
                    return Ok(viewer);
                }
                None => {
                    let (closed_tx, closed_rx) = watch::channel(false);
                    sessions.insert(
                        id,
                        ConsoleSession {
                            state: SessionState::Connecting,
                            viewers: HashMap::from([(viewer_id, tx)]),
                            pending_resize: None,
                            closed: closed_rx,
                        },
                    );
                    break closed_tx;
                }
            };
            drop(sessions);

            tracing::debug!("Waiting for the previous console shell of {} to close", id);
            // An error means the closing task is gone, which also ends the wait
            let _ = closed.wait_for(|done| *done).await;
        };

        let size = size.unwrap_or_else(|| self.default_size());
        tracing::info!("Opening console shell on workload {}", id);
        let shell = match self.open_attached_shell(workload.address, size).await {
            Ok(shell) => shell,
            Err(e) => {
                if let Some(session) = self.sessions.lock().await.remove(&id) {
                    session.notify(&format!("{} Connection lost: {}", NOTICE_PREFIX, e));
                }
                return Err(e.into());
            }
        };

        if let Some(session) = self.sessions.lock().await.get_mut(&id) {
            session.state = SessionState::Streaming;
        }
        tokio::spawn(broadcast_loop(
            Arc::clone(&self.sessions),
            id,
            shell,
            closed_tx,
            self.config.clone(),
        ));
        Ok(viewer)
    }

    async fn open_attached_shell(
        &self,
        address: std::net::Ipv4Addr,
        size: TerminalSize,
    ) -> Result<Box<dyn ShellHandle>, RemoteError> {
        let mut shell = self.remote.open_shell(address, size).await?;
        let attach = format!("{}\n", self.lifecycle.commands().attach_session());
        if let Err(e) = shell.send(attach.as_bytes()).await {
            let _ = shell.close().await;
            return Err(e);
        }
        Ok(shell)
    }

    /// Remove a viewer; the shell closes on the next poll if none remain
    pub async fn detach(&self, id: &WorkloadId, viewer: ViewerId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(id) {
            if session.viewers.remove(&viewer).is_some() {
                tracing::debug!("Viewer {} left console of {}", viewer, id);
            }
        }
    }

    /// Queue a geometry change; no-op without an active shell
    pub async fn resize(&self, id: &WorkloadId, size: TerminalSize) {
        if let Some(session) = self.sessions.lock().await.get_mut(id) {
            session.pending_resize = Some(size);
        }
    }

    /// Send a line of input through the managed terminal session
    pub async fn input(&self, id: &WorkloadId, text: &str) -> Result<(), LifecycleError> {
        self.lifecycle.send_command(id, text).await
    }

    /// Registered sessions, including ones whose shell is still closing
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn viewer_count(&self, id: &WorkloadId) -> usize {
        self.sessions
            .lock()
            .await
            .get(id)
            .map(|s| s.viewers.len())
            .unwrap_or(0)
    }
}

/// Read the shell and fan output out until no viewer is left or it closes
async fn broadcast_loop(
    sessions: SessionRegistry,
    id: WorkloadId,
    mut shell: Box<dyn ShellHandle>,
    closed: watch::Sender<bool>,
    config: ConsoleConfig,
) {
    let chunk = config.read_chunk.max(1);

    loop {
        let resize = {
            let mut guard = sessions.lock().await;
            let Some(session) = guard.get_mut(&id) else {
                break;
            };
            session.viewers.retain(|_, tx| !tx.is_closed());
            if session.viewers.is_empty() {
                session.begin_closing();
                tracing::info!("Last viewer left console of {}", id);
                break;
            }
            session.pending_resize.take()
        };

        if let Some(size) = resize {
            if let Err(e) = shell.resize(size).await {
                tracing::warn!("Console resize on {} failed: {}", id, e);
            }
        }

        match tokio::time::timeout(config.poll_interval, shell.recv()).await {
            Err(_) => continue,
            Ok(Ok(Some(data))) => fan_out(&sessions, &id, data, chunk).await,
            Ok(Ok(None)) => {
                finish(&sessions, &id, &format!("{} Server is not running.", NOTICE_PREFIX)).await;
                break;
            }
            Ok(Err(e)) => {
                finish(&sessions, &id, &format!("{} Connection lost: {}", NOTICE_PREFIX, e)).await;
                break;
            }
        }
    }

    if let Err(e) = shell.close().await {
        tracing::debug!("Closing console shell of {} failed: {}", id, e);
    }
    {
        let mut guard = sessions.lock().await;
        if guard.get(&id).is_some_and(|s| s.state == SessionState::Closing) {
            guard.remove(&id);
        }
    }
    closed.send_replace(true);
    tracing::debug!("Console loop for {} exited", id);
}

async fn fan_out(sessions: &SessionRegistry, id: &WorkloadId, data: Bytes, chunk: usize) {
    let mut guard = sessions.lock().await;
    let Some(session) = guard.get_mut(id) else {
        return;
    };

    let mut gone = Vec::new();
    for (viewer, tx) in &session.viewers {
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk).min(data.len());
            match tx.try_send(ConsoleEvent::Output(data.slice(offset..end))) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Viewer {} of {} is lagging, dropping output", viewer, id);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    gone.push(*viewer);
                    break;
                }
            }
            offset = end;
        }
    }
    for viewer in gone {
        session.viewers.remove(&viewer);
    }
}

async fn finish(sessions: &SessionRegistry, id: &WorkloadId, message: &str) {
    if let Some(session) = sessions.lock().await.get_mut(id) {
        tracing::info!("Console of {} closed: {}", id, message);
        session.notify(message);
        session.begin_closing();
    }
}
