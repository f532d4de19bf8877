//! # Session Controller
//!
//! Owns the publish/subscribe session of the lamp board: connect, subscribe,
//! announce, dispatch inbound commands to the lamp, and fall back to a fresh
//! connection cycle whenever the link drops.
//!
//! ## Task Layout
//!
//! ```text
//!                 ┌────────────── session task ──────────────┐
//! TransportEvent ─►  Session<Disconnected → … → Ready>       ├─► Transport (status topic)
//!                 │  owns Board + LampAdapter                │
//!                 └──────────────┬───────────────────────────┘
//!                                │ watch<SessionStatus>
//!                                ▼
//!                        liveness task ─────────────────────────► Transport (liveness topic)
//! ```
//!
//! The session task is the single owner of the board and the lamp; the
//! liveness task only reads the session phase. Both share the transport
//! handle, which serializes outbound requests internally.
//!
//! ## Error Handling Strategy
//! Nothing in here is fatal. Transport failures drive the reconnect loop,
//! malformed or misaddressed commands are logged and dropped. The session
//! task only ends when the transport's inbound queue closes at shutdown.

pub mod backoff;
pub mod liveness;
pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::actuator::LampAdapter;
use crate::board::Board;
use crate::message::EncodeError;
use crate::mqtt::{Transport, TransportError, TransportEvent};

pub use backoff::{Backoff, BackoffPolicy};
pub use liveness::{LivenessCounter, LivenessPublisher};
pub use state_machine::Session;
use state_machine::Disconnected;

/// Topics, addressing and timing for one session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub control_topic: String,
    pub status_topic: String,
    pub liveness_topic: String,
    /// Board device driven by the lamp adapter
    pub lamp_device_id: String,
    pub backoff: BackoffPolicy,
    pub liveness_interval: Duration,
    /// Liveness counter restarts at 1 when it reaches this value
    pub liveness_wrap: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            control_topic: "onehome_ctrl".to_string(),
            status_topic: "onehome_info".to_string(),
            liveness_topic: "tick".to_string(),
            lamp_device_id: "1".to_string(),
            backoff: BackoffPolicy::default(),
            liveness_interval: Duration::from_secs(5),
            liveness_wrap: 11,
        }
    }
}

/// Coarse session phase, mirrored from the typestate for observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    Announcing,
    Ready,
}

#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub board_online: bool,
    /// Completed announcements since startup
    pub connections: u32,
    pub last_connected: Option<DateTime<Local>>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport event queue closed")]
    QueueClosed,

    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure to get a status report to the broker.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReportError {
    pub fn is_link_loss(&self) -> bool {
        matches!(self, ReportError::Transport(e) if e.is_link_loss())
    }
}

/// Wires the session and the liveness publisher together.
pub struct SessionController {
    session: Session<Disconnected>,
    liveness: LivenessPublisher,
    status: watch::Receiver<SessionStatus>,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        board: Board,
        lamp: LampAdapter,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let liveness = LivenessPublisher::new(
            transport.clone(),
            settings.liveness_topic.clone(),
            board.board_id().to_string(),
            settings.liveness_interval,
            settings.liveness_wrap,
            status_rx.clone(),
        );
        let session = Session::create(settings, board, lamp, transport, events, status_tx);

        Self {
            session,
            liveness,
            status: status_rx,
        }
    }

    pub fn spawn(self) -> SessionHandle {
        info!("Spawning session controller");
        let liveness_task = self.liveness.spawn();
        let session_task = tokio::spawn(run(self.session));

        SessionHandle {
            status: self.status,
            session_task,
            liveness_task,
        }
    }
}

/// Drives the lifecycle forever: every pass is one connection.
async fn run(mut session: Session<Disconnected>) -> Result<(), SessionError> {
    loop {
        let announcing = session.begin_connecting().establish().await;
        let ready = match announcing.announce().await {
            Ok(ready) => ready,
            Err(disconnected) => {
                session = disconnected;
                continue;
            }
        };
        session = ready.serve().await?;
    }
}

pub struct SessionHandle {
    status: watch::Receiver<SessionStatus>,
    session_task: JoinHandle<Result<(), SessionError>>,
    liveness_task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Resolves when the session task ends, which only happens once the
    /// transport's inbound queue has closed.
    pub async fn finished(&mut self) -> Result<(), SessionError> {
        let result = (&mut self.session_task).await?;
        if let Err(e) = &result {
            error!("Session ended: {}", e);
        }
        result
    }

    /// Stops both tasks without draining in-flight commands.
    pub fn shutdown(self) {
        info!("Stopping session tasks");
        self.session_task.abort();
        self.liveness_task.abort();
    }
}
