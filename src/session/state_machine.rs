//! Session lifecycle with statum typestates.
//!
//! ```text
//! Disconnected ──► Connecting ──► Announcing ──► Ready
//!      ▲               │  ▲           │            │
//!      │               └──┘ retry     │ link lost  │ link lost /
//!      │                              ▼            │ failed publish
//!      └──────────────────────────────┴────────────┘
//! ```
//!
//! Each state only exposes the operations that make sense in it, so a board
//! can never report itself Ready without the announcement having completed.

use std::sync::Arc;

use chrono::Local;
use statum::{machine, state};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::{ReportError, SessionError, SessionPhase, SessionSettings, SessionStatus};
use crate::actuator::{LampAdapter, Level};
use crate::board::Board;
use crate::message::{
    decode_command, encode_board_info, encode_line_status, Command, APP_BOARD_ID,
};
use crate::mqtt::{InboundFrame, QoS, Transport, TransportError, TransportEvent};

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Announcing,
    Ready,
}

/// Owns the board, the lamp and the transport handle for the whole process.
/// Nothing else mutates the board, so it needs no lock.
#[machine]
pub struct Session<S: SessionState> {
    settings: SessionSettings,
    board: Board,
    lamp: LampAdapter,
    transport: Arc<dyn Transport>,
    events: mpsc::Receiver<TransportEvent>,
    status: watch::Sender<SessionStatus>,
    backoff: Backoff,
}

impl<S: SessionState> Session<S> {
    fn set_phase(&self, phase: SessionPhase) {
        debug!("Session phase -> {:?}", phase);
        self.status.send_modify(|status| {
            status.phase = phase;
            status.board_online = self.board.is_online();
        });
    }

    /// Empties the inbound queue. Also keeps the transport driver from
    /// blocking on a full queue while no one is serving it.
    fn discard_queued(&mut self) {
        let mut discarded = 0usize;
        while self.events.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            info!("Discarded {} events queued while disconnected", discarded);
        }
    }

    /// Copies the level actually applied by the actuator into the lamp
    /// device, so reports never echo a requested value.
    fn refresh_board(&mut self) {
        let level = self.lamp.level();
        if !self
            .board
            .set_device_value(&self.settings.lamp_device_id, level.to_string())
        {
            warn!(
                "Lamp device {} is not attached to board {}",
                self.settings.lamp_device_id,
                self.board.board_id()
            );
        }
    }

    async fn publish_status(&mut self, payload: Vec<u8>) -> Result<(), ReportError> {
        self.transport
            .publish(&self.settings.status_topic, payload, QoS::AtLeastOnce)
            .await?;
        Ok(())
    }

    async fn publish_online(&mut self) -> Result<(), ReportError> {
        let payload = encode_line_status(self.board.board_id(), true)?;
        self.publish_status(payload).await
    }

    async fn publish_board_info(&mut self) -> Result<(), ReportError> {
        self.refresh_board();
        let payload = encode_board_info(&self.board)?;
        self.publish_status(payload).await
    }

    /// line-status=online followed by board-info; both must be acknowledged.
    async fn publish_announcement(&mut self) -> Result<(), ReportError> {
        self.publish_online().await?;
        self.publish_board_info().await
    }
}

impl Session<Disconnected> {
    pub fn create(
        settings: SessionSettings,
        board: Board,
        lamp: LampAdapter,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        let backoff = Backoff::new(settings.backoff);
        let mut session = Self::new(settings, board, lamp, transport, events, status, backoff);
        session.refresh_board();
        info!("Board info:\n{}", session.board.to_json());
        session
    }

    /// Starts a connection cycle. Anything queued while the link was down,
    /// commands included, is discarded.
    pub fn begin_connecting(mut self) -> Session<Connecting> {
        self.discard_queued();
        self.set_phase(SessionPhase::Connecting);
        self.transition()
    }
}

impl Session<Connecting> {
    /// Connects and subscribes to the control topic, retrying with backoff
    /// until both succeed.
    pub async fn establish(mut self) -> Session<Announcing> {
        loop {
            match self.try_establish().await {
                Ok(()) => break,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "Connection attempt {} failed: {} (retrying in {:?})",
                        self.backoff.attempts(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    self.discard_queued();
                }
            }
        }

        self.backoff.reset();
        info!(
            "Connected and subscribed to '{}'",
            self.settings.control_topic
        );
        self.set_phase(SessionPhase::Announcing);
        self.transition()
    }

    async fn try_establish(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        self.transport
            .subscribe(&self.settings.control_topic, QoS::AtLeastOnce)
            .await
    }
}

impl Session<Announcing> {
    /// Publishes online + board-info. Failures on a live link repeat the whole
    /// announcement; a lost link sends the session back to Disconnected.
    pub async fn announce(mut self) -> Result<Session<Ready>, Session<Disconnected>> {
        loop {
            match self.publish_announcement().await {
                Ok(()) => break,
                Err(e) if e.is_link_loss() => {
                    warn!("Link lost during announcement: {}", e);
                    self.set_phase(SessionPhase::Disconnected);
                    return Err(self.transition());
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!("Announcement failed: {} (retrying in {:?})", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.backoff.reset();
        self.board.set_online(true);
        self.status.send_modify(|status| {
            status.connections += 1;
            status.last_connected = Some(Local::now());
        });
        self.set_phase(SessionPhase::Ready);
        info!("Board {} is online", self.board.board_id());
        Ok(self.transition())
    }
}

impl Session<Ready> {
    /// Dispatch loop. Returns to Disconnected on link loss or on any failed
    /// publish; fails only when the inbound queue is gone.
    pub async fn serve(mut self) -> Result<Session<Disconnected>, SessionError> {
        while let Some(event) = self.events.recv().await {
            match event {
                TransportEvent::LinkLost(reason) => {
                    warn!("Link lost: {}", reason);
                    return Ok(self.fall_back());
                }
                TransportEvent::Frame(frame) => {
                    if let Err(e) = self.dispatch(frame).await {
                        warn!("Publish failed, treating as link loss: {}", e);
                        return Ok(self.fall_back());
                    }
                }
            }
        }

        Err(SessionError::QueueClosed)
    }

    fn fall_back(mut self) -> Session<Disconnected> {
        self.board.set_online(false);
        self.set_phase(SessionPhase::Disconnected);
        self.transition()
    }

    /// Handles one inbound frame. Malformed frames, foreign boards, unknown
    /// devices and out-of-range levels are dropped without a reply; only a
    /// failed publish is reported back.
    ///
    /// Sentinels (`online`, `info`) ignore the device id and are honored when
    /// addressed to the app's board id or to this board.
    pub async fn dispatch(&mut self, frame: InboundFrame) -> Result<(), ReportError> {
        if frame.topic != self.settings.control_topic {
            debug!("Ignoring frame on '{}'", frame.topic);
            return Ok(());
        }

        let message = match decode_command(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping control frame ({}): {}", e, frame);
                return Ok(());
            }
        };

        if message.command.is_sentinel() {
            if message.board_id != APP_BOARD_ID && message.board_id != self.board.board_id() {
                debug!(
                    "Ignoring {:?} addressed to board {}",
                    message.command, message.board_id
                );
                return Ok(());
            }
            info!(
                "{:?} from {}, re-announcing",
                message.command, message.board_id
            );
            return self.publish_announcement().await;
        }
        let Command::Level(level) = message.command else {
            return Ok(());
        };

        if message.board_id != self.board.board_id() {
            debug!("Ignoring command for board {}", message.board_id);
            return Ok(());
        }
        if !self.board.has_device(&message.device_id) {
            info!(
                "No device {} on board {}, ignoring command",
                message.device_id,
                self.board.board_id()
            );
            return Ok(());
        }
        let Some(level) = Level::new(level) else {
            debug!("Ignoring out-of-range level {}", level);
            return Ok(());
        };

        info!("Setting device {} to {}%", message.device_id, level);
        self.lamp.set_level(level).await;
        self.publish_board_info().await
    }
}
