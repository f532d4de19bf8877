//! Periodic liveness ticks.
//!
//! Runs beside the session task and publishes `{boardId, counter}` on the
//! liveness topic while the session is Ready. The counter has no meaning beyond
//! proving the board is still there.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{SessionPhase, SessionStatus};
use crate::message::encode_liveness;
use crate::mqtt::{QoS, Transport};

/// Counts 0, 1, .., wrap - 1 and then restarts at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessCounter {
    value: u32,
    wrap: u32,
}

impl LivenessCounter {
    pub fn new(wrap: u32) -> Self {
        Self {
            value: 0,
            wrap: wrap.max(2),
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn advance(&mut self) {
        self.value += 1;
        if self.value >= self.wrap {
            self.value = 1;
        }
    }
}

pub struct LivenessPublisher {
    transport: Arc<dyn Transport>,
    topic: String,
    board_id: String,
    interval: Duration,
    counter: LivenessCounter,
    status: watch::Receiver<SessionStatus>,
}

impl LivenessPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        topic: String,
        board_id: String,
        interval: Duration,
        wrap: u32,
        status: watch::Receiver<SessionStatus>,
    ) -> Self {
        Self {
            transport,
            topic,
            board_id,
            interval,
            counter: LivenessCounter::new(wrap),
            status,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            "Starting liveness publisher on '{}' every {:?}",
            self.topic, self.interval
        );
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.status.has_changed().is_err() {
                info!("Session ended, stopping liveness publisher");
                return;
            }
            let ready = self.status.borrow_and_update().phase == SessionPhase::Ready;
            if !ready {
                debug!("Session not ready, skipping liveness tick");
                continue;
            }
            self.beat().await;
        }
    }

    /// Publishes the current counter. The counter only moves on after a
    /// delivered tick.
    async fn beat(&mut self) {
        let payload = match encode_liveness(&self.board_id, self.counter.value()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping liveness tick: {}", e);
                return;
            }
        };

        match self
            .transport
            .publish(&self.topic, payload, QoS::AtLeastOnce)
            .await
        {
            Ok(()) => {
                debug!("Liveness tick {}", self.counter.value());
                self.counter.advance();
            }
            Err(e) => warn!("Liveness tick {} failed: {}", self.counter.value(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::mock::MockTransport;

    #[test]
    fn counter_restarts_at_one() {
        let mut counter = LivenessCounter::new(11);
        let mut seen = Vec::new();
        for _ in 0..13 {
            seen.push(counter.value());
            counter.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 1, 2]);
    }

    #[test]
    fn tiny_wrap_is_raised() {
        let mut counter = LivenessCounter::new(0);
        counter.advance();
        assert_eq!(counter.value(), 1);
        counter.advance();
        assert_eq!(counter.value(), 1);
    }

    fn ready() -> SessionStatus {
        SessionStatus {
            phase: SessionPhase::Ready,
            ..SessionStatus::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_ticks_while_ready() {
        let (transport, _tx, _rx) = MockTransport::new(4);
        transport.connect().await.unwrap();
        let (_status_tx, status_rx) = watch::channel(ready());

        let publisher = LivenessPublisher::new(
            Arc::new(transport.clone()),
            "tick".to_string(),
            "1".to_string(),
            Duration::from_secs(5),
            11,
            status_rx,
        );
        let task = publisher.spawn();
        tokio::time::sleep(Duration::from_secs(11)).await;
        task.abort();

        assert_eq!(
            transport.publishes_to("tick"),
            vec![
                r#"{"boardId":"1","counter":0}"#,
                r#"{"boardId":"1","counter":1}"#,
                r#"{"boardId":"1","counter":2}"#,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_keeps_counter() {
        let (transport, _tx, _rx) = MockTransport::new(4);
        transport.connect().await.unwrap();
        transport.fail_next_publish(crate::mqtt::TransportError::Timeout("publish acknowledgment"));
        let (_status_tx, status_rx) = watch::channel(ready());

        let task = LivenessPublisher::new(
            Arc::new(transport.clone()),
            "tick".to_string(),
            "1".to_string(),
            Duration::from_secs(5),
            11,
            status_rx,
        )
        .spawn();
        tokio::time::sleep(Duration::from_secs(6)).await;
        task.abort();

        assert_eq!(
            transport.publishes_to("tick"),
            vec![r#"{"boardId":"1","counter":0}"#]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stays_quiet_until_ready() {
        let (transport, _tx, _rx) = MockTransport::new(4);
        transport.connect().await.unwrap();
        let (_status_tx, status_rx) = watch::channel(SessionStatus::default());

        let task = LivenessPublisher::new(
            Arc::new(transport.clone()),
            "tick".to_string(),
            "1".to_string(),
            Duration::from_secs(5),
            11,
            status_rx,
        )
        .spawn();
        tokio::time::sleep(Duration::from_secs(16)).await;
        task.abort();

        assert!(transport.publishes_to("tick").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_session_goes_away() {
        let (transport, _tx, _rx) = MockTransport::new(4);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let task = LivenessPublisher::new(
            Arc::new(transport),
            "tick".to_string(),
            "1".to_string(),
            Duration::from_secs(5),
            11,
            status_rx,
        )
        .spawn();
        drop(status_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("publisher should stop")
            .unwrap();
    }
}
