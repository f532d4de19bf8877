//! Scriptable in-memory [`Transport`] for session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{InboundFrame, QoS, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Subscribe(String),
    Publish { topic: String, payload: String },
    Disconnect,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    connect_failures: usize,
    publish_failures: VecDeque<TransportError>,
    connected: bool,
}

/// Records every call and answers from a script.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    /// Returns the transport plus the sender used to inject inbound events.
    pub fn new(queue_len: usize) -> (Self, mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(queue_len);
        (Self::default(), tx, rx)
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// The next `n` connect attempts fail as unreachable.
    pub fn fail_connects(&self, n: usize) {
        self.script().connect_failures = n;
    }

    /// Queues an error for an upcoming publish.
    pub fn fail_next_publish(&self, error: TransportError) {
        self.script().publish_failures.push_back(error);
    }

    /// Simulates the broker dropping the link.
    pub fn drop_link(&self) {
        self.script().connected = false;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    pub fn publishes_to(&self, topic: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic: t, payload } if t == topic => Some(payload),
                _ => None,
            })
            .collect()
    }
}

pub fn frame(topic: &str, payload: &str) -> TransportEvent {
    TransportEvent::Frame(InboundFrame::new(topic, payload, false))
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut script = self.script();
        script.calls.push(Call::Connect);
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }
        script.connected = true;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut script = self.script();
        if !script.connected {
            return Err(TransportError::NotConnected);
        }
        script.calls.push(Call::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), TransportError> {
        let mut script = self.script();
        if !script.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = script.publish_failures.pop_front() {
            return Err(error);
        }
        script.calls.push(Call::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut script = self.script();
        script.calls.push(Call::Disconnect);
        script.connected = false;
        Ok(())
    }
}
