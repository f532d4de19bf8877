//! # MQTT Transport
//!
//! The publish/subscribe link between the lamp controller and its supervising
//! app. The session controller only sees the [`Transport`] trait and a queue of
//! [`TransportEvent`]s; everything rumqttc-specific stays in this module.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker, credentials and topic configuration
//! ├── message_manager.rs  - Inbound frame representation
//! └── mqtt_handler.rs     - rumqttc client, event-loop driver, ack tracking
//! ```
//!
//! ## Link Model
//!
//! ```text
//!            connect()                 ConnAck
//! Idle/Down ──────────► driver polls ──────────► Up
//!     ▲                                          │
//!     └──────────── connection error ◄───────────┘
//!                   (LinkLost event, pending acks failed)
//! ```
//!
//! The driver never reconnects on its own; reconnecting is the session's
//! decision so that backoff and re-announcement live in one place.
//!
//! ## Error Handling Strategy
//! Every transport failure is a [`TransportError`] value. None of them is fatal:
//! the session logs them and falls back to its reconnect loop.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

pub use config::MqttConfig;
pub use message_manager::InboundFrame;
pub use mqtt_handler::MqttTransport;
pub use rumqttc::QoS;

/// Things the transport reports without being asked.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A publish arrived on one of the subscribed topics
    Frame(InboundFrame),
    /// An established link dropped
    LinkLost(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Broker or network unreachable while connecting
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("not connected to broker")]
    NotConnected,

    /// The link dropped before the operation was acknowledged
    #[error("link lost before acknowledgment")]
    LinkLost,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The broker or the client refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The transport has shut down
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether the error means the link itself is gone, as opposed to a single
    /// request failing on a live link.
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected | TransportError::LinkLost | TransportError::Closed
        )
    }
}

/// Outbound side of the publish/subscribe link.
///
/// All operations complete only once the broker acknowledged them (QoS 1), or
/// fail with a [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the link. Returns immediately when already connected.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError>;

    /// Closes the link without waiting for in-flight requests.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
