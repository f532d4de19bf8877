use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::InboundFrame;
use super::{Transport, TransportError, TransportEvent};

/// Connection state as seen by the driver task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Idle,
    Up,
    Down(String),
}

type AckResult = Result<(), TransportError>;

/// Correlates requests with their broker acknowledgments.
///
/// rumqttc assigns packet ids inside the event loop, so a waiter is queued when
/// the request is handed to the client and bound to its packet id once the
/// matching `Outgoing` event shows up. Requests are enqueued under the
/// transport's outbound lock, which keeps both queues in the same order.
#[derive(Default)]
struct AckTracker {
    queued: VecDeque<oneshot::Sender<AckResult>>,
    in_flight: HashMap<u16, oneshot::Sender<AckResult>>,
}

impl AckTracker {
    fn enqueue(&mut self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back(tx);
        rx
    }

    /// Drops the most recent waiter after the client refused the request.
    fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    fn assign(&mut self, pkid: u16) {
        let Some(waiter) = self.queued.pop_front() else {
            debug!("Outgoing packet {} has no waiter", pkid);
            return;
        };
        if pkid == 0 {
            // QoS 0 has no acknowledgment
            let _ = waiter.send(Ok(()));
        } else {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn resolve(&mut self, pkid: u16, result: AckResult) {
        match self.in_flight.remove(&pkid) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!("Acknowledgment for unknown packet {}", pkid),
        }
    }

    fn fail_all(&mut self) {
        for waiter in self.queued.drain(..) {
            let _ = waiter.send(Err(TransportError::LinkLost));
        }
        for (_, waiter) in self.in_flight.drain() {
            let _ = waiter.send(Err(TransportError::LinkLost));
        }
    }
}

#[derive(Default)]
struct Acks {
    publishes: AckTracker,
    subscribes: AckTracker,
}

type SharedAcks = Arc<Mutex<Acks>>;

fn lock(acks: &SharedAcks) -> MutexGuard<'_, Acks> {
    acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// rumqttc-backed [`Transport`].
///
/// A background driver task owns the rumqttc [`EventLoop`]. It only polls
/// while a connection is wanted: after a connection error it parks until the
/// next [`Transport::connect`] call, leaving retry pacing to the session.
pub struct MqttTransport {
    client: AsyncClient,
    link: watch::Receiver<LinkState>,
    connect_request: Arc<Notify>,
    acks: SharedAcks,
    outbound: tokio::sync::Mutex<()>,
    connect_timeout: Duration,
    ack_timeout: Duration,
}

impl MqttTransport {
    /// Builds the client, registers the last will and spawns the driver task.
    ///
    /// Returns the transport and the inbound event queue. Nothing is sent to
    /// the broker until the first `connect()`.
    pub fn spawn(config: &MqttConfig, will: Vec<u8>) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                config.status_topic.clone(),
                will,
                QoS::AtLeastOnce,
                false,
            ));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let queue_len = config.queue_len.max(1);
        let (client, eventloop) = AsyncClient::new(options, queue_len);
        let (link_tx, link_rx) = watch::channel(LinkState::Idle);
        let (events_tx, events_rx) = mpsc::channel(queue_len);
        let connect_request = Arc::new(Notify::new());
        let acks = SharedAcks::default();

        let driver = MqttDriver {
            eventloop,
            link: link_tx,
            events: events_tx,
            connect_request: connect_request.clone(),
            acks: acks.clone(),
        };
        tokio::spawn(driver.run());
        info!(
            "MQTT transport prepared for {}:{} as {}",
            config.host, config.port, config.client_id
        );

        let transport = Arc::new(Self {
            client,
            link: link_rx,
            connect_request,
            acks,
            outbound: tokio::sync::Mutex::new(()),
            connect_timeout: config.connect_timeout(),
            ack_timeout: config.ack_timeout(),
        });
        (transport, events_rx)
    }

    pub fn link_state(&self) -> LinkState {
        self.link.borrow().clone()
    }

    fn ensure_up(&self) -> Result<(), TransportError> {
        match *self.link.borrow() {
            LinkState::Up => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }

    async fn await_ack(
        &self,
        ack: oneshot::Receiver<AckResult>,
        what: &'static str,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::LinkLost),
            Err(_) => Err(TransportError::Timeout(what)),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.link.clone();
        if *link.borrow_and_update() == LinkState::Up {
            return Ok(());
        }
        self.connect_request.notify_one();

        let outcome = tokio::time::timeout(self.connect_timeout, async {
            loop {
                if link.changed().await.is_err() {
                    return Err(TransportError::Closed);
                }
                match &*link.borrow_and_update() {
                    LinkState::Up => return Ok(()),
                    LinkState::Down(reason) => return Err(TransportError::Unreachable(reason.clone())),
                    LinkState::Idle => {}
                }
            }
        })
        .await;

        outcome.unwrap_or(Err(TransportError::Timeout("connection acknowledgment")))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.ensure_up()?;
        let ack = {
            let _order = self.outbound.lock().await;
            let ack = lock(&self.acks).subscribes.enqueue();
            if let Err(e) = self.client.subscribe(topic, qos).await {
                lock(&self.acks).subscribes.cancel_last();
                return Err(TransportError::Rejected(e.to_string()));
            }
            ack
        };
        self.await_ack(ack, "subscription acknowledgment").await?;
        debug!("Subscribed to {} ({:?})", topic, qos);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError> {
        self.ensure_up()?;
        let ack = {
            let _order = self.outbound.lock().await;
            let ack = lock(&self.acks).publishes.enqueue();
            if let Err(e) = self.client.publish(topic, qos, false, payload).await {
                lock(&self.acks).publishes.cancel_last();
                return Err(TransportError::Rejected(e.to_string()));
            }
            ack
        };
        self.await_ack(ack, "publish acknowledgment").await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        info!("Disconnecting from MQTT broker");
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

struct MqttDriver {
    eventloop: EventLoop,
    link: watch::Sender<LinkState>,
    events: mpsc::Sender<TransportEvent>,
    connect_request: Arc<Notify>,
    acks: SharedAcks,
}

impl MqttDriver {
    async fn run(mut self) {
        loop {
            self.connect_request.notified().await;
            if self.events.is_closed() {
                info!("Inbound queue closed, stopping MQTT driver");
                return;
            }
            debug!("Connection requested, polling MQTT event loop");
            let (error, was_up) = self.poll_until_error().await;

            // Down before LinkLost: a reconnect must not see the old Up.
            lock(&self.acks).publishes.fail_all();
            lock(&self.acks).subscribes.fail_all();
            self.link.send_replace(LinkState::Down(error.to_string()));

            if was_up {
                warn!("MQTT link lost: {}", error);
                if self
                    .events
                    .send(TransportEvent::LinkLost(error.to_string()))
                    .await
                    .is_err()
                {
                    error!("Inbound queue closed while reporting link loss");
                }
            } else {
                warn!("MQTT connection attempt failed: {}", error);
            }
        }
    }

    /// Drives the event loop until the connection fails, forwarding inbound
    /// publishes and resolving acknowledgments on the way. Also reports
    /// whether the broker had accepted the connection.
    async fn poll_until_error(&mut self) -> (ConnectionError, bool) {
        let mut up = false;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    info!("Connected to MQTT broker ({:?})", connack.code);
                    up = true;
                    self.link.send_replace(LinkState::Up);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let frame = InboundFrame::new(
                        publish.topic.clone(),
                        publish.payload.to_vec(),
                        publish.retain,
                    );
                    debug!("Received {}", frame);
                    match self.events.try_send(TransportEvent::Frame(frame)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Inbound queue full, dropping frame on {}", publish.topic)
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("Inbound queue closed, dropping frame on {}", publish.topic)
                        }
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(puback))) => {
                    lock(&self.acks).publishes.resolve(puback.pkid, Ok(()));
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    let refused = suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    let result = if refused {
                        Err(TransportError::Rejected("subscription refused by broker".to_string()))
                    } else {
                        Ok(())
                    };
                    lock(&self.acks).subscribes.resolve(suback.pkid, result);
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    lock(&self.acks).publishes.assign(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    lock(&self.acks).subscribes.assign(pkid);
                }
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(e) => return (e, up),
            }
        }
    }
}
