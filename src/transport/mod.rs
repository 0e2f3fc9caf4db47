//! Transport layer for the device message bus
//!
//! The [`Transport`] trait is the seam between the connectivity state machine
//! and the actual bus. Commands are synchronous and non-blocking; session
//! progress and inbound messages come back as [`TransportEvent`]s so the
//! state machine stays the single owner of session state.

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryTier {
    /// Fire and forget (QoS 0)
    AtMostOnce,
    /// Acknowledged, may duplicate (QoS 1)
    AtLeastOnce,
}

/// Message the broker publishes on our behalf if the session dies uncleanly
#[derive(Debug, Clone, PartialEq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub tier: DeliveryTier,
    pub retain: bool,
}

/// Everything needed to open a broker session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub last_will: WillMessage,
}

/// Session progress and inbound traffic reported by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the session (ConnAck success). `server_keep_alive` is
    /// set when the broker overrode the requested keep-alive.
    SessionEstablished { server_keep_alive: Option<Duration> },
    /// Session could not be opened (refused or transport error before ConnAck)
    SessionFailed(String),
    /// An established session was lost
    Disconnected(String),
    /// Inbound publish on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Link down: {0}")]
    LinkDown(String),
    #[error("No active session")]
    NotConnected,
    #[error("Session setup failed: {0}")]
    SessionSetup(String),
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
}

/// Message bus session used by the connection manager
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Bring the network link up (associate with the access point)
    fn associate_link(&mut self) -> Result<(), TransportError>;

    /// Whether the network link is currently usable
    fn link_up(&self) -> bool;

    /// Local address used to reach the broker, if it can be determined
    fn local_ip(&self) -> Option<IpAddr> {
        None
    }

    /// Start opening a broker session. Completion is reported through
    /// [`TransportEvent::SessionEstablished`] or [`TransportEvent::SessionFailed`].
    fn begin_session(&mut self, request: &SessionRequest) -> Result<(), TransportError>;

    /// Drop any session, pending or established, without a clean disconnect.
    /// Idempotent.
    fn end_session(&mut self);

    /// Cleanly disconnect, giving queued publishes up to `grace` to flush
    async fn close(&mut self, grace: Duration);

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        tier: DeliveryTier,
        retain: bool,
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str, tier: DeliveryTier) -> Result<(), TransportError>;

    /// Wait up to `budget` for events, returning everything that is pending
    async fn next_events(&mut self, budget: Duration) -> Vec<TransportEvent>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
