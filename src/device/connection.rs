//! Connectivity state machine
//!
//! [`ConnectionManager`] owns the transport and is the only writer of
//! [`SessionState`]. Every `tick` performs at most one connection attempt, and
//! link and session attempts are each spaced at least `reconnect_interval`
//! apart. Retries are unlimited.

use crate::config::{DeviceConfig, KeepAliveContract};
use crate::error::EdgeError;
use crate::protocol::{
    ActuatorKind, DeviceIdentity, DeviceStatus, PayloadFormat, StatusMessage, TopicSet,
};
use crate::transport::{
    DeliveryTier, WillMessage, SessionRequest, Transport, TransportError, TransportEvent,
};
use chrono::Utc;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection lifecycle of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    LinkConnecting,
    LinkConnected,
    BrokerConnecting,
    BrokerConnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::LinkConnecting => "link_connecting",
            SessionState::LinkConnected => "link_connected",
            SessionState::BrokerConnecting => "broker_connecting",
            SessionState::BrokerConnected => "broker_connected",
        };
        f.write_str(name)
    }
}

/// Timing and encoding the state machine needs from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub keep_alive: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub payload_format: PayloadFormat,
}

impl ConnectionSettings {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            keep_alive: config.keep_alive().keep_alive,
            heartbeat_interval: config.timing.heartbeat_interval(),
            reconnect_interval: config.timing.reconnect_interval(),
            connect_timeout: config.timing.connect_timeout(),
            payload_format: config.topics.payload_format,
        }
    }
}

/// Counters describing connection health since boot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    pub link_attempts: u64,
    pub link_failures: u64,
    pub session_attempts: u64,
    pub session_failures: u64,
    pub sessions_established: u64,
    /// Sessions established after the first one
    pub reconnects: u64,
    pub connected_since: Option<Instant>,
    pub last_failure: Option<String>,
}

impl ConnectionStats {
    /// How long the current session has been up
    pub fn session_uptime(&self, now: Instant) -> Option<Duration> {
        self.connected_since
            .map(|since| now.saturating_duration_since(since))
    }
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    identity: DeviceIdentity,
    topics: TopicSet,
    settings: ConnectionSettings,
    state: SessionState,
    booted: Instant,
    last_link_attempt: Option<Instant>,
    last_session_attempt: Option<Instant>,
    session_deadline: Option<Instant>,
    /// Keep-alive in force for the current session, as agreed in the ConnAck
    negotiated_keep_alive: Option<Duration>,
    /// Heartbeat cap while the agreed keep-alive is at or below the configured heartbeat
    heartbeat_ceiling: Option<Duration>,
    /// Address reported in JSON status documents for the current session
    local_ip: Option<IpAddr>,
    stats: ConnectionStats,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        identity: DeviceIdentity,
        topics: TopicSet,
        settings: ConnectionSettings,
        booted: Instant,
    ) -> Self {
        Self {
            transport,
            identity,
            topics,
            settings,
            state: SessionState::Disconnected,
            booted,
            last_link_attempt: None,
            last_session_attempt: None,
            session_deadline: None,
            negotiated_keep_alive: None,
            heartbeat_ceiling: None,
            local_ip: None,
            stats: ConnectionStats::default(),
        }
    }

    /// True only while a broker session is established
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::BrokerConnected
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Keep-alive agreed for the current session
    pub fn negotiated_keep_alive(&self) -> Option<Duration> {
        self.negotiated_keep_alive
    }

    /// Heartbeat period to use for the current session: the configured one,
    /// or half the agreed keep-alive when the broker imposed a shorter one
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_ceiling
            .map_or(self.settings.heartbeat_interval, |ceiling| {
                ceiling.min(self.settings.heartbeat_interval)
            })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Time since boot, used as the device-local monotonic tick
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.booted)
    }

    /// Advance the state machine, making at most one connection attempt
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            SessionState::Disconnected => {
                self.transition(SessionState::LinkConnecting);
                self.attempt_link(now);
            }
            SessionState::LinkConnecting => {
                if self.retry_due(self.last_link_attempt, now) {
                    self.attempt_link(now);
                }
            }
            SessionState::LinkConnected => {
                if !self.transport.link_up() {
                    self.lose_link("link dropped before session attempt");
                } else if self.retry_due(self.last_session_attempt, now) {
                    self.attempt_session(now);
                }
            }
            SessionState::BrokerConnecting => {
                if !self.transport.link_up() {
                    self.lose_link("link dropped while opening session");
                } else if self.session_deadline.is_some_and(|deadline| now >= deadline) {
                    let timeout_ms = self.settings.connect_timeout.as_millis() as u64;
                    self.fail_session(format!("no ConnAck within {timeout_ms}ms"));
                }
            }
            SessionState::BrokerConnected => {
                if !self.transport.link_up() {
                    self.lose_link("link lost while connected");
                }
            }
        }
    }

    /// Apply a session event. Inbound messages are not handled here and are
    /// handed back to the caller.
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Option<(String, Vec<u8>)> {
        match event {
            TransportEvent::SessionEstablished { server_keep_alive } => {
                if self.state == SessionState::BrokerConnecting {
                    self.on_session_established(server_keep_alive, now);
                } else {
                    debug!(state = %self.state, "Ignoring stale session acknowledgement");
                }
                None
            }
            TransportEvent::SessionFailed(reason) => {
                if self.state == SessionState::BrokerConnecting {
                    self.fail_session(reason);
                } else {
                    debug!(state = %self.state, %reason, "Ignoring stale session failure");
                }
                None
            }
            TransportEvent::Disconnected(reason) => {
                match self.state {
                    SessionState::BrokerConnected | SessionState::BrokerConnecting => {
                        self.lose_session(reason)
                    }
                    _ => debug!(state = %self.state, %reason, "Ignoring stale disconnect"),
                }
                None
            }
            TransportEvent::Message { topic, payload } => {
                if self.is_ready() {
                    Some((topic, payload))
                } else {
                    debug!(%topic, "Dropping message received outside an established session");
                    None
                }
            }
        }
    }

    /// Publish through the session. Fails without touching the transport when
    /// no session is established.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        tier: DeliveryTier,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotConnected);
        }
        self.transport.publish(topic, payload, tier, retain)
    }

    /// Publish a retained status message on the status topic
    pub fn publish_status(
        &mut self,
        status: DeviceStatus,
        sequence: u64,
        now: Instant,
    ) -> Result<(), TransportError> {
        let topic = self.topics.status().to_string();
        let payload = self
            .status_message(status, sequence, now)
            .encode(self.settings.payload_format)
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
        self.publish(&topic, payload, DeliveryTier::AtLeastOnce, true)
    }

    /// Announce `OFFLINE` if connected, then close the session cleanly
    pub async fn shutdown(&mut self, now: Instant, grace: Duration) {
        if self.is_ready() {
            if let Err(e) = self.publish_status(DeviceStatus::Offline, 0, now) {
                warn!(error = %e, "Failed to publish offline status during shutdown");
            }
        }
        self.transport.close(grace).await;
        self.session_deadline = None;
        self.clear_session_details();
        self.stats.connected_since = None;
        self.transition(SessionState::Disconnected);
        info!("Connection shut down");
    }

    fn status_message(&self, status: DeviceStatus, sequence: u64, now: Instant) -> StatusMessage {
        StatusMessage {
            status,
            client_id: self.identity.client_id().to_string(),
            sequence,
            uptime: self.uptime(now),
            timestamp: Utc::now(),
            ip: self.local_ip,
        }
    }

    fn retry_due(&self, last_attempt: Option<Instant>, now: Instant) -> bool {
        match last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.settings.reconnect_interval,
        }
    }

    fn attempt_link(&mut self, now: Instant) {
        self.last_link_attempt = Some(now);
        self.stats.link_attempts += 1;

        match self.transport.associate_link() {
            Ok(()) => {
                info!(attempt = self.stats.link_attempts, "Link associated");
                self.transition(SessionState::LinkConnected);
            }
            Err(e) => {
                self.stats.link_failures += 1;
                let error = EdgeError::from(e);
                warn!(
                    attempt = self.stats.link_attempts,
                    retry_in_ms = self.settings.reconnect_interval.as_millis() as u64,
                    error = %error,
                    "Link association failed"
                );
                self.stats.last_failure = Some(error.to_string());
            }
        }
    }

    fn attempt_session(&mut self, now: Instant) {
        self.last_session_attempt = Some(now);
        self.stats.session_attempts += 1;

        let request = self.session_request();
        match self.transport.begin_session(&request) {
            Ok(()) => {
                self.session_deadline = Some(now + self.settings.connect_timeout);
                info!(
                    attempt = self.stats.session_attempts,
                    client_id = %request.client_id,
                    "Opening broker session"
                );
                self.transition(SessionState::BrokerConnecting);
            }
            Err(e) => {
                self.stats.session_failures += 1;
                let error = EdgeError::session_failure(e.to_string());
                warn!(
                    attempt = self.stats.session_attempts,
                    error = %error,
                    "Broker session could not be started"
                );
                self.stats.last_failure = Some(error.to_string());
            }
        }
    }

    fn session_request(&self) -> SessionRequest {
        let offline = self.status_message(DeviceStatus::Offline, 0, self.booted);
        let payload = offline
            .encode(self.settings.payload_format)
            .unwrap_or_else(|_| DeviceStatus::Offline.as_plain().as_bytes().to_vec());

        SessionRequest {
            client_id: self.identity.client_id().to_string(),
            keep_alive: self.settings.keep_alive,
            connect_timeout: self.settings.connect_timeout,
            last_will: WillMessage {
                topic: self.topics.status().to_string(),
                payload,
                tier: DeliveryTier::AtLeastOnce,
                retain: true,
            },
        }
    }

    fn on_session_established(&mut self, server_keep_alive: Option<Duration>, now: Instant) {
        self.session_deadline = None;
        self.agree_keep_alive(server_keep_alive);
        if self.settings.payload_format == PayloadFormat::Json {
            self.local_ip = self.transport.local_ip();
        }
        self.stats.sessions_established += 1;
        if self.stats.sessions_established > 1 {
            self.stats.reconnects += 1;
        }
        self.stats.connected_since = Some(now);
        self.transition(SessionState::BrokerConnected);

        if let Err(e) = self.publish_status(DeviceStatus::Online, 0, now) {
            warn!(error = %e, "Failed to announce online status");
        }

        for actuator in ActuatorKind::ALL {
            let topic = self.topics.command(actuator).to_string();
            if let Err(e) = self.transport.subscribe(&topic, DeliveryTier::AtLeastOnce) {
                self.lose_session(format!("subscription failed: {e}"));
                return;
            }
            debug!(%topic, "Subscribed to command topic");
        }

        info!(
            sessions = self.stats.sessions_established,
            reconnects = self.stats.reconnects,
            "Broker session established"
        );
    }

    /// Re-check the heartbeat against the keep-alive the broker settled on
    fn agree_keep_alive(&mut self, server_keep_alive: Option<Duration>) {
        let keep_alive = server_keep_alive.unwrap_or(self.settings.keep_alive);
        self.negotiated_keep_alive = Some(keep_alive);
        self.heartbeat_ceiling = None;

        if server_keep_alive.is_none() {
            return;
        }
        info!(
            requested_secs = self.settings.keep_alive.as_secs(),
            server_secs = keep_alive.as_secs(),
            "Broker imposed keep-alive"
        );
        // Zero turns keep-alive off; nothing to stay under
        if keep_alive.is_zero() {
            return;
        }

        let contract = KeepAliveContract::new(keep_alive);
        if let Err(e) = contract.check_heartbeat(self.settings.heartbeat_interval) {
            let ceiling = contract.recommended_max_heartbeat();
            warn!(
                error = %e,
                heartbeat_ms = ceiling.as_millis() as u64,
                "Heartbeat shortened for this session"
            );
            self.heartbeat_ceiling = Some(ceiling);
        }
    }

    /// Session attempt failed before ConnAck; fall back to LinkConnected
    fn fail_session(&mut self, reason: String) {
        self.transport.end_session();
        self.session_deadline = None;
        self.stats.session_failures += 1;

        let error = EdgeError::session_failure(reason);
        warn!(
            attempt = self.stats.session_attempts,
            retry_in_ms = self.settings.reconnect_interval.as_millis() as u64,
            error = %error,
            "Broker session attempt failed"
        );
        self.stats.last_failure = Some(error.to_string());
        self.transition(SessionState::LinkConnected);
    }

    /// Established (or pending) session lost; all session state is discarded
    fn lose_session(&mut self, reason: String) {
        self.transport.end_session();
        self.session_deadline = None;
        self.clear_session_details();
        self.stats.connected_since = None;

        let error = EdgeError::session_failure(reason);
        warn!(error = %error, "Broker session lost");
        self.stats.last_failure = Some(error.to_string());
        self.transition(SessionState::Disconnected);
    }

    fn lose_link(&mut self, reason: &str) {
        self.transport.end_session();
        self.session_deadline = None;
        self.clear_session_details();
        self.stats.connected_since = None;

        let error = EdgeError::link_failure(reason);
        warn!(error = %error, "Link lost");
        self.stats.last_failure = Some(error.to_string());
        self.transition(SessionState::Disconnected);
    }

    fn clear_session_details(&mut self) {
        self.negotiated_keep_alive = None;
        self.heartbeat_ceiling = None;
        self.local_ip = None;
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            info!(from = %self.state, to = %to, "Connection state changed");
            self.state = to;
        }
    }
}
