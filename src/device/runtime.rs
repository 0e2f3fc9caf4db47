//! The cooperative device loop
//!
//! One pass services pending transport events and then ticks the connection
//! manager, heartbeat scheduler, telemetry publisher and actuator status echo,
//! in that order. Nothing in a pass blocks; the only wait is the bounded poll
//! for inbound events between passes.

use super::commands::{CommandOutcome, CommandSubscriber};
use super::connection::{ConnectionManager, ConnectionSettings, ConnectionStats, SessionState};
use super::heartbeat::HeartbeatScheduler;
use super::telemetry::TelemetryPublisher;
use crate::config::DeviceConfig;
use crate::device_span;
use crate::error::EdgeResult;
use crate::hardware::{ActuatorSink, SensorSource};
use crate::protocol::{AckMessage, DeviceIdentity, TelemetryReading, TopicResolver};
use crate::transport::{Transport, TransportEvent};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, Instrument};

/// Time allowed for the offline status and disconnect to flush on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// What one tick produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub heartbeat: Option<u64>,
    pub telemetry: Vec<TelemetryReading>,
    pub status_echoes: Vec<AckMessage>,
}

pub struct DeviceRuntime<T: Transport, S: SensorSource, A: ActuatorSink> {
    connection: ConnectionManager<T>,
    heartbeat: HeartbeatScheduler,
    telemetry: TelemetryPublisher<S>,
    commands: CommandSubscriber<A>,
    poll_interval: Duration,
}

impl<T: Transport, S: SensorSource, A: ActuatorSink> DeviceRuntime<T, S, A> {
    /// Wire every component from a validated configuration
    pub fn new(
        config: &DeviceConfig,
        identity: DeviceIdentity,
        transport: T,
        sensors: S,
        actuators: A,
        booted: Instant,
    ) -> EdgeResult<Self> {
        let topics = TopicResolver::resolve(&config.topics.base, &identity)?;
        let format = config.topics.payload_format;

        let connection = ConnectionManager::new(
            transport,
            identity,
            topics,
            ConnectionSettings::from_config(config),
            booted,
        );

        Ok(Self {
            connection,
            heartbeat: HeartbeatScheduler::new(config.timing.heartbeat_interval()),
            telemetry: TelemetryPublisher::new(sensors, config.timing.read_interval(), format),
            commands: CommandSubscriber::new(
                actuators,
                format,
                config.timing.actuator_status_interval(),
            ),
            poll_interval: config.timing.poll_interval(),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn stats(&self) -> &ConnectionStats {
        self.connection.stats()
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.connection
    }

    pub fn heartbeat(&self) -> &HeartbeatScheduler {
        &self.heartbeat
    }

    pub fn telemetry(&self) -> &TelemetryPublisher<S> {
        &self.telemetry
    }

    pub fn commands(&self) -> &CommandSubscriber<A> {
        &self.commands
    }

    /// Run every periodic component once
    pub fn tick(&mut self, now: Instant) -> TickReport {
        self.connection.tick(now);
        TickReport {
            heartbeat: self.heartbeat.tick(now, &mut self.connection),
            telemetry: self.telemetry.tick(now, &mut self.connection),
            status_echoes: self.commands.tick(now, &mut self.connection),
        }
    }

    /// Dispatch one transport event. Returns the outcome when it carried a command.
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Option<CommandOutcome> {
        let (topic, payload) = self.connection.handle_event(event, now)?;
        Some(
            self.commands
                .handle_message(&topic, &payload, &mut self.connection),
        )
    }

    /// One pass: service `events`, then tick
    pub fn process(&mut self, events: Vec<TransportEvent>, now: Instant) -> TickReport {
        for event in events {
            self.handle_event(event, now);
        }
        self.tick(now)
    }

    /// Run until `shutdown` resolves, then announce offline and disconnect
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let span = device_span!(
            client_id = %self.connection.identity().client_id(),
            mac = %self.connection.identity().mac()
        );
        self.run_loop(shutdown).instrument(span).await
    }

    async fn run_loop<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            status_topic = %self.connection.topics().status(),
            "Device runtime started"
        );

        self.tick(Instant::now());
        loop {
            let events = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                events = self.connection.transport_mut().next_events(self.poll_interval) => events,
            };
            self.process(events, Instant::now());
        }

        info!("Shutdown requested");
        self.shutdown(Instant::now()).await;
    }

    /// Publish `OFFLINE` (when connected) and close the session
    pub async fn shutdown(&mut self, now: Instant) {
        self.connection.shutdown(now, SHUTDOWN_GRACE).await;

        let stats = self.connection.stats();
        info!(
            link_attempts = stats.link_attempts,
            session_attempts = stats.session_attempts,
            sessions_established = stats.sessions_established,
            reconnects = stats.reconnects,
            heartbeats = self.heartbeat.sent(),
            commands_applied = self.commands.applied(),
            commands_rejected = self.commands.rejected(),
            readings_skipped = self.telemetry.skipped(),
            "Device runtime stopped"
        );
    }
}
