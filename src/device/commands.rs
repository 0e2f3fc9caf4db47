//! Actuator command handling and state echo

use super::connection::ConnectionManager;
use super::schedule::IntervalTimer;
use crate::error::EdgeError;
use crate::hardware::ActuatorSink;
use crate::protocol::{AckMessage, ActuatorKind, CommandMessage, PayloadFormat};
use crate::transport::{DeliveryTier, Transport};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Applied and acknowledged
    Acknowledged(AckMessage),
    /// Applied, but the ack could not be published
    AppliedWithoutAck(AckMessage),
    /// Payload did not parse; actuator untouched
    Rejected,
    /// Actuator refused the state
    ActuatorFailed,
    /// Topic is not a command topic of this device
    Ignored,
}

pub struct CommandSubscriber<A: ActuatorSink> {
    actuators: A,
    format: PayloadFormat,
    status_timer: Option<IntervalTimer>,
    applied: u64,
    rejected: u64,
}

impl<A: ActuatorSink> CommandSubscriber<A> {
    /// `status_interval` enables a periodic echo of every known actuator state
    pub fn new(actuators: A, format: PayloadFormat, status_interval: Option<Duration>) -> Self {
        Self {
            actuators,
            format,
            status_timer: status_interval.map(IntervalTimer::new),
            applied: 0,
            rejected: 0,
        }
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Parse, apply and acknowledge a message received on `topic`
    pub fn handle_message<T: Transport>(
        &mut self,
        topic: &str,
        payload: &[u8],
        connection: &mut ConnectionManager<T>,
    ) -> CommandOutcome {
        let Some(actuator) = connection.topics().actuator_for_command(topic) else {
            debug!(%topic, "Ignoring message on non-command topic");
            return CommandOutcome::Ignored;
        };

        let command = match CommandMessage::parse(actuator, payload) {
            Ok(command) => command,
            Err(e) => {
                self.rejected += 1;
                let error = EdgeError::malformed_command(actuator, e);
                warn!(
                    %topic,
                    payload = %String::from_utf8_lossy(payload),
                    error = %error,
                    "Dropping malformed command"
                );
                return CommandOutcome::Rejected;
            }
        };

        let applied = match self.actuators.set_state(command.actuator, command.state) {
            Ok(state) => state,
            Err(e) => {
                error!(actuator = %actuator, error = %e, "Actuator failed to apply command");
                return CommandOutcome::ActuatorFailed;
            }
        };
        self.applied += 1;
        info!(actuator = %actuator, state = applied.as_plain(), "Command applied");

        let ack = AckMessage {
            actuator,
            state: applied,
        };
        if self.publish_ack(&ack, connection) {
            CommandOutcome::Acknowledged(ack)
        } else {
            CommandOutcome::AppliedWithoutAck(ack)
        }
    }

    /// Re-assert every known actuator state when the status cadence is due
    pub fn tick<T: Transport>(
        &mut self,
        now: Instant,
        connection: &mut ConnectionManager<T>,
    ) -> Vec<AckMessage> {
        if !connection.is_ready() {
            return Vec::new();
        }
        let Some(timer) = self.status_timer.as_mut() else {
            return Vec::new();
        };
        if !timer.poll(now) {
            return Vec::new();
        }

        let mut echoed = Vec::new();
        for actuator in ActuatorKind::ALL {
            let Some(state) = self.actuators.state(actuator) else {
                continue;
            };
            let ack = AckMessage { actuator, state };
            if self.publish_ack(&ack, connection) {
                echoed.push(ack);
            }
        }
        echoed
    }

    fn publish_ack<T: Transport>(
        &self,
        ack: &AckMessage,
        connection: &mut ConnectionManager<T>,
    ) -> bool {
        let topic = connection.topics().command_ack(ack.actuator).to_string();
        let payload = match ack.encode(self.format) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(actuator = %ack.actuator, error = %e, "Failed to encode ack");
                return false;
            }
        };

        match connection.publish(&topic, payload, DeliveryTier::AtLeastOnce, false) {
            Ok(()) => {
                debug!(%topic, state = ack.state.as_plain(), "Ack published");
                true
            }
            Err(e) => {
                warn!(%topic, error = %e, "Ack publish failed");
                false
            }
        }
    }
}
