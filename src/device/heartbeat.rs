//! Periodic liveness signal on the status topic

use super::connection::ConnectionManager;
use crate::protocol::DeviceStatus;
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatClock {
    /// Never been ready since boot; the first heartbeat goes out on readiness
    DueNow,
    /// Last heartbeat (or readiness restore) at this instant
    Since(Instant),
    /// Readiness was lost; the interval restarts once it returns
    AwaitingReadiness,
}

/// Emits a retained `ONLINE` heartbeat every `interval` while connected
pub struct HeartbeatScheduler {
    interval: Duration,
    clock: HeartbeatClock,
    sequence: u64,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            clock: HeartbeatClock::DueNow,
            sequence: 0,
        }
    }

    /// Configured period; a session may run shorter, see
    /// [`ConnectionManager::heartbeat_interval`]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Heartbeats sent since boot
    pub fn sent(&self) -> u64 {
        self.sequence
    }

    /// Send a heartbeat if one is due, returning its sequence number
    pub fn tick<T: Transport>(
        &mut self,
        now: Instant,
        connection: &mut ConnectionManager<T>,
    ) -> Option<u64> {
        if !connection.is_ready() {
            if let HeartbeatClock::Since(_) = self.clock {
                debug!("Heartbeat paused until session is restored");
                self.clock = HeartbeatClock::AwaitingReadiness;
            }
            return None;
        }

        let due = match self.clock {
            HeartbeatClock::DueNow => true,
            HeartbeatClock::Since(last) => {
                now.saturating_duration_since(last) >= connection.heartbeat_interval()
            }
            HeartbeatClock::AwaitingReadiness => {
                self.clock = HeartbeatClock::Since(now);
                false
            }
        };
        if !due {
            return None;
        }

        self.clock = HeartbeatClock::Since(now);
        let sequence = self.sequence + 1;
        match connection.publish_status(DeviceStatus::Online, sequence, now) {
            Ok(()) => {
                self.sequence = sequence;
                debug!(sequence, "Heartbeat sent");
                Some(sequence)
            }
            Err(e) => {
                warn!(sequence, error = %e, "Heartbeat publish failed");
                None
            }
        }
    }
}
