//! Periodic sensor sampling and at-most-once publication

use super::connection::ConnectionManager;
use super::schedule::IntervalTimer;
use crate::error::EdgeError;
use crate::hardware::{SensorError, SensorSource};
use crate::protocol::{PayloadFormat, SensorKind, TelemetryReading};
use crate::transport::{DeliveryTier, Transport};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct TelemetryPublisher<S: SensorSource> {
    sensors: S,
    kinds: Vec<SensorKind>,
    timer: IntervalTimer,
    format: PayloadFormat,
    skipped: u64,
}

impl<S: SensorSource> TelemetryPublisher<S> {
    pub fn new(sensors: S, read_interval: Duration, format: PayloadFormat) -> Self {
        Self {
            sensors,
            kinds: SensorKind::ALL.to_vec(),
            timer: IntervalTimer::new(read_interval),
            format,
            skipped: 0,
        }
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    /// Readings skipped because the sensor failed or returned a non-finite value
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// When ready and the read interval has elapsed, sample every sensor and
    /// publish one message per successful reading
    pub fn tick<T: Transport>(
        &mut self,
        now: Instant,
        connection: &mut ConnectionManager<T>,
    ) -> Vec<TelemetryReading> {
        if !connection.is_ready() || !self.timer.poll(now) {
            return Vec::new();
        }

        let uptime = connection.uptime(now);
        let mut published = Vec::new();

        for kind in self.kinds.clone() {
            let value = match self.sensors.read(kind) {
                Ok(value) if value.is_finite() => value,
                Ok(value) => {
                    self.skip(kind, SensorError::NotFinite(value));
                    continue;
                }
                Err(e) => {
                    self.skip(kind, e);
                    continue;
                }
            };

            let reading = TelemetryReading {
                kind,
                value,
                uptime,
            };
            let topic = connection.topics().telemetry(kind).to_string();
            let payload = match reading.encode(self.format) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(sensor = %kind, error = %e, "Failed to encode reading");
                    continue;
                }
            };

            match connection.publish(&topic, payload, DeliveryTier::AtMostOnce, false) {
                Ok(()) => {
                    debug!(sensor = %kind, value, %topic, "Telemetry published");
                    published.push(reading);
                }
                Err(e) => warn!(sensor = %kind, error = %e, "Telemetry publish failed"),
            }
        }

        published
    }

    fn skip(&mut self, kind: SensorKind, source: SensorError) {
        self.skipped += 1;
        let error = EdgeError::sensor_read_failure(kind, source);
        warn!(sensor = %kind, error = %error, "Skipping reading this cycle");
    }
}
