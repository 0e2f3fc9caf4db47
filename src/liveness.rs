//! Backend side of the liveness contract
//!
//! A device is online while its status topic keeps receiving traffic. It is
//! declared offline when it announces `OFFLINE` (clean shutdown or the broker
//! firing its last will), or when nothing has arrived for
//! [`LivenessPolicy::offline_after`]. Sweeps run every
//! [`LivenessPolicy::check_interval`], so detection happens within
//! `offline_after + check_interval` of the last heartbeat.

use crate::config::DeviceConfig;
use crate::protocol::{DeviceStatus, MacAddress, TopicResolver};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sampling cadence and silence tolerance for offline detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub check_interval: Duration,
    pub offline_after: Duration,
}

impl LivenessPolicy {
    /// Check every 1.5 heartbeats, declare offline after 3 missed
    pub fn for_heartbeat(heartbeat_interval: Duration) -> Self {
        Self {
            check_interval: heartbeat_interval.mul_f64(1.5),
            offline_after: heartbeat_interval * 3,
        }
    }

    /// Policy matching a device's configured heartbeat
    pub fn for_config(config: &DeviceConfig) -> Self {
        Self::for_heartbeat(config.timing.heartbeat_interval())
    }

    /// Worst-case delay between the last heartbeat and the offline verdict
    pub fn detection_bound(&self) -> Duration {
        self.offline_after + self.check_interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// Device or broker (last will) published `OFFLINE`
    Announced,
    /// No status traffic for this long
    Silent(Duration),
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfflineReason::Announced => f.write_str("announced offline"),
            OfflineReason::Silent(silence) => write!(f, "silent for {}ms", silence.as_millis()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessTransition {
    CameOnline(MacAddress),
    WentOffline(MacAddress, OfflineReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub liveness: Liveness,
    pub last_seen: Instant,
}

/// Classifies devices from status-topic traffic
pub struct LivenessMonitor {
    policy: LivenessPolicy,
    base: String,
    devices: BTreeMap<MacAddress, DeviceRecord>,
}

impl LivenessMonitor {
    pub fn new(policy: LivenessPolicy, base: impl Into<String>) -> Self {
        Self {
            policy,
            base: base.into(),
            devices: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    /// Topic filter covering every device's status topic
    pub fn subscription(&self) -> String {
        TopicResolver::status_filter(&self.base)
    }

    pub fn liveness(&self, mac: &MacAddress) -> Option<Liveness> {
        self.devices.get(mac).map(|record| record.liveness)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&MacAddress, &DeviceRecord)> {
        self.devices.iter()
    }

    /// Record a message seen on a status topic
    pub fn observe(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> Option<LivenessTransition> {
        let address = TopicResolver::address_from_status_topic(&self.base, topic)?;
        let mac: MacAddress = match address.parse() {
            Ok(mac) => mac,
            Err(_) => {
                warn!(%topic, "Ignoring status from malformed device address");
                return None;
            }
        };

        // An empty retained publish clears the topic; it says nothing about liveness
        if payload.is_empty() {
            return None;
        }

        // Any payload other than OFFLINE counts as a sign of life
        if let Ok(DeviceStatus::Offline) = DeviceStatus::parse(payload) {
            return self.mark_offline(mac, OfflineReason::Announced, now);
        }

        let previous = self.devices.insert(
            mac,
            DeviceRecord {
                liveness: Liveness::Online,
                last_seen: now,
            },
        );
        match previous {
            Some(record) if record.liveness == Liveness::Online => {
                debug!(%mac, "Heartbeat");
                None
            }
            _ => {
                info!(%mac, "Device online");
                Some(LivenessTransition::CameOnline(mac))
            }
        }
    }

    /// Declare offline every online device silent for longer than the policy allows
    pub fn sweep(&mut self, now: Instant) -> Vec<LivenessTransition> {
        let silent: Vec<(MacAddress, Duration)> = self
            .devices
            .iter()
            .filter(|(_, record)| record.liveness == Liveness::Online)
            .map(|(mac, record)| (*mac, now.saturating_duration_since(record.last_seen)))
            .filter(|(_, silence)| *silence > self.policy.offline_after)
            .collect();

        silent
            .into_iter()
            .filter_map(|(mac, silence)| self.mark_offline(mac, OfflineReason::Silent(silence), now))
            .collect()
    }

    fn mark_offline(
        &mut self,
        mac: MacAddress,
        reason: OfflineReason,
        now: Instant,
    ) -> Option<LivenessTransition> {
        let record = self.devices.entry(mac).or_insert(DeviceRecord {
            liveness: Liveness::Online,
            last_seen: now,
        });
        if record.liveness == Liveness::Offline {
            return None;
        }
        record.liveness = Liveness::Offline;
        warn!(%mac, %reason, "Device offline");
        Some(LivenessTransition::WentOffline(mac, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "damiot/dispositivo/7C:9E:BD:F1:DA:E4/estado";

    fn mac() -> MacAddress {
        "7C:9E:BD:F1:DA:E4".parse().unwrap()
    }

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(
            LivenessPolicy::for_heartbeat(Duration::from_secs(5)),
            "damiot",
        )
    }

    #[test]
    fn test_policy_follows_heartbeat_not_keep_alive() {
        let mut config: DeviceConfig = toml::from_str(
            r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtt://localhost:1883"
keep_alive_secs = 10
"#,
        )
        .unwrap();
        config.timing.heartbeat_interval_ms = 2_000;

        let policy = LivenessPolicy::for_config(&config);
        assert_eq!(policy.check_interval, Duration::from_secs(3));
        assert_eq!(policy.offline_after, Duration::from_secs(6));
    }

    #[test]
    fn test_policy_from_heartbeat() {
        let policy = LivenessPolicy::for_heartbeat(Duration::from_secs(10));
        assert_eq!(policy.check_interval, Duration::from_secs(15));
        assert_eq!(policy.offline_after, Duration::from_secs(30));
        assert_eq!(policy.detection_bound(), Duration::from_secs(45));
    }

    #[test]
    fn test_first_heartbeat_brings_device_online() {
        let mut monitor = monitor();
        let now = Instant::now();
        assert_eq!(
            monitor.observe(STATUS, b"ONLINE", now),
            Some(LivenessTransition::CameOnline(mac()))
        );
        assert_eq!(monitor.observe(STATUS, b"ONLINE", now), None);
        assert_eq!(monitor.liveness(&mac()), Some(Liveness::Online));
    }

    #[test]
    fn test_any_payload_counts_as_heartbeat() {
        let mut monitor = monitor();
        assert!(monitor
            .observe(STATUS, b"192.168.8.50", Instant::now())
            .is_some());
        assert_eq!(monitor.liveness(&mac()), Some(Liveness::Online));
    }

    #[test]
    fn test_last_will_marks_offline() {
        let mut monitor = monitor();
        let now = Instant::now();
        monitor.observe(STATUS, b"ONLINE", now);
        assert_eq!(
            monitor.observe(STATUS, b"OFFLINE", now),
            Some(LivenessTransition::WentOffline(
                mac(),
                OfflineReason::Announced
            ))
        );
        assert_eq!(monitor.observe(STATUS, b"OFFLINE", now), None);
    }

    #[test]
    fn test_silence_beyond_tolerance_marks_offline() {
        let mut monitor = monitor();
        let start = Instant::now();
        monitor.observe(STATUS, b"ONLINE", start);

        assert!(monitor.sweep(start + Duration::from_secs(15)).is_empty());
        let transitions = monitor.sweep(start + Duration::from_millis(15_001));
        assert_eq!(
            transitions,
            vec![LivenessTransition::WentOffline(
                mac(),
                OfflineReason::Silent(Duration::from_millis(15_001))
            )]
        );
        assert!(monitor.sweep(start + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_heartbeats_keep_device_online() {
        let mut monitor = monitor();
        let start = Instant::now();
        for beat in 0..10u64 {
            let t = start + Duration::from_secs(5 * beat);
            monitor.observe(STATUS, b"ONLINE", t);
            assert!(monitor.sweep(t + Duration::from_secs(7)).is_empty());
        }
    }

    #[test]
    fn test_unrelated_topics_ignored() {
        let mut monitor = monitor();
        let now = Instant::now();
        assert_eq!(
            monitor.observe("damiot/sensores/7C:9E:BD:F1:DA:E4/temperatura", b"25.50", now),
            None
        );
        assert_eq!(
            monitor.observe("damiot/dispositivo/not-a-mac/estado", b"ONLINE", now),
            None
        );
        assert_eq!(monitor.devices().count(), 0);
    }

    #[test]
    fn test_empty_retained_clear_ignored() {
        let mut monitor = monitor();
        assert_eq!(monitor.observe(STATUS, b"", Instant::now()), None);
        assert_eq!(monitor.liveness(&mac()), None);
    }
}
