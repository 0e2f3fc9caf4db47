//! Topic namespace for a single device
//!
//! Every topic has the form `<base>/<category>/<MAC>/<leaf>` where the category
//! is one of `sensores`, `actuadores` or `dispositivo`. The set is resolved once
//! at boot from the device identity and never changes afterwards.

use super::identity::DeviceIdentity;
use super::messages::{ActuatorKind, SensorKind};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const CATEGORY_SENSORS: &str = "sensores";
pub const CATEGORY_ACTUATORS: &str = "actuadores";
pub const CATEGORY_DEVICE: &str = "dispositivo";

/// Leaf for state-echo sub-topics and the device status topic
pub const STATE_LEAF: &str = "estado";

/// Logical channel a topic is resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Telemetry(SensorKind),
    Command(ActuatorKind),
    CommandAck(ActuatorKind),
    Status,
}

impl Channel {
    /// Every channel a device publishes or subscribes to
    pub fn all() -> Vec<Channel> {
        let mut channels: Vec<Channel> = SensorKind::ALL.into_iter().map(Channel::Telemetry).collect();
        for actuator in ActuatorKind::ALL {
            channels.push(Channel::Command(actuator));
            channels.push(Channel::CommandAck(actuator));
        }
        channels.push(Channel::Status);
        channels
    }

    fn category(&self) -> &'static str {
        match self {
            Channel::Telemetry(_) => CATEGORY_SENSORS,
            Channel::Command(_) | Channel::CommandAck(_) => CATEGORY_ACTUATORS,
            Channel::Status => CATEGORY_DEVICE,
        }
    }

    fn leaf(&self) -> String {
        match self {
            Channel::Telemetry(sensor) => sensor.leaf().to_string(),
            Channel::Command(actuator) => actuator.leaf().to_string(),
            Channel::CommandAck(actuator) => format!("{}/{STATE_LEAF}", actuator.leaf()),
            Channel::Status => STATE_LEAF.to_string(),
        }
    }
}

impl fmt::Display for Channel {
    /// Logical name, e.g. `telemetry.temperature` or `command.actuator.ack`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Telemetry(sensor) => write!(f, "telemetry.{}", sensor.name()),
            Channel::Command(actuator) => write!(f, "command.actuator[{}]", actuator.name()),
            Channel::CommandAck(actuator) => {
                write!(f, "command.actuator.ack[{}]", actuator.name())
            }
            Channel::Status => f.write_str("status"),
        }
    }
}

/// Immutable channel → topic mapping for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    base: String,
    topics: BTreeMap<Channel, String>,
}

impl TopicSet {
    /// Resolved topic for a channel. Every channel is resolved at construction.
    pub fn topic(&self, channel: Channel) -> &str {
        self.topics
            .get(&channel)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn telemetry(&self, sensor: SensorKind) -> &str {
        self.topic(Channel::Telemetry(sensor))
    }

    pub fn command(&self, actuator: ActuatorKind) -> &str {
        self.topic(Channel::Command(actuator))
    }

    pub fn command_ack(&self, actuator: ActuatorKind) -> &str {
        self.topic(Channel::CommandAck(actuator))
    }

    pub fn status(&self) -> &str {
        self.topic(Channel::Status)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Actuator whose command topic equals `topic`, if any
    pub fn actuator_for_command(&self, topic: &str) -> Option<ActuatorKind> {
        ActuatorKind::ALL
            .into_iter()
            .find(|actuator| self.command(*actuator) == topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &str)> {
        self.topics.iter().map(|(channel, topic)| (*channel, topic.as_str()))
    }
}

/// Builds the [`TopicSet`] for a device identity
pub struct TopicResolver;

impl TopicResolver {
    pub fn resolve(base: &str, identity: &DeviceIdentity) -> Result<TopicSet, TopicError> {
        validate_topic_base(base)?;

        let address = identity.mac().to_string();
        let mut topics = BTreeMap::new();
        for channel in Channel::all() {
            let topic = build_topic(base, channel.category(), &address, &channel.leaf());
            if let Some((other, _)) = topics.iter().find(|(_, existing)| **existing == topic) {
                return Err(TopicError::Collision {
                    first: *other,
                    second: channel,
                    topic,
                });
            }
            topics.insert(channel, topic);
        }

        Ok(TopicSet {
            base: base.to_string(),
            topics,
        })
    }

    /// Subscription filter matching every device's status topic under `base`
    pub fn status_filter(base: &str) -> String {
        build_topic(base, CATEGORY_DEVICE, "+", STATE_LEAF)
    }

    /// Extract the device address segment from a status topic under `base`
    pub fn address_from_status_topic<'a>(base: &str, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
        let rest = rest.strip_prefix(CATEGORY_DEVICE)?.strip_prefix('/')?;
        let address = rest.strip_suffix(STATE_LEAF)?.strip_suffix('/')?;
        (!address.is_empty() && !address.contains('/')).then_some(address)
    }
}

fn build_topic(base: &str, category: &str, address: &str, leaf: &str) -> String {
    format!("{base}/{category}/{address}/{leaf}")
}

/// A topic base must be non-empty, without wildcards or surrounding slashes
pub fn validate_topic_base(base: &str) -> Result<(), TopicError> {
    if base.is_empty() {
        return Err(TopicError::EmptyBase);
    }
    if let Some(ch) = base.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(TopicError::InvalidBaseChar(ch));
    }
    if base.starts_with('/') || base.ends_with('/') || base.contains("//") {
        return Err(TopicError::MalformedBase(base.to_string()));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic base cannot be empty")]
    EmptyBase,
    #[error("Topic base contains invalid character: '{0}'")]
    InvalidBaseChar(char),
    #[error("Topic base has empty segments or surrounding slashes: '{0}'")]
    MalformedBase(String),
    #[error("Channels {first} and {second} both resolve to {topic}")]
    Collision {
        first: Channel,
        second: Channel,
        topic: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::identity::MacAddress;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn identity(bytes: [u8; 6]) -> DeviceIdentity {
        DeviceIdentity::new(MacAddress::new(bytes), "ESP32-Salon").unwrap()
    }

    #[test]
    fn test_topic_namespace_is_bit_exact() {
        let topics =
            TopicResolver::resolve("damiot", &identity([0x7c, 0x9e, 0xbd, 0xf1, 0xda, 0xe4]))
                .unwrap();

        assert_eq!(
            topics.telemetry(SensorKind::Temperature),
            "damiot/sensores/7C:9E:BD:F1:DA:E4/temperatura"
        );
        assert_eq!(
            topics.telemetry(SensorKind::Humidity),
            "damiot/sensores/7C:9E:BD:F1:DA:E4/humedad"
        );
        assert_eq!(
            topics.command(ActuatorKind::BlueLed),
            "damiot/actuadores/7C:9E:BD:F1:DA:E4/led_azul"
        );
        assert_eq!(
            topics.command_ack(ActuatorKind::BlueLed),
            "damiot/actuadores/7C:9E:BD:F1:DA:E4/led_azul/estado"
        );
        assert_eq!(
            topics.status(),
            "damiot/dispositivo/7C:9E:BD:F1:DA:E4/estado"
        );
    }

    #[test]
    fn test_every_channel_resolved() {
        let topics = TopicResolver::resolve("damiot", &identity([1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(topics.iter().count(), Channel::all().len());
        for channel in Channel::all() {
            assert!(!topics.topic(channel).is_empty(), "{channel} unresolved");
        }
    }

    #[test]
    fn test_actuator_for_command() {
        let topics = TopicResolver::resolve("damiot", &identity([1, 2, 3, 4, 5, 6])).unwrap();
        let command = topics.command(ActuatorKind::BlueLed).to_string();
        assert_eq!(
            topics.actuator_for_command(&command),
            Some(ActuatorKind::BlueLed)
        );
        let ack = topics.command_ack(ActuatorKind::BlueLed).to_string();
        assert_eq!(topics.actuator_for_command(&ack), None);
        assert_eq!(topics.actuator_for_command(topics.status()), None);
    }

    #[test]
    fn test_invalid_bases_rejected() {
        let id = identity([1, 2, 3, 4, 5, 6]);
        assert_eq!(
            TopicResolver::resolve("", &id).unwrap_err(),
            TopicError::EmptyBase
        );
        assert_eq!(
            TopicResolver::resolve("damiot/#", &id).unwrap_err(),
            TopicError::InvalidBaseChar('#')
        );
        assert_eq!(
            TopicResolver::resolve("da+miot", &id).unwrap_err(),
            TopicError::InvalidBaseChar('+')
        );
        assert!(matches!(
            TopicResolver::resolve("/damiot", &id),
            Err(TopicError::MalformedBase(_))
        ));
        assert!(matches!(
            TopicResolver::resolve("home//damiot", &id),
            Err(TopicError::MalformedBase(_))
        ));
        assert!(TopicResolver::resolve("home/damiot", &id).is_ok());
    }

    #[test]
    fn test_status_filter_and_address_extraction() {
        assert_eq!(
            TopicResolver::status_filter("damiot"),
            "damiot/dispositivo/+/estado"
        );
        assert_eq!(
            TopicResolver::address_from_status_topic(
                "damiot",
                "damiot/dispositivo/7C:9E:BD:F1:DA:E4/estado"
            ),
            Some("7C:9E:BD:F1:DA:E4")
        );
        assert_eq!(
            TopicResolver::address_from_status_topic("damiot", "damiot/dispositivo/estado"),
            None
        );
        assert_eq!(
            TopicResolver::address_from_status_topic(
                "damiot",
                "damiot/sensores/7C:9E:BD:F1:DA:E4/temperatura"
            ),
            None
        );
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(bytes in any::<[u8; 6]>(), base in "[a-z][a-z0-9_]{0,11}(/[a-z0-9_]{1,8}){0,2}") {
            let id = identity(bytes);
            let first = TopicResolver::resolve(&base, &id).unwrap();
            let second = TopicResolver::resolve(&base, &id).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn topics_unique_per_leaf(bytes in any::<[u8; 6]>(), base in "[a-z][a-z0-9_]{0,11}") {
            let topics = TopicResolver::resolve(&base, &identity(bytes)).unwrap();
            let unique: HashSet<&str> = topics.iter().map(|(_, topic)| topic).collect();
            prop_assert_eq!(unique.len(), Channel::all().len());
        }

        #[test]
        fn topics_embed_identity(bytes in any::<[u8; 6]>()) {
            let id = identity(bytes);
            let topics = TopicResolver::resolve("damiot", &id).unwrap();
            let address = id.mac().to_string();
            for (_, topic) in topics.iter() {
                let segments: Vec<&str> = topic.split('/').collect();
                prop_assert_eq!(segments[0], "damiot");
                prop_assert_eq!(segments[2], address.as_str());
            }
        }

        #[test]
        fn distinct_devices_never_share_topics(a in any::<[u8; 6]>(), b in any::<[u8; 6]>()) {
            prop_assume!(a != b);
            let first = TopicResolver::resolve("damiot", &identity(a)).unwrap();
            let second = TopicResolver::resolve("damiot", &identity(b)).unwrap();
            for channel in Channel::all() {
                prop_assert_ne!(first.topic(channel), second.topic(channel));
            }
        }
    }
}
