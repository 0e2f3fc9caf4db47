//! Pure routing of rumqttc events into transport events
//!
//! Nothing in here touches the network; the event-loop task in `client.rs`
//! feeds raw events through these functions and forwards the result.

use crate::transport::{DeliveryTier, TransportEvent};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;
use std::time::Duration;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    accepted: connack.code == ConnectReturnCode::Success,
                    code: format!("{:?}", connack.code),
                    server_keep_alive: connack
                        .properties
                        .as_ref()
                        .and_then(|props| props.server_keep_alive),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .map(|code| format!("{code:?}"))
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Translate a routing decision into the event the state machine consumes.
    /// Routes that need no reaction yield `None`.
    pub fn to_transport_event(route: EventRoute) -> Option<TransportEvent> {
        match route {
            EventRoute::ConnectionAcknowledged {
                accepted: true,
                server_keep_alive,
                ..
            } => Some(TransportEvent::SessionEstablished {
                server_keep_alive: server_keep_alive
                    .map(|secs| Duration::from_secs(u64::from(secs))),
            }),
            EventRoute::ConnectionAcknowledged {
                accepted: false,
                code,
                ..
            } => Some(TransportEvent::SessionFailed(format!(
                "broker refused connection: {code}"
            ))),
            EventRoute::MessageReceived { topic, payload, .. } => {
                Some(TransportEvent::Message { topic, payload })
            }
            EventRoute::Disconnected(reason) => Some(TransportEvent::Disconnected(format!(
                "broker sent disconnect: {reason}"
            ))),
            EventRoute::SubscriptionConfirmed { packet_id, rejected } => {
                if rejected.is_empty() {
                    debug!(packet_id, "Subscription confirmed");
                } else {
                    warn!(packet_id, ?rejected, "Subscription rejected by broker");
                }
                None
            }
            EventRoute::InfrastructureEvent(_) | EventRoute::OutgoingEvent => None,
        }
    }

    /// Event for an event-loop error. Before ConnAck it is a failed session
    /// attempt, afterwards a lost session.
    pub fn connection_error_event(error: &str, established: bool) -> TransportEvent {
        if established {
            TransportEvent::Disconnected(error.to_string())
        } else {
            TransportEvent::SessionFailed(error.to_string())
        }
    }

    pub fn qos_for(tier: DeliveryTier) -> QoS {
        match tier {
            DeliveryTier::AtMostOnce => QoS::AtMostOnce,
            DeliveryTier::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck received; `accepted` is false when the broker refused
    ConnectionAcknowledged {
        accepted: bool,
        code: String,
        server_keep_alive: Option<u16>,
    },
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker sent an explicit disconnect
    Disconnected(String),
    /// SubAck with any rejected filters
    SubscriptionConfirmed {
        packet_id: u16,
        rejected: Vec<String>,
    },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
