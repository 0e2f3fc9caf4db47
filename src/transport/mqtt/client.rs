//! Impure I/O for the MQTT transport
//!
//! Each session owns a fresh rumqttc `AsyncClient`/`EventLoop` pair. The event
//! loop runs as a spawned task that only forwards routed events over a channel
//! and exits on the first connection error, so rumqttc never reconnects on its
//! own: retry timing belongs to the connection manager.

use super::connection::{configure_mqtt_options, BrokerEndpoint, LinkProbe};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::{ConfigError, DeviceConfig, MqttSection};
use crate::mqtt_span;
use crate::transport::{DeliveryTier, SessionRequest, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct ActiveSession {
    id: u64,
    client: AsyncClient,
    events: mpsc::Receiver<TransportEvent>,
    event_loop_handle: JoinHandle<()>,
}

/// MQTT implementation of [`Transport`]
pub struct MqttTransport {
    config: MqttSection,
    credentials: Option<(String, String)>,
    link: LinkProbe,
    session: Option<ActiveSession>,
    sessions_started: u64,
}

impl MqttTransport {
    /// Build from device configuration. Credentials are resolved here so a
    /// missing environment variable fails at startup rather than per attempt.
    pub fn new(config: &DeviceConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_link_probe(
            config.mqtt.clone(),
            config.mqtt_credentials()?,
            LinkProbe::new(config.link.interface.clone()),
        ))
    }

    pub fn with_link_probe(
        config: MqttSection,
        credentials: Option<(String, String)>,
        link: LinkProbe,
    ) -> Self {
        Self {
            config,
            credentials,
            link,
            session: None,
            sessions_started: 0,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn active_client(&self) -> Result<&AsyncClient, TransportError> {
        self.session
            .as_ref()
            .map(|session| &session.client)
            .ok_or(TransportError::NotConnected)
    }

    /// Drive one session's event loop until the first error, forwarding events.
    async fn drive_event_loop(
        session_id: u64,
        mut event_loop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
    ) {
        debug!(session_id, "MQTT event loop started");
        let mut established = false;

        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    let terminal = matches!(
                        route,
                        EventRoute::Disconnected(_)
                            | EventRoute::ConnectionAcknowledged {
                                accepted: false,
                                ..
                            }
                    );
                    if matches!(
                        route,
                        EventRoute::ConnectionAcknowledged { accepted: true, .. }
                    ) {
                        established = true;
                    }

                    if let Some(transport_event) = MessageHandler::to_transport_event(route) {
                        if events.send(transport_event).await.is_err() {
                            break;
                        }
                    }
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    if established {
                        warn!(session_id, error = %reason, "MQTT session lost");
                    } else {
                        warn!(session_id, error = %reason, "MQTT session attempt failed");
                    }
                    let _ = events
                        .send(MessageHandler::connection_error_event(&reason, established))
                        .await;
                    break;
                }
            }
        }

        debug!(session_id, "MQTT event loop stopped");
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn associate_link(&mut self) -> Result<(), TransportError> {
        self.link.check()
    }

    fn link_up(&self) -> bool {
        self.link.is_up()
    }

    fn local_ip(&self) -> Option<IpAddr> {
        BrokerEndpoint::parse(&self.config.broker_url).ok()?.local_ip()
    }

    fn begin_session(&mut self, request: &SessionRequest) -> Result<(), TransportError> {
        self.end_session();

        let mqtt_options = configure_mqtt_options(request, &self.config, self.credentials.clone())?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        self.sessions_started += 1;
        let session_id = self.sessions_started;
        let span = mqtt_span!(
            operation = "session",
            session_id,
            client_id = %request.client_id
        );
        let event_loop_handle = tokio::spawn(
            Self::drive_event_loop(session_id, event_loop, events_tx).instrument(span),
        );

        info!(
            session_id,
            broker = %self.config.broker_url,
            client_id = %request.client_id,
            keep_alive_secs = request.keep_alive.as_secs(),
            "Opening MQTT session"
        );

        self.session = Some(ActiveSession {
            id: session_id,
            client,
            events: events_rx,
            event_loop_handle,
        });
        Ok(())
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(session_id = session.id, "Dropping MQTT session");
            session.event_loop_handle.abort();
        }
    }

    async fn close(&mut self, grace: Duration) {
        let Some(session) = self.session.take() else {
            return;
        };

        let ActiveSession {
            id: session_id,
            client,
            mut events,
            event_loop_handle: mut handle,
        } = session;

        if let Err(e) = client.try_disconnect() {
            warn!(session_id, error = %e, "Failed to queue MQTT disconnect");
        }

        // Keep the channel drained so the loop can flush the queued publishes
        // and the disconnect instead of failing on a closed receiver
        let flushed = tokio::time::timeout(grace, async {
            loop {
                tokio::select! {
                    joined = &mut handle => break joined,
                    event = events.recv() => match event {
                        Some(event) => debug!(session_id, ?event, "Discarding event during close"),
                        None => break (&mut handle).await,
                    },
                }
            }
        })
        .instrument(mqtt_span!(operation = "close", session_id))
        .await;

        match flushed {
            Ok(Ok(())) => info!(session_id, "MQTT session closed"),
            Ok(Err(e)) if !e.is_cancelled() => {
                error!(session_id, error = %e, "MQTT event loop task failed")
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(session_id, "MQTT event loop didn't stop within grace period");
                handle.abort();
            }
        }
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        tier: DeliveryTier,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.active_client()?
            .try_publish(topic, MessageHandler::qos_for(tier), retain, payload)
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn subscribe(&mut self, topic: &str, tier: DeliveryTier) -> Result<(), TransportError> {
        self.active_client()?
            .try_subscribe(topic, MessageHandler::qos_for(tier))
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn next_events(&mut self, budget: Duration) -> Vec<TransportEvent> {
        let Some(session) = self.session.as_mut() else {
            tokio::time::sleep(budget).await;
            return Vec::new();
        };

        let mut events = Vec::new();
        match tokio::time::timeout(budget, session.events.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {
                // Event loop already exited and its final event was consumed
                tokio::time::sleep(budget).await;
                return events;
            }
            Err(_) => return events,
        }

        while let Ok(event) = session.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WillMessage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn unreachable_config() -> MqttSection {
        // Port 1 on loopback refuses connections immediately
        MqttSection {
            broker_url: "mqtt://127.0.0.1:1".to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 10,
        }
    }

    fn request() -> SessionRequest {
        SessionRequest {
            client_id: "test-device".to_string(),
            keep_alive: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(1),
            last_will: WillMessage {
                topic: "damiot/dispositivo/00:00:00:00:00:01/estado".to_string(),
                payload: b"OFFLINE".to_vec(),
                tier: DeliveryTier::AtLeastOnce,
                retain: true,
            },
        }
    }

    #[test]
    fn test_publish_without_session_fails() {
        let mut transport =
            MqttTransport::with_link_probe(unreachable_config(), None, LinkProbe::default());
        assert!(matches!(
            transport.publish("t", b"x".to_vec(), DeliveryTier::AtMostOnce, false),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.subscribe("t", DeliveryTier::AtLeastOnce),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_session_failed() {
        let mut transport =
            MqttTransport::with_link_probe(unreachable_config(), None, LinkProbe::default());
        transport.begin_session(&request()).unwrap();
        assert!(transport.has_session());

        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.extend(transport.next_events(Duration::from_millis(100)).await);
            if !seen.is_empty() {
                break;
            }
        }
        assert!(
            matches!(seen.first(), Some(TransportEvent::SessionFailed(_))),
            "expected SessionFailed, got {seen:?}"
        );

        transport.end_session();
        assert!(!transport.has_session());
    }

    #[tokio::test]
    async fn test_next_events_without_session_waits_budget() {
        let mut transport =
            MqttTransport::with_link_probe(unreachable_config(), None, LinkProbe::default());
        let started = tokio::time::Instant::now();
        let events = transport.next_events(Duration::from_millis(20)).await;
        assert!(events.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    /// Read one MQTT control packet, returning its type and body
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut length = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            length |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; length];
        stream.read_exact(&mut body).await?;
        Ok((header >> 4, body))
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let remaining = 2 + topic.len() + 1 + payload.len();
        let mut packet = vec![0x30, remaining as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.push(0); // no properties
        packet.extend_from_slice(payload);
        packet
    }

    #[tokio::test]
    async fn test_close_flushes_disconnect_while_inbound_traffic_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (connect, _) = read_packet(&mut stream).await.unwrap();
            assert_eq!(connect, 1, "expected CONNECT");
            // ConnAck success with server keep-alive = 6s
            stream
                .write_all(&[0x20, 0x06, 0x00, 0x00, 0x03, 0x13, 0x00, 0x06])
                .await
                .unwrap();
            // more inbound traffic than the event channel holds
            for _ in 0..(EVENT_CHANNEL_CAPACITY * 3) {
                stream
                    .write_all(&publish_packet("damiot/actuadores/x/led_azul", b"ON"))
                    .await
                    .unwrap();
            }

            let mut received = Vec::new();
            while let Ok((packet_type, body)) = read_packet(&mut stream).await {
                received.push((packet_type, body));
                if packet_type == 14 {
                    break;
                }
            }
            received
        });

        let config = MqttSection {
            broker_url: format!("mqtt://127.0.0.1:{port}"),
            username_env: None,
            password_env: None,
            keep_alive_secs: 10,
        };
        let mut transport = MqttTransport::with_link_probe(config, None, LinkProbe::default());
        transport.begin_session(&request()).unwrap();

        let mut established = None;
        for _ in 0..50 {
            let events = transport.next_events(Duration::from_millis(100)).await;
            established = events.into_iter().find_map(|event| match event {
                TransportEvent::SessionEstablished { server_keep_alive } => Some(server_keep_alive),
                _ => None,
            });
            if established.is_some() {
                break;
            }
        }
        assert_eq!(established, Some(Some(Duration::from_secs(6))));

        transport
            .publish(
                "damiot/dispositivo/00:00:00:00:00:01/estado",
                b"OFFLINE".to_vec(),
                DeliveryTier::AtLeastOnce,
                true,
            )
            .unwrap();
        transport.close(Duration::from_secs(5)).await;
        assert!(!transport.has_session());

        let received = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker saw the session end")
            .unwrap();
        let offline_sent = received.iter().any(|(packet_type, body)| {
            *packet_type == 3 && body.windows(7).any(|window| window == b"OFFLINE")
        });
        assert!(offline_sent, "offline status never reached the broker");
        assert_eq!(received.last().map(|(packet_type, _)| *packet_type), Some(14));
    }

    #[tokio::test]
    async fn test_close_without_session_is_noop() {
        let mut transport =
            MqttTransport::with_link_probe(unreachable_config(), None, LinkProbe::default());
        transport.close(Duration::from_millis(10)).await;
        assert!(!transport.has_session());
    }
}
