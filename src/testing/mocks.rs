//! Mock implementations for testing
//!
//! Provides a scriptable [`MockTransport`] plus [`MockSensor`] and
//! [`MockActuator`]. Each mock is a cheap handle over shared state, so a test
//! can keep a clone for inspection after moving the original into the runtime.

use crate::hardware::{ActuatorError, ActuatorSink, SensorError, SensorSource};
use crate::protocol::{ActuatorKind, ActuatorState, SensorKind};
use crate::transport::{DeliveryTier, SessionRequest, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One publish seen by the mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub tier: DeliveryTier,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Every call made on the mock transport, in order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    AssociateLink { succeeded: bool },
    BeginSession(SessionRequest),
    EndSession,
    Close,
    Publish(PublishedMessage),
    Subscribe { topic: String, tier: DeliveryTier },
}

/// How the mock broker answers a session attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SessionResponse {
    /// ConnAck success
    Accept,
    /// ConnAck success with the broker overriding keep-alive
    AcceptWithKeepAlive(Duration),
    /// Refused with this reason
    Refuse(String),
    /// Never answers; the attempt times out
    Silent,
}

#[derive(Debug)]
struct MockTransportState {
    calls: Vec<TransportCall>,
    link_up: bool,
    link_failures_remaining: usize,
    session_responses: VecDeque<SessionResponse>,
    default_response: SessionResponse,
    session_open: bool,
    pending: VecDeque<TransportEvent>,
    local_ip: Option<IpAddr>,
}

impl Default for MockTransportState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            link_up: true,
            link_failures_remaining: 0,
            session_responses: VecDeque::new(),
            default_response: SessionResponse::Accept,
            session_open: false,
            pending: VecDeque::new(),
            local_ip: None,
        }
    }
}

/// Mock transport for testing
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    /// Link up, every session accepted
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` link associations fail
    pub fn with_link_failures(self, count: usize) -> Self {
        lock(&self.state).link_failures_remaining = count;
        self
    }

    /// Queue answers for the next session attempts, in order
    pub fn with_session_responses(
        self,
        responses: impl IntoIterator<Item = SessionResponse>,
    ) -> Self {
        lock(&self.state).session_responses.extend(responses);
        self
    }

    /// Answer for attempts once the queued responses run out
    pub fn with_default_response(self, response: SessionResponse) -> Self {
        lock(&self.state).default_response = response;
        self
    }

    /// Address reported by `local_ip`
    pub fn with_local_ip(self, ip: IpAddr) -> Self {
        lock(&self.state).local_ip = Some(ip);
        self
    }

    pub fn set_link_up(&self, up: bool) {
        lock(&self.state).link_up = up;
    }

    pub fn set_link_failures(&self, count: usize) {
        lock(&self.state).link_failures_remaining = count;
    }

    /// Deliver an event on the next `next_events`/`take_events`
    pub fn push_event(&self, event: TransportEvent) {
        lock(&self.state).pending.push_back(event);
    }

    /// Deliver an inbound message
    pub fn push_message(&self, topic: &str, payload: &[u8]) {
        self.push_event(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    /// Drop the session from the broker side
    pub fn drop_session(&self, reason: &str) {
        let mut state = lock(&self.state);
        state.session_open = false;
        state
            .pending
            .push_back(TransportEvent::Disconnected(reason.to_string()));
    }

    /// Drain pending events without waiting
    pub fn take_events(&self) -> Vec<TransportEvent> {
        lock(&self.state).pending.drain(..).collect()
    }

    pub fn session_open(&self) -> bool {
        lock(&self.state).session_open
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.state).calls.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn link_attempts(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::AssociateLink { .. }))
    }

    pub fn session_attempts(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::BeginSession(_)))
    }

    pub fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    pub fn clear_history(&self) {
        lock(&self.state).calls.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn associate_link(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let succeeded = state.link_up && state.link_failures_remaining == 0;
        state.link_failures_remaining = state.link_failures_remaining.saturating_sub(1);
        state.calls.push(TransportCall::AssociateLink { succeeded });
        if succeeded {
            Ok(())
        } else {
            Err(TransportError::LinkDown("mock association failure".to_string()))
        }
    }

    fn link_up(&self) -> bool {
        lock(&self.state).link_up
    }

    fn local_ip(&self) -> Option<IpAddr> {
        lock(&self.state).local_ip
    }

    fn begin_session(&mut self, request: &SessionRequest) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.calls.push(TransportCall::BeginSession(request.clone()));
        state.session_open = true;

        let response = match state.session_responses.pop_front() {
            Some(response) => response,
            None => state.default_response.clone(),
        };
        match response {
            SessionResponse::Accept => state.pending.push_back(TransportEvent::SessionEstablished {
                server_keep_alive: None,
            }),
            SessionResponse::AcceptWithKeepAlive(keep_alive) => {
                state.pending.push_back(TransportEvent::SessionEstablished {
                    server_keep_alive: Some(keep_alive),
                })
            }
            SessionResponse::Refuse(reason) => {
                state.pending.push_back(TransportEvent::SessionFailed(reason))
            }
            SessionResponse::Silent => {}
        }
        Ok(())
    }

    fn end_session(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(TransportCall::EndSession);
        state.session_open = false;
    }

    async fn close(&mut self, _grace: Duration) {
        let mut state = lock(&self.state);
        state.calls.push(TransportCall::Close);
        state.session_open = false;
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        tier: DeliveryTier,
        retain: bool,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.session_open {
            return Err(TransportError::NotConnected);
        }
        state.calls.push(TransportCall::Publish(PublishedMessage {
            topic: topic.to_string(),
            payload,
            tier,
            retain,
        }));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, tier: DeliveryTier) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.session_open {
            return Err(TransportError::NotConnected);
        }
        state.calls.push(TransportCall::Subscribe {
            topic: topic.to_string(),
            tier,
        });
        Ok(())
    }

    async fn next_events(&mut self, budget: Duration) -> Vec<TransportEvent> {
        let events = self.take_events();
        if events.is_empty() {
            tokio::time::sleep(budget).await;
        }
        events
    }
}

/// Scripted sensor readings
#[derive(Debug, Clone, Default)]
pub struct MockSensor {
    readings: Arc<Mutex<HashMap<SensorKind, Result<f64, String>>>>,
    reads: Arc<Mutex<Vec<SensorKind>>>,
}

impl MockSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sensor returns a plausible value
    pub fn healthy() -> Self {
        let sensor = Self::new();
        sensor.set_value(SensorKind::Temperature, 25.5);
        sensor.set_value(SensorKind::Humidity, 60.0);
        sensor
    }

    pub fn set_value(&self, kind: SensorKind, value: f64) {
        lock(&self.readings).insert(kind, Ok(value));
    }

    pub fn set_failure(&self, kind: SensorKind, message: &str) {
        lock(&self.readings).insert(kind, Err(message.to_string()));
    }

    pub fn reads(&self) -> Vec<SensorKind> {
        lock(&self.reads).clone()
    }
}

impl SensorSource for MockSensor {
    fn read(&mut self, kind: SensorKind) -> Result<f64, SensorError> {
        lock(&self.reads).push(kind);
        match lock(&self.readings).get(&kind) {
            Some(Ok(value)) => Ok(*value),
            Some(Err(message)) => Err(SensorError::Io {
                path: format!("/mock/{}", kind.name()).into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, message.clone()),
            }),
            None => Err(SensorError::Unavailable(kind)),
        }
    }
}

/// Actuator recording every applied state
#[derive(Debug, Clone, Default)]
pub struct MockActuator {
    states: Arc<Mutex<HashMap<ActuatorKind, ActuatorState>>>,
    applied: Arc<Mutex<Vec<(ActuatorKind, ActuatorState)>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn current(&self, kind: ActuatorKind) -> Option<ActuatorState> {
        lock(&self.states).get(&kind).copied()
    }

    pub fn applied(&self) -> Vec<(ActuatorKind, ActuatorState)> {
        lock(&self.applied).clone()
    }
}

impl ActuatorSink for MockActuator {
    fn set_state(
        &mut self,
        kind: ActuatorKind,
        state: ActuatorState,
    ) -> Result<ActuatorState, ActuatorError> {
        if *lock(&self.fail) {
            return Err(ActuatorError::Unavailable(kind));
        }
        lock(&self.states).insert(kind, state);
        lock(&self.applied).push((kind, state));
        Ok(state)
    }

    fn state(&self, kind: ActuatorKind) -> Option<ActuatorState> {
        self.current(kind)
    }
}
