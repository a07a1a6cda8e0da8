use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod logging;

// ============================================================================
// Well-Known Property Keys
// ============================================================================

/// Correlation id linking related messages across destinations.
pub const PROPERTY_CORRELATION_ID: &str = "relay.correlation.id";
/// Number of messages in a correlated group.
pub const PROPERTY_CORRELATION_GROUP_SIZE: &str = "relay.correlation.group.size";
/// Position of this message within a correlated group.
pub const PROPERTY_CORRELATION_SEQUENCE: &str = "relay.correlation.sequence";
/// Serialized session marker propagated across hops.
pub const PROPERTY_SESSION: &str = "relay.session";
/// Address a destination should send asynchronous replies to.
pub const PROPERTY_REPLY_TO: &str = "relay.reply.to";
/// Name of the flow that requested an asynchronous reply.
pub const PROPERTY_REPLY_TO_REQUESTER: &str = "relay.reply.to.requester";
/// Per-event reply timeout in milliseconds, advisory to the destination.
pub const PROPERTY_EVENT_TIMEOUT: &str = "relay.event.timeout";

/// Properties copied from the inbound scope to every outbound dispatch so
/// receivers can correlate request/response and multicast replies.
pub const SESSION_PROPERTIES: &[&str] = &[
    PROPERTY_CORRELATION_ID,
    PROPERTY_CORRELATION_GROUP_SIZE,
    PROPERTY_CORRELATION_SEQUENCE,
    PROPERTY_SESSION,
];

// ============================================================================
// Message Envelope
// ============================================================================

/// The message envelope that flows through the router.
///
/// Carries the payload plus two property scopes: `inbound` is set by the
/// producer and read-only to the router, `outbound` is attached at dispatch
/// time. Well-known keys have typed accessors; reads consult the outbound
/// scope first, then inbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message_id: String,
    pub payload: Value,
    #[serde(default)]
    pub inbound: HashMap<String, Value>,
    #[serde(default)]
    pub outbound: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn new(payload: Value) -> Self {
        Self::with_inbound(payload, HashMap::new())
    }

    pub fn with_inbound(payload: Value, inbound: HashMap<String, Value>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            payload,
            inbound,
            outbound: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Derive the envelope for one outbound dispatch leg: same identity,
    /// payload and inbound scope, fresh outbound scope.
    pub fn for_dispatch(&self) -> Self {
        Self {
            message_id: self.message_id.clone(),
            payload: self.payload.clone(),
            inbound: self.inbound.clone(),
            outbound: HashMap::new(),
            created_at: self.created_at,
        }
    }

    /// Look up a property, outbound scope first, then inbound.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.outbound.get(key).or_else(|| self.inbound.get(key))
    }

    pub fn set_outbound_property(&mut self, key: impl Into<String>, value: Value) {
        self.outbound.insert(key.into(), value);
    }

    fn string_property(&self, key: &str) -> Option<String> {
        self.property(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn correlation_id(&self) -> Option<String> {
        self.string_property(PROPERTY_CORRELATION_ID)
    }

    pub fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.set_outbound_property(PROPERTY_CORRELATION_ID, Value::String(id.into()));
    }

    pub fn reply_to(&self) -> Option<String> {
        self.string_property(PROPERTY_REPLY_TO)
    }

    pub fn set_reply_to(&mut self, address: impl Into<String>) {
        self.set_outbound_property(PROPERTY_REPLY_TO, Value::String(address.into()));
    }

    /// Reply timeout requested by the message, in milliseconds. Negative
    /// values are returned as-is; callers decide whether to honour them.
    pub fn timeout_millis(&self) -> Option<i64> {
        self.property(PROPERTY_EVENT_TIMEOUT).and_then(Value::as_i64)
    }

    /// Render the payload for diagnostics. Fallible so callers can substitute
    /// a placeholder instead of letting preview failures reach dispatch.
    pub fn payload_preview(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}

/// Truncate `text` for log output, noting the original length when cut.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}... [{} chars total]", cut, text.chars().count())
}

// ============================================================================
// Flow Context & Session
// ============================================================================

/// Strategy for extracting message metadata, owned by the flow that created
/// the inbound event.
pub trait MessageInfoMapping: Send + Sync {
    /// Derive a correlation id for the given envelope. Must return the same
    /// id when invoked repeatedly for the same envelope.
    fn correlation_id(&self, envelope: &MessageEnvelope) -> String;
}

/// Default mapping: the envelope's own message id, so every dispatch leg of
/// one inbound message derives an identical correlation id.
#[derive(Debug, Default)]
pub struct MessageIdInfoMapping;

impl MessageInfoMapping for MessageIdInfoMapping {
    fn correlation_id(&self, envelope: &MessageEnvelope) -> String {
        envelope.message_id.clone()
    }
}

/// Context of the flow that owns a router: its name and the metadata
/// extraction strategy used when deriving correlation ids.
pub struct FlowContext {
    name: String,
    info_mapping: Arc<dyn MessageInfoMapping>,
}

impl FlowContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_info_mapping(name, Arc::new(MessageIdInfoMapping))
    }

    pub fn with_info_mapping(
        name: impl Into<String>,
        info_mapping: Arc<dyn MessageInfoMapping>,
    ) -> Self {
        Self {
            name: name.into(),
            info_mapping,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_mapping(&self) -> &dyn MessageInfoMapping {
        self.info_mapping.as_ref()
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext").field("name", &self.name).finish()
    }
}

/// The session an inbound event originated in. Shared by reference across
/// every dispatch leg derived from that event.
#[derive(Debug)]
pub struct Session {
    id: String,
    flow: Arc<FlowContext>,
}

impl Session {
    pub fn new(flow: Arc<FlowContext>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flow(&self) -> &Arc<FlowContext> {
        &self.flow
    }
}

// ============================================================================
// Endpoint Address
// ============================================================================

/// Identifying address of a network-style destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

// ============================================================================
// Message Event
// ============================================================================

/// Whether a dispatch waits for an in-band reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageExchange {
    RequestResponse,
    OneWay,
}

/// A message envelope bound to its runtime context: originating session,
/// optional destination address, exchange mode, reply timeout and the
/// processing timer started when the inbound message arrived.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    envelope: MessageEnvelope,
    session: Arc<Session>,
    address: Option<EndpointAddress>,
    exchange: MessageExchange,
    timeout: Option<Duration>,
    started_at: Instant,
}

impl MessageEvent {
    pub fn new(envelope: MessageEnvelope, session: Arc<Session>, exchange: MessageExchange) -> Self {
        Self {
            envelope,
            session,
            address: None,
            exchange,
            timeout: None,
            started_at: Instant::now(),
        }
    }

    /// Derive the event for one outbound dispatch leg: the dispatch envelope
    /// bound to the destination's address, same session and processing timer.
    pub fn for_dispatch(
        &self,
        envelope: MessageEnvelope,
        address: Option<EndpointAddress>,
    ) -> Self {
        Self {
            envelope,
            session: Arc::clone(&self.session),
            address: address.or_else(|| self.address.clone()),
            exchange: self.exchange,
            timeout: None,
            started_at: self.started_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.envelope.message_id
    }

    pub fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut MessageEnvelope {
        &mut self.envelope
    }

    pub fn into_envelope(self) -> MessageEnvelope {
        self.envelope
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn address(&self) -> Option<&EndpointAddress> {
        self.address.as_ref()
    }

    pub fn exchange(&self) -> MessageExchange {
        self.exchange
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

// ============================================================================
// Correlation Mode
// ============================================================================

/// Whether the router stamps outgoing messages with a correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationMode {
    /// Always derive a fresh id, overwriting any existing one.
    Always,
    /// Leave correlation untouched.
    Never,
    /// Derive an id only when the message does not already carry one.
    #[default]
    IfNotSet,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("value for correlation mode not recognised: {0}")]
pub struct InvalidCorrelationMode(pub String);

impl FromStr for CorrelationMode {
    type Err = InvalidCorrelationMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ALWAYS" => Ok(Self::Always),
            "NEVER" => Ok(Self::Never),
            "IF_NOT_SET" => Ok(Self::IfNotSet),
            other => Err(InvalidCorrelationMode(other.to_string())),
        }
    }
}

impl fmt::Display for CorrelationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("ALWAYS"),
            Self::Never => f.write_str("NEVER"),
            Self::IfNotSet => f.write_str("IF_NOT_SET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_reads_prefer_outbound_scope() {
        let mut inbound = HashMap::new();
        inbound.insert(PROPERTY_CORRELATION_ID.to_string(), json!("from-producer"));
        let mut envelope = MessageEnvelope::with_inbound(json!({"k": 1}), inbound);

        assert_eq!(envelope.correlation_id().as_deref(), Some("from-producer"));

        envelope.set_correlation_id("from-router");
        assert_eq!(envelope.correlation_id().as_deref(), Some("from-router"));
    }

    #[test]
    fn dispatch_envelope_keeps_identity_and_drops_outbound_scope() {
        let mut envelope = MessageEnvelope::new(json!("payload"));
        envelope.set_outbound_property("x", json!(1));

        let derived = envelope.for_dispatch();
        assert_eq!(derived.message_id, envelope.message_id);
        assert_eq!(derived.payload, envelope.payload);
        assert!(derived.outbound.is_empty());
    }

    #[test]
    fn timeout_property_parses_negative_values() {
        let mut envelope = MessageEnvelope::new(Value::Null);
        assert_eq!(envelope.timeout_millis(), None);

        envelope.set_outbound_property(PROPERTY_EVENT_TIMEOUT, json!(-1));
        assert_eq!(envelope.timeout_millis(), Some(-1));
    }

    #[test]
    fn correlation_mode_parses_known_values_only() {
        assert_eq!("ALWAYS".parse::<CorrelationMode>(), Ok(CorrelationMode::Always));
        assert_eq!("NEVER".parse::<CorrelationMode>(), Ok(CorrelationMode::Never));
        assert_eq!("IF_NOT_SET".parse::<CorrelationMode>(), Ok(CorrelationMode::IfNotSet));
        assert!("if_not_set".parse::<CorrelationMode>().is_err());
        assert!("SOMETIMES".parse::<CorrelationMode>().is_err());
    }

    #[test]
    fn truncation_marks_cut_payloads() {
        assert_eq!(truncate_for_log("short", 100), "short");

        let long = "a".repeat(150);
        let cut = truncate_for_log(&long, 100);
        assert!(cut.starts_with(&"a".repeat(100)));
        assert!(cut.ends_with("[150 chars total]"));
    }

    #[test]
    fn default_info_mapping_is_stable_per_envelope() {
        let envelope = MessageEnvelope::new(json!({}));
        let mapping = MessageIdInfoMapping;
        assert_eq!(
            mapping.correlation_id(&envelope),
            mapping.correlation_id(&envelope)
        );
        assert_eq!(mapping.correlation_id(&envelope), envelope.message_id);
    }
}
