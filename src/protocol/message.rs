//! Protocol envelope.
//!
//! Wire shape (camelCase JSON):
//!
//! ```text
//! {
//!   "version": "2.0.0",
//!   "messageId": "<uuid>",
//!   "timestamp": "<rfc3339>",
//!   "type": "request" | "response" | "event" | "error",
//!   "payload": { ... },
//!   "metadata": { "correlationId", "retryCount", "priority" }   // optional
//! }
//! ```
//!
//! Messages are immutable; adapting or answering one builds a new message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorInfo, OrchestratorError, OrchestratorResult};
use crate::pool::ScalingDecision;
use crate::protocol::negotiator::{is_supported, CURRENT_VERSION};
use crate::protocol::version::{parse_version, Version};
use crate::request::{Priority, SynthesisRequest, SynthesisResult};
use crate::resilience::BreakerState;
use crate::worker::{WorkerId, WorkerState};

/// Notifications published on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    WorkerState {
        #[serde(rename = "workerId")]
        worker_id: WorkerId,
        from: WorkerState,
        to: WorkerState,
    },
    Breaker {
        #[serde(rename = "workerId")]
        worker_id: WorkerId,
        from: BreakerState,
        to: BreakerState,
    },
    Scaling {
        decision: ScalingDecision,
        #[serde(rename = "poolSize")]
        pool_size: usize,
    },
}

/// Typed body of a message. The variant decides the wire `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Request(SynthesisRequest),
    Response(SynthesisResult),
    Event(OrchestratorEvent),
    Error(ErrorInfo),
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Request(_) => "request",
            MessageBody::Response(_) => "response",
            MessageBody::Event(_) => "event",
            MessageBody::Error(_) => "error",
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            MessageBody::Request(r) => serde_json::to_value(r),
            MessageBody::Response(r) => serde_json::to_value(r),
            MessageBody::Event(e) => serde_json::to_value(e),
            MessageBody::Error(e) => serde_json::to_value(e),
        }
    }

    fn from_wire(kind: &str, payload: Value) -> OrchestratorResult<Self> {
        let bad = |e: serde_json::Error| {
            OrchestratorError::InvalidRequest(format!("invalid {} payload: {}", kind, e))
        };
        match kind {
            "request" => serde_json::from_value(payload).map(MessageBody::Request).map_err(bad),
            "response" => serde_json::from_value(payload).map(MessageBody::Response).map_err(bad),
            "event" => serde_json::from_value(payload).map(MessageBody::Event).map_err(bad),
            "error" => serde_json::from_value(payload).map(MessageBody::Error).map_err(bad),
            other => Err(OrchestratorError::InvalidRequest(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }
}

/// Optional envelope metadata. Which fields survive depends on the version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none() && self.retry_count.is_none() && self.priority.is_none()
    }
}

/// Raw envelope as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    version: String,
    message_id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<MessageMetadata>,
}

/// A versioned protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    version: Version,
    message_id: Uuid,
    timestamp: DateTime<Utc>,
    body: MessageBody,
    metadata: Option<MessageMetadata>,
}

impl ProtocolMessage {
    /// New message at the current protocol version.
    pub fn new(body: MessageBody) -> Self {
        Self {
            version: CURRENT_VERSION,
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            body,
            metadata: None,
        }
    }

    pub fn request(request: SynthesisRequest) -> Self {
        Self::new(MessageBody::Request(request))
    }

    pub fn response(result: SynthesisResult) -> Self {
        Self::new(MessageBody::Response(result))
    }

    pub fn event(event: OrchestratorEvent) -> Self {
        Self::new(MessageBody::Event(event))
    }

    pub fn error(err: &OrchestratorError) -> Self {
        Self::new(MessageBody::Error(err.to_info()))
    }

    /// Same message tagged with another version. Used by the negotiator.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn into_body(self) -> MessageBody {
        self.body
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    pub fn metadata(&self) -> Option<&MessageMetadata> {
        self.metadata.as_ref()
    }

    /// Parse an envelope, rejecting unknown versions, unknown types and
    /// missing payloads.
    pub fn from_value(value: Value) -> OrchestratorResult<Self> {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| OrchestratorError::InvalidRequest(format!("malformed envelope: {}", e)))?;

        let version = parse_version(&envelope.version)?;
        if !is_supported(&version) {
            return Err(OrchestratorError::UnsupportedProtocolVersion(version.to_string()));
        }
        let payload = envelope.payload.ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("{} message has no payload", envelope.kind))
        })?;
        let body = MessageBody::from_wire(&envelope.kind, payload)?;

        Ok(Self {
            version,
            message_id: envelope.message_id,
            timestamp: envelope.timestamp,
            body,
            metadata: envelope.metadata.filter(|m| !m.is_empty()),
        })
    }

    pub fn from_json(json: &str) -> OrchestratorResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| OrchestratorError::InvalidRequest(format!("malformed JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl Serialize for ProtocolMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.body.payload().map_err(serde::ser::Error::custom)?;
        Envelope {
            version: self.version.to_string(),
            message_id: self.message_id,
            timestamp: self.timestamp,
            kind: self.body.kind().to_string(),
            payload: Some(payload),
            metadata: self.metadata.clone(),
        }
        .serialize(serializer)
    }
}
