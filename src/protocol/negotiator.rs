//! Version negotiation and message adaptation.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::protocol::message::{MessageMetadata, ProtocolMessage};
use crate::protocol::version::{parse_requirement, Version};

/// Versions this orchestrator speaks, oldest first.
pub static SUPPORTED_VERSIONS: [Version; 3] = [
    Version::new(1, 0, 0),
    Version::new(1, 1, 0),
    Version::new(2, 0, 0),
];

/// Version used internally and for messages the orchestrator originates.
pub const CURRENT_VERSION: Version = Version::new(2, 0, 0);

pub fn is_supported(version: &Version) -> bool {
    SUPPORTED_VERSIONS.contains(version)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolNegotiator;

impl ProtocolNegotiator {
    pub fn new() -> Self {
        Self
    }

    pub fn supported(&self) -> &'static [Version] {
        &SUPPORTED_VERSIONS
    }

    /// Newest supported version satisfying `requirement`.
    pub fn negotiate(&self, requirement: &str) -> OrchestratorResult<Version> {
        let req = parse_requirement(requirement)?;
        SUPPORTED_VERSIONS
            .iter()
            .rev()
            .find(|v| req.matches(v))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::UnsupportedProtocolVersion(format!(
                    "no supported version matches '{}' (supported: {})",
                    requirement.trim(),
                    SUPPORTED_VERSIONS
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Re-tag `message` for `target`, keeping only the envelope metadata that
    /// version defines. The payload is never touched.
    pub fn adapt(&self, message: &ProtocolMessage, target: Version) -> OrchestratorResult<ProtocolMessage> {
        if !is_supported(&target) {
            return Err(OrchestratorError::UnsupportedProtocolVersion(target.to_string()));
        }
        let metadata = message
            .metadata()
            .map(|m| metadata_for(m, &target))
            .unwrap_or_default();

        if message.version() != &target {
            tracing::trace!(
                message_id = %message.message_id(),
                from = %message.version(),
                to = %target,
                "Adapting message"
            );
        }
        Ok(message
            .clone()
            .with_version(target)
            .with_metadata(metadata))
    }
}

/// 1.0 has no metadata block, 1.1 added correlation ids, 2.0 added retry
/// count and priority.
fn metadata_for(metadata: &MessageMetadata, target: &Version) -> MessageMetadata {
    match (target.major, target.minor) {
        (1, 0) => MessageMetadata::default(),
        (1, _) => MessageMetadata {
            correlation_id: metadata.correlation_id.clone(),
            ..Default::default()
        },
        _ => metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Priority, SynthesisRequest};

    fn full_metadata() -> MessageMetadata {
        MessageMetadata {
            correlation_id: Some("req-1".into()),
            retry_count: Some(1),
            priority: Some(Priority::High),
        }
    }

    #[test]
    fn test_negotiate_picks_newest_match() {
        let n = ProtocolNegotiator::new();
        assert_eq!(n.negotiate("*").unwrap(), Version::new(2, 0, 0));
        assert_eq!(n.negotiate("1.x").unwrap(), Version::new(1, 1, 0));
        assert_eq!(n.negotiate("^1.0").unwrap(), Version::new(1, 1, 0));
        assert_eq!(n.negotiate("~1.0.0").unwrap(), Version::new(1, 0, 0));
        assert_eq!(n.negotiate(">=1.0.0, <2.0.0").unwrap(), Version::new(1, 1, 0));
        assert_eq!(n.negotiate("=2.0.0").unwrap(), Version::new(2, 0, 0));
    }

    #[test]
    fn test_negotiate_no_match() {
        let n = ProtocolNegotiator::new();
        let err = n.negotiate("3.x").unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_PROTOCOL_VERSION");
        assert!(n.negotiate("not-a-version").is_err());
    }

    #[test]
    fn test_adapt_down_drops_unknown_metadata() {
        let n = ProtocolNegotiator::new();
        let msg = ProtocolMessage::request(SynthesisRequest::new("hi")).with_metadata(full_metadata());

        let v11 = n.adapt(&msg, Version::new(1, 1, 0)).unwrap();
        assert_eq!(v11.version(), &Version::new(1, 1, 0));
        let meta = v11.metadata().unwrap();
        assert_eq!(meta.correlation_id.as_deref(), Some("req-1"));
        assert!(meta.retry_count.is_none());
        assert!(meta.priority.is_none());

        let v10 = n.adapt(&msg, Version::new(1, 0, 0)).unwrap();
        assert!(v10.metadata().is_none());
        assert_eq!(v10.body(), msg.body());
        assert_eq!(v10.message_id(), msg.message_id());
    }

    #[test]
    fn test_adapt_up_never_fabricates() {
        let n = ProtocolNegotiator::new();
        let old = ProtocolMessage::request(SynthesisRequest::new("hi")).with_version(Version::new(1, 0, 0));
        let up = n.adapt(&old, CURRENT_VERSION).unwrap();
        assert_eq!(up.version(), &CURRENT_VERSION);
        assert!(up.metadata().is_none());
    }

    #[test]
    fn test_adapt_rejects_unknown_target() {
        let n = ProtocolNegotiator::new();
        let msg = ProtocolMessage::request(SynthesisRequest::new("hi"));
        assert!(n.adapt(&msg, Version::new(1, 2, 0)).is_err());
    }
}
