//! Synthesis request and result types, plus admission validation.
//!
//! # Validation rules
//! - Text: non-blank, at most `max_text_length` characters; control
//!   characters other than newline and tab are stripped
//! - Voice / model tag: `[A-Za-z0-9_-]`, at most 50 characters
//! - Speed and pitch: within `[0.25, 4.0]`
//! - Output format: one of wav, mp3, ogg, flac, m4a
//! - Output target: no `..` components, no reserved filename characters,
//!   allowed extension if one is given, bounded length
//! - Metadata: serialized size at most `max_metadata_bytes`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Component, Path};

use crate::config::RequestConfig;
use crate::error::{ErrorInfo, OrchestratorError, OrchestratorResult};

pub const ALLOWED_FORMATS: &[&str] = &["wav", "mp3", "ogg", "flac", "m4a"];
const MAX_MODEL_TAG_LEN: usize = 50;
const MAX_PATH_LEN: usize = 4096;
const MAX_FILENAME_LEN: usize = 255;
const RATE_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;

/// Request priority. Ordered low < normal < high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(OrchestratorError::InvalidRequest(format!("unknown priority '{}'", other))),
        }
    }
}

/// A synthesis request as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_target: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            speed: None,
            pitch: None,
            output_format: None,
            output_target: None,
            priority: Priority::Normal,
            metadata: Map::new(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_output_target(mut self, target: impl Into<String>) -> Self {
        self.output_target = Some(target.into());
        self
    }
}

/// Provenance attached to every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub model_used: Option<String>,
    pub worker_used: Option<u64>,
    pub cache_hit: bool,
}

/// Outcome of a synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisResult {
    pub success: bool,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl SynthesisResult {
    pub fn failure(request_id: impl Into<String>, err: &OrchestratorError, latency_ms: u64) -> Self {
        Self {
            success: false,
            request_id: request_id.into(),
            output_target: None,
            duration_ms: None,
            latency_ms,
            error: Some(err.to_info()),
            metadata: ResultMetadata::default(),
        }
    }
}

/// Checks and normalizes requests before admission.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    max_text_length: usize,
    max_metadata_bytes: usize,
}

impl RequestValidator {
    pub fn new(config: &RequestConfig) -> Self {
        Self {
            max_text_length: config.max_text_length,
            max_metadata_bytes: config.max_metadata_bytes,
        }
    }

    /// Validate `request`, returning a copy with sanitized text.
    pub fn validate(&self, request: &SynthesisRequest) -> OrchestratorResult<SynthesisRequest> {
        let mut clean = request.clone();
        clean.text = self.validate_text(&request.text)?;

        if let Some(voice) = &request.voice {
            validate_model_tag(voice)?;
        }
        for (name, value) in [("speed", request.speed), ("pitch", request.pitch)] {
            if let Some(v) = value {
                if !v.is_finite() || !RATE_RANGE.contains(&v) {
                    return Err(invalid(format!(
                        "{} must be between {} and {}, got {}",
                        name,
                        RATE_RANGE.start(),
                        RATE_RANGE.end(),
                        v
                    )));
                }
            }
        }
        if let Some(format) = &request.output_format {
            let lower = format.to_ascii_lowercase();
            if !ALLOWED_FORMATS.contains(&lower.as_str()) {
                return Err(invalid(format!("unsupported output format '{}'", format)));
            }
            clean.output_format = Some(lower);
        }
        if let Some(target) = &request.output_target {
            validate_output_target(target)?;
        }
        if !request.metadata.is_empty() {
            let size = serde_json::to_vec(&request.metadata)
                .map(|v| v.len())
                .map_err(|e| invalid(format!("metadata not serializable: {}", e)))?;
            if size > self.max_metadata_bytes {
                return Err(invalid(format!(
                    "metadata too large: {} bytes > {} limit",
                    size, self.max_metadata_bytes
                )));
            }
        }
        Ok(clean)
    }

    fn validate_text(&self, text: &str) -> OrchestratorResult<String> {
        let chars = text.chars().count();
        if chars > self.max_text_length {
            return Err(invalid(format!(
                "text too long: {} characters > {} limit",
                chars, self.max_text_length
            )));
        }
        let sanitized: String = text
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect();
        if sanitized.trim().is_empty() {
            return Err(invalid("empty text input not allowed"));
        }
        if sanitized.len() != text.len() {
            tracing::debug!("Removed control characters from request text");
        }
        Ok(sanitized)
    }
}

/// Model tags are restricted to `[A-Za-z0-9_-]{1,50}`.
pub fn validate_model_tag(tag: &str) -> OrchestratorResult<()> {
    if tag.is_empty() || tag.len() > MAX_MODEL_TAG_LEN {
        return Err(invalid(format!(
            "model tag must be 1-{} characters",
            MAX_MODEL_TAG_LEN
        )));
    }
    if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid(format!("invalid characters in model tag '{}'", tag)));
    }
    Ok(())
}

fn validate_output_target(target: &str) -> OrchestratorResult<()> {
    if target.is_empty() || target.len() > MAX_PATH_LEN {
        return Err(invalid("output target length out of range"));
    }
    let path = Path::new(target);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(invalid(format!("path traversal in output target '{}'", target)));
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid(format!("output target '{}' has no file name", target)))?;
    if file_name.len() > MAX_FILENAME_LEN {
        return Err(invalid("output file name too long"));
    }
    if file_name
        .chars()
        .any(|c| matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') || c.is_control())
    {
        return Err(invalid(format!("invalid characters in file name '{}'", file_name)));
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if !ALLOWED_FORMATS.contains(&ext.to_ascii_lowercase().as_str()) {
            return Err(invalid(format!("file extension not allowed: .{}", ext)));
        }
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidRequest(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> RequestValidator {
        RequestValidator::new(&RequestConfig::default())
    }

    #[test]
    fn test_accepts_plain_request() {
        let req = SynthesisRequest::new("Hello world")
            .with_voice("en_US-lessac")
            .with_output_target("/tmp/out/hello.wav");
        let clean = validator().validate(&req).unwrap();
        assert_eq!(clean.text, "Hello world");
    }

    #[test]
    fn test_rejects_empty_and_oversized_text() {
        let v = validator();
        assert!(v.validate(&SynthesisRequest::new("   \n")).is_err());
        let long = "a".repeat(10_001);
        let err = v.validate(&SynthesisRequest::new(long)).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(v.validate(&SynthesisRequest::new("a".repeat(10_000))).is_ok());
    }

    #[test]
    fn test_strips_control_characters() {
        let clean = validator()
            .validate(&SynthesisRequest::new("line one\n\tline\u{0007} two\u{0000}"))
            .unwrap();
        assert_eq!(clean.text, "line one\n\tline two");
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let v = validator();
        let mut req = SynthesisRequest::new("hi");
        req.speed = Some(9.0);
        assert!(v.validate(&req).is_err());

        let mut req = SynthesisRequest::new("hi");
        req.output_format = Some("exe".into());
        assert!(v.validate(&req).is_err());

        let req = SynthesisRequest::new("hi").with_voice("../etc");
        assert!(v.validate(&req).is_err());
    }

    #[test]
    fn test_rejects_unsafe_output_targets() {
        let v = validator();
        for target in ["../secret.wav", "out/../../x.wav", "/tmp/a.sh", "/tmp/bad|name.wav"] {
            let req = SynthesisRequest::new("hi").with_output_target(target);
            assert!(v.validate(&req).is_err(), "{} should be rejected", target);
        }
    }

    #[test]
    fn test_metadata_size_limit() {
        let config = RequestConfig {
            max_metadata_bytes: 32,
            ..Default::default()
        };
        let v = RequestValidator::new(&config);
        let mut req = SynthesisRequest::new("hi");
        req.metadata.insert("note".into(), Value::String("x".repeat(64)));
        assert!(v.validate(&req).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = r#"{"text":"hi","voice":"en","outputTarget":"/tmp/a.wav","priority":"high"}"#;
        let req: SynthesisRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.output_target.as_deref(), Some("/tmp/a.wav"));

        let req: SynthesisRequest = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(req.priority, Priority::Normal);
        assert!(Priority::High > Priority::Normal && Priority::Normal > Priority::Low);
    }
}
