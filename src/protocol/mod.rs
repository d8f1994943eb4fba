//! Versioned message protocol.
//!
//! # Data Flow
//! ```text
//! Incoming JSON
//!     → message.rs parses the envelope (unknown type/version rejected)
//!     → negotiator.rs adapts it to the current version
//!     → manager handles the request
//!     → negotiator.rs adapts the answer back to the caller's version
//! ```
//!
//! # Design Decisions
//! - Message bodies are a closed enum; there is no untyped payload path
//! - Adapting never changes the payload, only the envelope

pub mod message;
pub mod negotiator;
pub mod version;

pub use message::{MessageBody, MessageMetadata, OrchestratorEvent, ProtocolMessage};
pub use negotiator::{ProtocolNegotiator, CURRENT_VERSION, SUPPORTED_VERSIONS};
pub use version::{parse_requirement, parse_version, Version, VersionReq};
