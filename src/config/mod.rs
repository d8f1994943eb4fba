//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → OrchestratorConfig (validated, immutable)
//!     → sections passed by value into each component's constructor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no process-wide config singleton
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ApiConfig, CacheConfig, CircuitBreakerConfig, EngineConfig, HealthCheckConfig,
    ObservabilityConfig, OrchestratorConfig, PoolConfig, QueueConfig, RequestConfig,
};
pub use validation::{validate_config, ValidationError};
