/// Error types for every layer of the engine
pub mod error;

/// Log entries and service registrations
pub mod events;

/// Advisory data model
pub mod advice;

/// Configuration management
pub mod config;

/// Bounded ingestion buffer
pub mod buffer;

/// Pattern detection agents and priority scoring
pub mod agents;

/// Persistent advisory store
pub mod store;

/// Escalation planning and operator alerts
pub mod alerts;

/// Pipeline self-monitoring
pub mod monitoring;

/// Advisory engine coordinating ingestion, analysis and persistence
pub mod engine;

/// Background processing and retention threads
pub mod worker;

/// HTTP/JSON boundary
pub mod api;

// Re-export commonly used types
pub use advice::{Advice, AdviceStatus, Category, Severity};
pub use config::Config;
pub use engine::AdvisoryEngine;
pub use error::{AgentError, ConfigError, EngineError, StoreError, ValidationError};
pub use events::{LogEntry, LogLevel, ServiceInfo};
