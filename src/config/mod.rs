/// Configuration loading and validation
#[allow(clippy::module_inception)]
mod config;

pub use config::{
    AgentsConfig, AlertsConfig, BufferConfig, CategoryWeights, Config, ErrorAgentConfig,
    EscalationConfig, PerformanceAgentConfig, ProcessingConfig, RetentionConfig, ScoringConfig,
    ServerConfig, SeverityWeights, SignatureClass, SignatureDefinition, StoreConfig,
};
