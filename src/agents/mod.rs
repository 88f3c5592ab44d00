/// Pattern detection agents, priority scoring, and the agent manager
pub mod agent;
pub mod error_agent;
pub mod manager;
pub mod performance_agent;
pub mod scoring;

pub use agent::{batch_confidence, DetectionHistory, PatternAgent};
pub use error_agent::ErrorAgent;
pub use manager::{AgentManager, BatchAnalysis};
pub use performance_agent::PerformanceAgent;
pub use scoring::PriorityScorer;
