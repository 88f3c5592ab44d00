/// Escalation planning and rate-limited operator alerts
pub mod alert_manager;
pub mod escalation;
pub mod rate_limiter;

pub use alert_manager::{Alert, AlertDispatcher, AlertSink, AlertStats, LogAlertSink};
pub use escalation::EscalationPlanner;
pub use rate_limiter::RateLimiter;
