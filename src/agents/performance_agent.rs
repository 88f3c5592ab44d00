//! Response-time and resource-usage detection

use crate::advice::{Advice, Category, Severity};
use crate::agents::agent::{batch_confidence, DetectionHistory, PatternAgent};
use crate::config::PerformanceAgentConfig;
use crate::error::AgentError;
use crate::events::{LogEntry, LogLevel};
use serde_json::json;
use std::collections::BTreeMap;

/// Matches at or above this count raise the advisory to HIGH
const HIGH_SEVERITY_MATCHES: usize = 20;

/// Agent running two independent detectors over each batch
///
/// - response time: entries whose context duration exceeds the threshold
/// - resource usage: WARN or error-class entries mentioning resource pressure
///
/// Each detector emits at most one advisory per batch.
pub struct PerformanceAgent {
    config: PerformanceAgentConfig,
    keywords: Vec<String>,
    history: DetectionHistory,
}

impl PerformanceAgent {
    pub const NAME: &'static str = "performance_agent";

    pub fn new(config: PerformanceAgentConfig) -> Self {
        let keywords = config
            .resource_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            config,
            keywords,
            history: DetectionHistory::default(),
        }
    }

    fn severity_for(matches: usize) -> Severity {
        if matches >= HIGH_SEVERITY_MATCHES {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    fn services_label(matches: &[&LogEntry]) -> (Vec<String>, String) {
        let mut services: Vec<String> = matches.iter().map(|e| e.service_name.clone()).collect();
        services.sort();
        services.dedup();
        let label = match services.as_slice() {
            [only] => only.clone(),
            many => format!("{} services", many.len()),
        };
        (services, label)
    }

    fn per_service_counts(matches: &[&LogEntry]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in matches {
            *counts.entry(entry.service_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn detect_slow_responses(&self, batch: &[LogEntry]) -> Option<Advice> {
        let threshold = self.config.response_time_threshold_ms;
        let slow: Vec<&LogEntry> = batch
            .iter()
            .filter(|e| e.context.duration_ms().is_some_and(|d| d > threshold))
            .collect();

        if slow.is_empty() {
            return None;
        }

        let durations: Vec<f64> = slow.iter().filter_map(|e| e.context.duration_ms()).collect();
        let max = durations.iter().copied().fold(f64::MIN, f64::max);
        let mean = durations.iter().sum::<f64>() / durations.len() as f64;

        let (services, label) = Self::services_label(&slow);
        let mut fingerprint = vec![Self::NAME, "response_time"];
        fingerprint.extend(services.iter().map(String::as_str));

        let mut advice = Advice::new(
            &fingerprint,
            format!("Slow responses in {}", label),
            Self::severity_for(slow.len()),
            Category::Performance,
        )
        .with_evidence(slow.iter().copied(), self.config.evidence_limit);

        let raw = batch_confidence(slow.len(), batch.len());
        let confidence = self.history.calibrate(&advice.advice_id, raw);
        advice = advice.with_confidence(confidence);

        advice.root_cause_analysis = format!(
            "{} requests took longer than {:.0}ms (mean {:.0}ms, max {:.0}ms). Typical causes are slow downstream calls, lock contention, or an undersized instance.",
            slow.len(),
            threshold,
            mean,
            max
        );
        advice.resolution_steps = vec![
            "Identify the slowest endpoints from the evidence request ids".to_string(),
            "Profile downstream calls and database queries on those endpoints".to_string(),
            "Scale out the service if latency tracks request volume".to_string(),
        ];
        advice.prevention_measures =
            "Set latency budgets per endpoint and load-test before releases.".to_string();
        advice.monitoring_recommendations = vec![
            format!("Alert on p95 latency above {:.0}ms", threshold),
            "Trace slow requests end to end".to_string(),
        ];

        Some(
            advice
                .with_impact("detector", json!("response_time"))
                .with_impact("slow_requests", json!(slow.len()))
                .with_impact("threshold_ms", json!(threshold))
                .with_impact("max_duration_ms", json!(max))
                .with_impact("mean_duration_ms", json!(mean))
                .with_impact("per_service", json!(Self::per_service_counts(&slow))),
        )
    }

    fn detect_resource_pressure(&self, batch: &[LogEntry]) -> Option<Advice> {
        let pressured: Vec<&LogEntry> = batch
            .iter()
            .filter(|e| e.level == LogLevel::Warn || e.level.is_error())
            .filter(|e| {
                let message = e.message.to_lowercase();
                self.keywords.iter().any(|k| message.contains(k.as_str()))
            })
            .collect();

        if pressured.is_empty() {
            return None;
        }

        let (services, label) = Self::services_label(&pressured);
        let mut fingerprint = vec![Self::NAME, "resource_usage"];
        fingerprint.extend(services.iter().map(String::as_str));

        let mut advice = Advice::new(
            &fingerprint,
            format!("Resource pressure in {}", label),
            Self::severity_for(pressured.len()),
            Category::Performance,
        )
        .with_evidence(pressured.iter().copied(), self.config.evidence_limit);

        let raw = batch_confidence(pressured.len(), batch.len());
        let confidence = self.history.calibrate(&advice.advice_id, raw);
        advice = advice.with_confidence(confidence);

        let errors = pressured
            .iter()
            .filter(|e| e.level.is_error())
            .count();

        advice.root_cause_analysis = format!(
            "{} warnings or errors report resource pressure ({} at ERROR level). The service is close to its CPU, memory, disk, or pool limits.",
            pressured.len(),
            errors
        );
        advice.resolution_steps = vec![
            "Check CPU, memory, and disk usage on the affected hosts".to_string(),
            "Review thread and connection pool sizing".to_string(),
            "Shed or defer non-critical work until usage drops".to_string(),
        ];
        advice.prevention_measures =
            "Capacity-plan from usage trends and autoscale on saturation signals.".to_string();
        advice.monitoring_recommendations = vec![
            "Alert on sustained resource usage above 80%".to_string(),
            "Track pool saturation alongside request volume".to_string(),
        ];

        Some(
            advice
                .with_impact("detector", json!("resource_usage"))
                .with_impact("matches", json!(pressured.len()))
                .with_impact("error_matches", json!(errors))
                .with_impact("per_service", json!(Self::per_service_counts(&pressured))),
        )
    }
}

impl Default for PerformanceAgent {
    fn default() -> Self {
        Self::new(PerformanceAgentConfig::default())
    }
}

impl PatternAgent for PerformanceAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, batch: &[LogEntry]) -> Result<Vec<Advice>, AgentError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .detect_slow_responses(batch)
            .into_iter()
            .chain(self.detect_resource_pressure(batch))
            .collect())
    }

    fn record_accepted(&self, advice: &[Advice]) {
        for item in advice {
            self.history.record(&item.advice_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogContext;

    fn timed(service: &str, duration_ms: f64) -> LogEntry {
        LogEntry::new(service, LogLevel::Info, "request served")
            .with_context(LogContext::default().with_duration_ms(duration_ms))
    }

    #[test]
    fn test_slow_responses_yield_one_medium_advice() {
        let agent = PerformanceAgent::default();
        let batch: Vec<LogEntry> = (0..3).map(|_| timed("service-B", 7000.0)).collect();

        let advice = agent.analyze(&batch).unwrap();

        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].category, Category::Performance);
        assert_eq!(advice[0].severity, Severity::Medium);
        assert_eq!(advice[0].occurrence_count, 3);
        assert_eq!(advice[0].title, "Slow responses in service-B");
        assert_eq!(advice[0].impact_assessment["max_duration_ms"], json!(7000.0));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let agent = PerformanceAgent::default();
        let batch = vec![timed("svc", 5000.0), timed("svc", 120.0)];
        assert!(agent.analyze(&batch).unwrap().is_empty());
    }

    #[test]
    fn test_many_slow_requests_are_high() {
        let agent = PerformanceAgent::default();
        let batch: Vec<LogEntry> = (0..25)
            .map(|i| timed(&format!("svc-{}", i % 3), 9000.0))
            .collect();

        let advice = agent.analyze(&batch).unwrap();
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].severity, Severity::High);
        assert_eq!(advice[0].affected_services.len(), 3);
        assert_eq!(advice[0].title, "Slow responses in 3 services");
    }

    #[test]
    fn test_resource_pressure_requires_warn_or_error() {
        let agent = PerformanceAgent::default();
        let batch = vec![
            LogEntry::new("svc", LogLevel::Warn, "High memory usage: 91%"),
            LogEntry::new("svc", LogLevel::Info, "memory usage nominal"),
            LogEntry::new("svc", LogLevel::Error, "connection pool exhausted"),
        ];

        let advice = agent.analyze(&batch).unwrap();
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].occurrence_count, 2);
        assert_eq!(advice[0].impact_assessment["error_matches"], json!(1));
    }

    #[test]
    fn test_resource_pressure_counts_critical_and_fatal() {
        let agent = PerformanceAgent::default();
        let batch = vec![
            LogEntry::new("svc", LogLevel::Critical, "Resource exhausted: file descriptors"),
            LogEntry::new("svc", LogLevel::Fatal, "queue full, shutting down"),
        ];

        let advice = agent.analyze(&batch).unwrap();
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].occurrence_count, 2);
        assert_eq!(advice[0].impact_assessment["error_matches"], json!(2));
    }

    #[test]
    fn test_both_detectors_fire_independently() {
        let agent = PerformanceAgent::default();
        let batch = vec![
            timed("api", 8000.0),
            LogEntry::new("db", LogLevel::Warn, "disk usage at 95%"),
        ];

        let advice = agent.analyze(&batch).unwrap();
        assert_eq!(advice.len(), 2);
        assert_ne!(advice[0].advice_id, advice[1].advice_id);
    }

    #[test]
    fn test_quiet_batch_yields_nothing() {
        let agent = PerformanceAgent::default();
        let batch = vec![LogEntry::new("svc", LogLevel::Info, "all good")];
        assert!(agent.analyze(&batch).unwrap().is_empty());
        assert!(agent.analyze(&[]).unwrap().is_empty());
    }
}
