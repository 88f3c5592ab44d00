//! Fault signature detection
//!
//! The ErrorAgent matches error-level messages against a configurable
//! signature table, groups matches by `(service, signature)`, and raises one
//! advisory per group that is both large enough and dense enough within
//! the batch.

use crate::advice::{Advice, Severity};
use crate::agents::agent::{batch_confidence, DetectionHistory, PatternAgent};
use crate::config::{ErrorAgentConfig, SignatureClass, SignatureDefinition};
use crate::error::AgentError;
use crate::events::LogEntry;
use log::debug;
use serde_json::json;
use std::collections::BTreeMap;

/// Agent that turns recurring fault signatures into advisories
pub struct ErrorAgent {
    config: ErrorAgentConfig,
    /// Lower-cased keywords, index-aligned with `config.signatures`
    keywords: Vec<Vec<String>>,
    history: DetectionHistory,
}

impl ErrorAgent {
    pub const NAME: &'static str = "error_agent";

    pub fn new(config: ErrorAgentConfig) -> Self {
        let keywords = config
            .signatures
            .iter()
            .map(|signature| {
                signature
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .collect();

        Self {
            config,
            keywords,
            history: DetectionHistory::default(),
        }
    }

    /// Index of the first signature whose keywords occur in `message`
    fn match_signature(&self, message: &str) -> Option<usize> {
        let message = message.to_lowercase();
        self.keywords
            .iter()
            .position(|keywords| keywords.iter().any(|k| message.contains(k.as_str())))
    }

    /// Severity from criticality class and group volume
    pub fn classify(class: SignatureClass, occurrences: usize) -> Severity {
        match class {
            SignatureClass::Critical if occurrences >= 20 => Severity::Critical,
            SignatureClass::Critical if occurrences >= 10 => Severity::High,
            SignatureClass::Critical => Severity::Medium,
            SignatureClass::Standard if occurrences >= 50 => Severity::High,
            SignatureClass::Standard if occurrences >= 20 => Severity::Medium,
            SignatureClass::Standard => Severity::Low,
        }
    }

    fn build_advice(
        &self,
        service: &str,
        signature: &SignatureDefinition,
        group: &[&LogEntry],
        batch_size: usize,
        raw_confidence: f64,
    ) -> Advice {
        let severity = Self::classify(signature.class, group.len());
        let label = signature.name.replace('_', " ");

        let mut advice = Advice::new(
            &[Self::NAME, service, signature.name.as_str()],
            format!("Recurring {} in {}", label, service),
            severity,
            signature.category,
        )
        .with_evidence(group.iter().copied(), self.config.evidence_limit);

        let confidence = self.history.calibrate(&advice.advice_id, raw_confidence);
        advice = advice.with_confidence(confidence);

        let first_seen = group.iter().map(|e| e.timestamp).min();
        let last_seen = group.iter().map(|e| e.timestamp).max();

        advice.root_cause_analysis = if signature.root_cause.is_empty() {
            format!(
                "{} error-level entries from {} match the '{}' signature.",
                group.len(),
                service,
                signature.name
            )
        } else {
            signature.root_cause.clone()
        };
        advice.resolution_steps = signature.resolution_steps.clone();
        advice.prevention_measures = signature.prevention.clone();
        advice.automated_remediation = signature.remediation.clone();
        advice.monitoring_recommendations = vec![
            format!(
                "Alert when '{}' errors from {} exceed {} per batch",
                label, service, self.config.pattern_threshold
            ),
            format!("Track the {} error rate on the {} dashboard", label, service),
        ];

        advice
            .with_impact("signature", json!(signature.name))
            .with_impact("signature_class", json!(signature.class))
            .with_impact("occurrences", json!(group.len()))
            .with_impact("batch_share", json!(group.len() as f64 / batch_size as f64))
            .with_impact("raw_confidence", json!(raw_confidence))
            .with_impact("first_seen", json!(first_seen))
            .with_impact("last_seen", json!(last_seen))
    }
}

impl Default for ErrorAgent {
    fn default() -> Self {
        Self::new(ErrorAgentConfig::default())
    }
}

impl PatternAgent for ErrorAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, batch: &[LogEntry]) -> Result<Vec<Advice>, AgentError> {
        let batch_size = batch.len();
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let mut groups: BTreeMap<(&str, usize), Vec<&LogEntry>> = BTreeMap::new();
        for entry in batch.iter().filter(|e| e.level.is_error()) {
            if let Some(index) = self.match_signature(&entry.message) {
                groups
                    .entry((entry.service_name.as_str(), index))
                    .or_default()
                    .push(entry);
            }
        }

        let mut results = Vec::new();
        for ((service, index), group) in groups {
            let signature = &self.config.signatures[index];

            if group.len() < self.config.pattern_threshold {
                debug!(
                    "{}: {} × '{}' below pattern threshold {}",
                    service,
                    group.len(),
                    signature.name,
                    self.config.pattern_threshold
                );
                continue;
            }

            let raw_confidence = batch_confidence(group.len(), batch_size);
            if raw_confidence < self.config.confidence_threshold {
                debug!(
                    "{}: '{}' confidence {:.2} below threshold {:.2}",
                    service, signature.name, raw_confidence, self.config.confidence_threshold
                );
                continue;
            }

            results.push(self.build_advice(service, signature, &group, batch_size, raw_confidence));
        }

        Ok(results)
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
    use crate::advice::Category;
    use crate::events::LogLevel;
    use quickcheck_macros::quickcheck;

    fn entry(service: &str, level: LogLevel, message: &str) -> LogEntry {
        LogEntry::new(service, level, message)
    }

    fn repeat(service: &str, message: &str, count: usize) -> Vec<LogEntry> {
        (0..count)
            .map(|_| entry(service, LogLevel::Error, message))
            .collect()
    }

    #[test]
    fn test_connection_refused_group_yields_single_advice() {
        let agent = ErrorAgent::default();
        let batch = repeat("service-A", "upstream connection refused", 6);

        let advice = agent.analyze(&batch).unwrap();

        assert_eq!(advice.len(), 1);
        let advice = &advice[0];
        assert_eq!(advice.category, Category::Error);
        assert_eq!(advice.severity, Severity::Medium);
        assert_eq!(advice.confidence, 1.0);
        assert_eq!(advice.occurrence_count, 6);
        assert_eq!(advice.evidence.len(), 5);
        assert!(advice.affected_services.contains("service-A"));
        assert!(!advice.resolution_steps.is_empty());
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let agent = ErrorAgent::default();
        let batch = repeat("svc", "connection refused", 4);
        assert!(agent.analyze(&batch).unwrap().is_empty());
    }

    #[test]
    fn test_exactly_threshold_emits_one() {
        let agent = ErrorAgent::default();
        let batch = repeat("svc", "connection refused", 5);
        assert_eq!(agent.analyze(&batch).unwrap().len(), 1);
    }

    #[test]
    fn test_low_confidence_group_is_suppressed() {
        let agent = ErrorAgent::default();
        let mut batch = repeat("svc", "connection refused", 5);
        batch.extend((0..20).map(|i| entry("svc", LogLevel::Info, &format!("ok {}", i))));

        // 2 × 5 / 25 = 0.4 < 0.7
        assert!(agent.analyze(&batch).unwrap().is_empty());
    }

    #[test]
    fn test_non_error_levels_are_ignored() {
        let agent = ErrorAgent::default();
        let batch: Vec<LogEntry> = (0..10)
            .map(|_| entry("svc", LogLevel::Warn, "connection refused"))
            .collect();
        assert!(agent.analyze(&batch).unwrap().is_empty());
    }

    #[test]
    fn test_groups_split_by_service_and_signature() {
        let agent = ErrorAgent::default();
        let mut batch = repeat("svc-a", "permission denied on /data", 5);
        batch.extend(repeat("svc-b", "permission denied on /data", 5));

        let advice = agent.analyze(&batch).unwrap();
        assert_eq!(advice.len(), 2);
        assert_ne!(advice[0].advice_id, advice[1].advice_id);
        assert!(advice.iter().all(|a| a.category == Category::Security));
    }

    #[test]
    fn test_same_condition_same_id_across_batches() {
        let agent = ErrorAgent::default();
        let first = agent.analyze(&repeat("svc", "Out of memory", 5)).unwrap();
        let second = agent.analyze(&repeat("svc", "OUT OF MEMORY", 7)).unwrap();
        assert_eq!(first[0].advice_id, second[0].advice_id);
    }

    #[test]
    fn test_first_signature_in_table_order_wins() {
        let agent = ErrorAgent::default();
        let index = agent
            .match_signature("connection refused: permission denied")
            .unwrap();
        assert_eq!(agent.config.signatures[index].name, "connection_failure");
    }

    #[test]
    fn test_severity_classes() {
        use SignatureClass::{Critical, Standard};
        assert_eq!(ErrorAgent::classify(Critical, 5), Severity::Medium);
        assert_eq!(ErrorAgent::classify(Critical, 10), Severity::High);
        assert_eq!(ErrorAgent::classify(Critical, 20), Severity::Critical);
        assert_eq!(ErrorAgent::classify(Standard, 19), Severity::Low);
        assert_eq!(ErrorAgent::classify(Standard, 20), Severity::Medium);
        assert_eq!(ErrorAgent::classify(Standard, 50), Severity::High);
    }

    #[test]
    fn test_connection_failures_escalate_with_volume() {
        for (count, expected) in [
            (6, Severity::Medium),
            (10, Severity::High),
            (20, Severity::Critical),
        ] {
            let agent = ErrorAgent::default();
            let advice = agent.analyze(&repeat("svc", "connection refused", count)).unwrap();
            assert_eq!(advice.len(), 1);
            assert_eq!(advice[0].severity, expected, "{} occurrences", count);
            assert_eq!(advice[0].impact_assessment["signature"], json!("connection_failure"));
        }
    }

    #[test]
    fn test_custom_signature_table() {
        let config = ErrorAgentConfig {
            pattern_threshold: 2,
            signatures: vec![SignatureDefinition {
                name: "ledger_mismatch".to_string(),
                keywords: vec!["Ledger Mismatch".to_string()],
                class: SignatureClass::Critical,
                category: Category::Compliance,
                root_cause: String::new(),
                resolution_steps: Vec::new(),
                prevention: String::new(),
                remediation: None,
            }],
            ..ErrorAgentConfig::default()
        };
        let agent = ErrorAgent::new(config);

        let advice = agent
            .analyze(&repeat("ledger", "ledger mismatch at block 7", 3))
            .unwrap();

        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].category, Category::Compliance);
        assert!(advice[0].root_cause_analysis.contains("ledger_mismatch"));
    }

    #[test]
    fn test_recurrence_raises_reported_confidence_only() {
        let agent = ErrorAgent::default();
        let mut batch = repeat("svc", "connection refused", 5);
        batch.extend((0..8).map(|i| entry("svc", LogLevel::Info, &format!("ok {}", i))));

        // 2 × 5 / 13 ≈ 0.77
        let first = agent.analyze(&batch).unwrap();
        let unaccepted = agent.analyze(&batch).unwrap();
        assert_eq!(unaccepted[0].confidence, first[0].confidence);

        agent.record_accepted(&first);
        let second = agent.analyze(&batch).unwrap();

        assert!(second[0].confidence > first[0].confidence);
        assert_eq!(
            first[0].impact_assessment["raw_confidence"],
            second[0].impact_assessment["raw_confidence"]
        );
    }

    #[quickcheck]
    fn prop_below_threshold_never_emits(count: u8, noise: u8) -> bool {
        let agent = ErrorAgent::default();
        let count = count as usize % agent.config.pattern_threshold;
        let mut batch = repeat("svc", "no route to host", count);
        batch.extend((0..noise).map(|i| entry("svc", LogLevel::Info, &format!("ok {}", i))));

        agent.analyze(&batch).unwrap().is_empty()
    }

    #[quickcheck]
    fn prop_dense_group_emits_exactly_one(extra: u8) -> bool {
        let agent = ErrorAgent::default();
        let count = agent.config.pattern_threshold + (extra as usize % 40);
        let batch = repeat("svc", "TLS error: handshake failed", count);

        agent.analyze(&batch).map(|a| a.len() == 1).unwrap_or(false)
    }
}
