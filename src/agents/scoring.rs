use crate::advice::Advice;
use crate::config::ScoringConfig;

/// Computes the 0-100 priority score used to rank advisories
///
/// `score = (weight(category, severity) + min(cap, occurrences × rate)) × confidence`,
/// clamped to `[0, 100]`.
#[derive(Debug, Clone, Default)]
pub struct PriorityScorer {
    config: ScoringConfig,
}

impl PriorityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score an advisory without modifying it
    pub fn score(&self, advice: &Advice) -> f64 {
        let weight = self
            .config
            .weights
            .for_category(advice.category)
            .get(advice.severity);

        let frequency =
            (advice.occurrence_count as f64 * self.config.frequency_rate).min(self.config.frequency_cap);

        let confidence = if advice.confidence.is_finite() {
            advice.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let score = (weight + frequency) * confidence;
        if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Write the score into `advice.priority_score`
    pub fn apply(&self, advice: &mut Advice) {
        advice.priority_score = self.score(advice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{Category, Severity};
    use quickcheck_macros::quickcheck;

    fn advice(category: Category, severity: Severity, occurrences: u64, confidence: f64) -> Advice {
        let mut advice = Advice::new(&["test"], "t".to_string(), severity, category);
        advice.occurrence_count = occurrences;
        advice.confidence = confidence;
        advice
    }

    #[test]
    fn test_weight_plus_frequency_times_confidence() {
        let scorer = PriorityScorer::default();

        // ERROR/MEDIUM: (30 + 6) × 1.0
        let a = advice(Category::Error, Severity::Medium, 6, 1.0);
        assert!((scorer.score(&a) - 36.0).abs() < 1e-9);

        // PERFORMANCE/MEDIUM: (25 + 3) × 0.5
        let b = advice(Category::Performance, Severity::Medium, 3, 0.5);
        assert!((scorer.score(&b) - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_bonus_is_capped() {
        let scorer = PriorityScorer::default();
        let a = advice(Category::Security, Severity::Critical, 10_000, 1.0);
        // 75 + 30 = 105 before clamping
        assert_eq!(scorer.score(&a), 100.0);
    }

    #[test]
    fn test_non_finite_confidence_scores_zero() {
        let scorer = PriorityScorer::default();
        let a = advice(Category::Error, Severity::High, 5, f64::NAN);
        assert_eq!(scorer.score(&a), 0.0);
    }

    #[test]
    fn test_apply_sets_priority() {
        let scorer = PriorityScorer::default();
        let mut a = advice(Category::Compliance, Severity::Low, 0, 1.0);
        scorer.apply(&mut a);
        assert!((a.priority_score - 12.0).abs() < 1e-9);
    }

    #[quickcheck]
    fn prop_score_is_bounded(occurrences: u64, confidence: f64, severity: u8, category: u8) -> bool {
        let severity = Severity::ALL[severity as usize % 4];
        let category = [
            Category::Error,
            Category::Performance,
            Category::Security,
            Category::Compliance,
        ][category as usize % 4];

        let score = PriorityScorer::default().score(&advice(category, severity, occurrences, confidence));
        (0.0..=100.0).contains(&score)
    }
}
