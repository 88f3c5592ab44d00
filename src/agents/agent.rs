use crate::advice::Advice;
use crate::error::AgentError;
use crate::events::LogEntry;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Number of past detections an agent remembers
pub const DEFAULT_HISTORY_SIZE: usize = 1_000;

/// Trait for pattern detection agents
///
/// An agent inspects one batch of log entries and returns the advisories it
/// derives from it. Agents are run concurrently by the
/// [`AgentManager`](crate::agents::AgentManager) and must not depend on one
/// another. Apart from a bounded detection history used to calibrate
/// confidence, they hold no state between batches.
pub trait PatternAgent: Send + Sync {
    /// Unique name the agent is registered under
    fn name(&self) -> &str;

    /// Analyze a batch and return zero or more unscored advisories
    fn analyze(&self, batch: &[LogEntry]) -> Result<Vec<Advice>, AgentError>;

    /// Called with this agent's output when it arrived before the deadline
    ///
    /// Results that were discarded never reach this hook, so any state kept
    /// across batches only ever reflects advisories that were acted on.
    fn record_accepted(&self, _advice: &[Advice]) {}
}

/// Confidence derived from match volume relative to batch size
///
/// `min(1.0, 2 × matches / batch_size)`; an empty batch yields 0.
pub fn batch_confidence(matches: usize, batch_size: usize) -> f64 {
    if batch_size == 0 {
        return 0.0;
    }
    (2.0 * matches as f64 / batch_size as f64).min(1.0)
}

/// Rolling record of an agent's recent detections
///
/// Used only to calibrate the reported confidence of recurring conditions;
/// it never decides whether an advisory is emitted.
#[derive(Debug)]
pub struct DetectionHistory {
    recent: Mutex<VecDeque<String>>,
    max_size: usize,
}

impl DetectionHistory {
    /// Confidence added per prior detection of the same advisory
    const RECURRENCE_STEP: f64 = 0.05;
    /// Upper bound of the recurrence bonus
    const RECURRENCE_CAP: f64 = 0.25;

    pub fn new(max_size: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(max_size.min(DEFAULT_HISTORY_SIZE))),
            max_size: max_size.max(1),
        }
    }

    /// How many times `advice_id` appears in the history
    pub fn prior_count(&self, advice_id: &str) -> usize {
        let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.iter().filter(|id| id.as_str() == advice_id).count()
    }

    /// Remember a detection, evicting the oldest beyond `max_size`
    pub fn record(&self, advice_id: &str) {
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.push_back(advice_id.to_string());
        while recent.len() > self.max_size {
            recent.pop_front();
        }
    }

    /// Raise `raw` confidence for conditions seen before, capped at 1.0
    pub fn calibrate(&self, advice_id: &str, raw: f64) -> f64 {
        let bonus = (self.prior_count(advice_id) as f64 * Self::RECURRENCE_STEP)
            .min(Self::RECURRENCE_CAP);
        (raw + bonus).min(1.0)
    }

    pub fn len(&self) -> usize {
        self.recent.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
