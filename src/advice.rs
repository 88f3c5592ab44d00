//! Advisory types produced by the pattern detection agents
//!
//! An [`Advice`] is a single prioritized, actionable finding. Its id is
//! derived from a fingerprint of the detected condition so that detecting
//! the same condition again updates the existing advisory instead of
//! opening a duplicate.

use crate::events::{LogEntry, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Severity of an advisory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Default time-to-resolve estimate, in minutes
    pub fn default_resolution_minutes(&self) -> u64 {
        match self {
            Severity::Critical => 30,
            Severity::High => 120,
            Severity::Medium => 480,
            Severity::Low => 1440,
        }
    }
}

/// Business category of an advisory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Error,
    Performance,
    Security,
    Compliance,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Error => "ERROR",
            Category::Performance => "PERFORMANCE",
            Category::Security => "SECURITY",
            Category::Compliance => "COMPLIANCE",
        }
    }
}

/// Lifecycle state of an advisory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdviceStatus {
    Open,
    Resolved,
}

impl AdviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceStatus::Open => "OPEN",
            AdviceStatus::Resolved => "RESOLVED",
        }
    }
}

macro_rules! impl_text_enum {
    ($ty:ty, $($variant:expr),+) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_uppercase();
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == upper)
                    .ok_or_else(|| format!("unknown {} '{}'", stringify!($ty), s))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_text_enum!(Severity, Severity::Low, Severity::Medium, Severity::High, Severity::Critical);
impl_text_enum!(
    Category,
    Category::Error,
    Category::Performance,
    Category::Security,
    Category::Compliance
);
impl_text_enum!(AdviceStatus, AdviceStatus::Open, AdviceStatus::Resolved);

/// One step of an escalation path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationStep {
    /// 1-based escalation level
    pub level: u8,
    /// Who is notified at this level
    pub contact: String,
    /// Minutes an advisory may stay open before this level is notified
    pub threshold_minutes: u64,
}

/// Descriptor of an automated remediation an operator may trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Remediation {
    pub action: String,
    pub description: String,
    #[serde(default)]
    pub requires_approval: bool,
}

/// A prioritized, actionable advisory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Advice {
    pub advice_id: String,
    pub title: String,
    pub severity: Severity,
    pub category: Category,
    pub affected_services: BTreeSet<String>,
    pub detection_time: Timestamp,
    /// Bounded, ordered sample of contributing entries
    pub evidence: Vec<LogEntry>,
    pub root_cause_analysis: String,
    pub impact_assessment: BTreeMap<String, serde_json::Value>,
    pub resolution_steps: Vec<String>,
    pub prevention_measures: String,
    pub automated_remediation: Option<Remediation>,
    pub monitoring_recommendations: Vec<String>,
    /// Always within [0, 100]
    pub priority_score: f64,
    /// Detection confidence within [0, 1]
    pub confidence: f64,
    /// Number of matching entries behind this advisory
    pub occurrence_count: u64,
    pub estimated_resolution_minutes: u64,
    pub escalation_path: Vec<EscalationStep>,
    pub status: AdviceStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

/// Derive a stable advisory id from a detection fingerprint
///
/// The fingerprint parts are joined with an unambiguous separator before
/// hashing, so `["a", "bc"]` and `["ab", "c"]` differ.
pub fn advice_id_for(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    format!("adv-{}", &hex::encode(digest)[..16])
}

impl Advice {
    /// Start a new OPEN advisory with empty analysis fields
    ///
    /// `fingerprint` identifies the detected condition and determines the
    /// advice id; the priority score is filled in later by the scorer.
    pub fn new(fingerprint: &[&str], title: String, severity: Severity, category: Category) -> Self {
        let now = Utc::now();
        Self {
            advice_id: advice_id_for(fingerprint),
            title,
            severity,
            category,
            affected_services: BTreeSet::new(),
            detection_time: now,
            evidence: Vec::new(),
            root_cause_analysis: String::new(),
            impact_assessment: BTreeMap::new(),
            resolution_steps: Vec::new(),
            prevention_measures: String::new(),
            automated_remediation: None,
            monitoring_recommendations: Vec::new(),
            priority_score: 0.0,
            confidence: 0.0,
            occurrence_count: 0,
            estimated_resolution_minutes: severity.default_resolution_minutes(),
            escalation_path: Vec::new(),
            status: AdviceStatus::Open,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// Record the contributing entries, keeping at most `limit` as evidence
    pub fn with_evidence<'a, I>(mut self, entries: I, limit: usize) -> Self
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut count = 0u64;
        for entry in entries {
            count += 1;
            self.affected_services.insert(entry.service_name.clone());
            if self.evidence.len() < limit {
                self.evidence.push(entry.clone());
            }
        }
        self.occurrence_count = count;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_impact(mut self, key: &str, value: serde_json::Value) -> Self {
        self.impact_assessment.insert(key.to_string(), value);
        self
    }
}
