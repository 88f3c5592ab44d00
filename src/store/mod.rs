//! Durable storage for registrations, the raw-log archive, and advisories

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::advice::{Advice, AdviceStatus, Severity};
use crate::error::StoreError;
use crate::events::{LogEntry, ServiceInfo, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;

/// What an advisory upsert did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this advice id was written
    Inserted,
    /// The advisory was already open and has been refreshed
    Updated,
    /// The advisory was resolved earlier; its analysis was refreshed but it
    /// stays resolved
    Resolved,
}

impl UpsertOutcome {
    /// True when operators have not seen this advisory open before now
    pub fn is_newly_open(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Result of a resolve request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveOutcome {
    pub advice_id: String,
    pub status: AdviceStatus,
    /// `None` when the id is unknown
    pub resolved_at: Option<Timestamp>,
    /// Whether this call performed the OPEN → RESOLVED transition
    pub changed: bool,
}

/// Aggregates behind the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_advice: u64,
    pub by_status: BTreeMap<String, u64>,
    pub open_by_severity: BTreeMap<String, u64>,
    pub average_open_priority: f64,
    pub archived_logs: u64,
    pub registered_services: u64,
}

/// Rows removed by one retention run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionReport {
    pub cutoff: Timestamp,
    pub logs_deleted: usize,
    pub advice_deleted: usize,
}

/// Storage seam used by the engine
///
/// Implementations must tolerate concurrent callers. Each method is atomic
/// on its own; no method leaves a partial write behind on error.
#[cfg_attr(test, mockall::automock)]
pub trait AdviceStore: Send + Sync {
    /// Insert or replace a registration, keeping the original
    /// `registration_time`. Returns the stored row.
    fn upsert_service(&self, service: &ServiceInfo) -> Result<ServiceInfo, StoreError>;

    fn get_service(&self, service_name: &str) -> Result<Option<ServiceInfo>, StoreError>;

    /// Append entries to the raw-log archive in one transaction
    fn archive_logs(&self, entries: &[LogEntry]) -> Result<usize, StoreError>;

    /// Insert or refresh an advisory by id
    ///
    /// A resolved advisory that is written again becomes OPEN with its
    /// `resolved_at` cleared. `created_at` is never overwritten.
    fn upsert_advice(&self, advice: &Advice) -> Result<UpsertOutcome, StoreError>;

    fn get_advice(&self, advice_id: &str) -> Result<Option<Advice>, StoreError>;

    /// Up to `limit` advisories with `status`, highest priority first
    fn list_advice(&self, status: AdviceStatus, limit: usize) -> Result<Vec<Advice>, StoreError>;

    /// Mark an advisory RESOLVED; unknown or already resolved ids succeed
    fn resolve_advice(&self, advice_id: &str, at: Timestamp) -> Result<ResolveOutcome, StoreError>;

    fn dashboard(&self) -> Result<DashboardStats, StoreError>;

    /// Delete archived logs and RESOLVED advisories older than `cutoff`
    fn purge_older_than(&self, cutoff: Timestamp) -> Result<RetentionReport, StoreError>;

    /// Cheap liveness probe
    fn ping(&self) -> Result<(), StoreError>;
}

/// Zero-filled status and severity buckets so the dashboard shape is stable
pub(crate) fn empty_buckets() -> (BTreeMap<String, u64>, BTreeMap<String, u64>) {
    let by_status = [AdviceStatus::Open, AdviceStatus::Resolved]
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let by_severity = Severity::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    (by_status, by_severity)
}
