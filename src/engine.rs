//! The advisory engine
//!
//! [`AdvisoryEngine`] owns the ingestion buffer, the agent manager and the
//! alerting pipeline, and fronts the store. It is constructed once and
//! shared by `Arc` between the HTTP handlers and the worker threads. All
//! methods are synchronous; async callers go through `spawn_blocking`.

use crate::advice::{Advice, AdviceStatus};
use crate::agents::AgentManager;
use crate::alerts::{AlertDispatcher, AlertStats, EscalationPlanner};
use crate::buffer::IngestionBuffer;
use crate::config::Config;
use crate::error::{EngineError, ValidationError};
use crate::events::{parse_ingest_payload, LogEntry, ServiceInfo, ServiceRegistration};
use crate::monitoring::{PipelineMetrics, PipelineMonitor};
use crate::store::{AdviceStore, DashboardStats, ResolveOutcome, RetentionReport};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Default number of advisories returned by a listing
pub const DEFAULT_LIST_LIMIT: usize = 10;
/// Largest listing a caller can ask for
pub const MAX_LIST_LIMIT: usize = 500;

/// Buffer fill ratio at which health reports `degraded`
const DEGRADED_FILL_RATIO: f64 = 0.9;

/// Reply to a successful ingest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub processed: usize,
    pub buffer_size: usize,
}

/// Query parameters of an advisory listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdviceQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

impl AdviceQuery {
    /// Resolve defaults and validate
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidParameter` for a zero limit or an
    /// unknown status. Limits above the maximum are clamped.
    pub fn resolve(&self) -> Result<(AdviceStatus, usize), ValidationError> {
        let limit = match self.limit {
            None => DEFAULT_LIST_LIMIT,
            Some(0) => {
                return Err(ValidationError::InvalidParameter {
                    name: "limit".to_string(),
                    reason: "must be at least 1".to_string(),
                })
            }
            Some(n) => n.min(MAX_LIST_LIMIT),
        };

        let status = match self.status.as_deref() {
            None => AdviceStatus::Open,
            Some(raw) => raw
                .parse()
                .map_err(|reason| ValidationError::InvalidParameter {
                    name: "status".to_string(),
                    reason,
                })?,
        };

        Ok((status, limit))
    }
}

/// Store aggregates plus live buffer figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    #[serde(flatten)]
    pub stats: DashboardStats,
    pub buffer_size: usize,
    pub dropped_entries: u64,
    pub generated_at: chrono::DateTime<Utc>,
}

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub agents: Vec<String>,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub dropped_entries: u64,
    pub pending_advice: usize,
    pub store_ok: bool,
    pub pipeline: PipelineMetrics,
    pub alerts: AlertStats,
    pub uptime_secs: u64,
}

/// Outcome of analyzing and persisting one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub entries: usize,
    pub advice: usize,
    pub persisted: usize,
    pub agent_failures: usize,
}

/// Central coordinator of ingestion, analysis and the advisory lifecycle
pub struct AdvisoryEngine {
    config: Config,
    store: Arc<dyn AdviceStore>,
    buffer: IngestionBuffer,
    agents: AgentManager,
    escalation: EscalationPlanner,
    alerts: Mutex<AlertDispatcher>,
    monitor: PipelineMonitor,
    /// Advisories whose last persist attempt failed, keyed by advice id
    pending: Mutex<HashMap<String, Advice>>,
    started_at: Instant,
}

impl AdvisoryEngine {
    /// Engine with the built-in agents and log-line alert delivery
    pub fn new(config: Config, store: Arc<dyn AdviceStore>) -> Self {
        let agents = AgentManager::from_config(&config);
        let alerts = AlertDispatcher::new(&config.alerts);
        Self::with_parts(config, store, agents, alerts)
    }

    /// Engine with a caller-supplied agent set and alert dispatcher
    pub fn with_parts(
        config: Config,
        store: Arc<dyn AdviceStore>,
        agents: AgentManager,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            buffer: IngestionBuffer::new(config.buffer.capacity),
            escalation: EscalationPlanner::new(config.escalation.clone()),
            alerts: Mutex::new(alerts),
            monitor: PipelineMonitor::new(),
            pending: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
            config,
            store,
            agents,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer(&self) -> &IngestionBuffer {
        &self.buffer
    }

    /// Create or update a service registration
    ///
    /// # Errors
    ///
    /// `Validation` when `service_name` is missing, `Store` on write failure.
    pub fn register_service(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceInfo, EngineError> {
        let service = registration.into_service_info(Utc::now())?;
        let stored = self.store.upsert_service(&service)?;
        info!(
            "Registered service '{}' ({}, criticality {})",
            stored.service_name, stored.service_type, stored.criticality_level
        );
        Ok(stored)
    }

    pub fn get_service(&self, service_name: &str) -> Result<Option<ServiceInfo>, EngineError> {
        Ok(self.store.get_service(service_name)?)
    }

    /// Validate, archive and enqueue a batch of log entries
    ///
    /// The body may be one entry, an array of entries, or an object with an
    /// `entries` array. Any invalid entry rejects the whole body before
    /// anything is archived or buffered.
    pub fn ingest(&self, body: serde_json::Value) -> Result<IngestReceipt, EngineError> {
        let entries = parse_ingest_payload(body)?;
        self.ingest_entries(entries)
    }

    /// Archive and enqueue already validated entries
    pub fn ingest_entries(&self, entries: Vec<LogEntry>) -> Result<IngestReceipt, EngineError> {
        let processed = self.store.archive_logs(&entries)?;
        self.buffer.push_all(entries);
        let buffer_size = self.buffer.len();
        debug!("Ingested {} entries, buffer at {}", processed, buffer_size);
        Ok(IngestReceipt {
            processed,
            buffer_size,
        })
    }

    pub fn list_advice(&self, query: &AdviceQuery) -> Result<Vec<Advice>, EngineError> {
        let (status, limit) = query.resolve()?;
        Ok(self.store.list_advice(status, limit)?)
    }

    pub fn get_advice(&self, advice_id: &str) -> Result<Option<Advice>, EngineError> {
        Ok(self.store.get_advice(advice_id)?)
    }

    /// Resolve an advisory; unknown and already resolved ids succeed
    pub fn resolve_advice(&self, advice_id: &str) -> Result<ResolveOutcome, EngineError> {
        let outcome = self.store.resolve_advice(advice_id, Utc::now())?;
        if outcome.changed {
            info!("Advisory {} resolved", advice_id);
        } else {
            debug!("Resolve of {} was a no-op", advice_id);
        }
        Ok(outcome)
    }

    pub fn dashboard(&self) -> Result<Dashboard, EngineError> {
        Ok(Dashboard {
            stats: self.store.dashboard()?,
            buffer_size: self.buffer.len(),
            dropped_entries: self.buffer.dropped_count(),
            generated_at: Utc::now(),
        })
    }

    /// Health never fails; an unreachable store reports `unhealthy`
    pub fn health(&self) -> HealthReport {
        let store_ok = match self.store.ping() {
            Ok(()) => true,
            Err(e) => {
                warn!("Store health check failed: {}", e);
                false
            }
        };
        let pending_advice = self.lock_pending().len();

        let status = if !store_ok {
            HealthState::Unhealthy
        } else if pending_advice > 0
            || self.monitor.last_persist_failed()
            || self.buffer.fill_ratio() >= DEGRADED_FILL_RATIO
        {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport {
            status,
            agents: self.agents.agent_names(),
            buffer_size: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            dropped_entries: self.buffer.dropped_count(),
            pending_advice,
            store_ok,
            pipeline: self.monitor.snapshot(),
            alerts: self.lock_alerts().stats(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// One worker cycle: retry failed persists, deliver queued alerts, then
    /// process every ready batch until none is left or `should_stop` says so
    ///
    /// # Returns
    ///
    /// Number of batches processed
    pub fn run_cycle(&self, should_stop: &dyn Fn() -> bool) -> usize {
        self.retry_pending();
        self.lock_alerts().tick();

        let batch_size = self.config.processing.batch_size;
        let max_age = self.config.processing.max_batch_age();

        let mut batches = 0;
        while !should_stop() {
            let Some(batch) = self.buffer.take_ready_batch(batch_size, max_age) else {
                break;
            };
            self.process_batch(batch);
            batches += 1;
        }
        batches
    }

    /// Analyze one batch and persist the resulting advisories
    pub fn process_batch(&self, batch: Vec<LogEntry>) -> BatchReport {
        let entries = batch.len();
        let analysis = self.agents.analyze(batch);
        self.monitor.record_batch(entries, &analysis);

        for failure in &analysis.failures {
            error!("Agent failure during batch: {}", failure);
        }

        let mut advice = analysis.advice;
        self.plan_escalation(&mut advice);

        let emitted = advice.len();
        let persisted = self.persist(advice);

        if emitted > 0 {
            info!(
                "Batch of {} entries produced {} advisories ({} persisted)",
                entries, emitted, persisted
            );
        }

        BatchReport {
            entries,
            advice: emitted,
            persisted,
            agent_failures: analysis.failures.len(),
        }
    }

    /// Delete archived logs and resolved advisories past the retention window
    pub fn run_retention(&self) -> Result<RetentionReport, EngineError> {
        let cutoff = Utc::now() - self.config.retention.window();
        match self.store.purge_older_than(cutoff) {
            Ok(report) => {
                self.monitor.record_retention(true);
                info!(
                    "Retention removed {} log entries and {} resolved advisories older than {}",
                    report.logs_deleted, report.advice_deleted, report.cutoff
                );
                Ok(report)
            }
            Err(e) => {
                self.monitor.record_retention(false);
                error!("Retention failed: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.monitor.snapshot()
    }

    fn plan_escalation(&self, advice: &mut [Advice]) {
        let mut known: HashMap<String, Option<ServiceInfo>> = HashMap::new();

        for item in advice.iter_mut() {
            let mut services = Vec::new();
            for name in &item.affected_services {
                let entry = known.entry(name.clone()).or_insert_with(|| {
                    self.store.get_service(name).unwrap_or_else(|e| {
                        warn!("Service lookup for '{}' failed: {}", name, e);
                        None
                    })
                });
                if let Some(service) = entry {
                    services.push(service.clone());
                }
            }
            item.escalation_path = self.escalation.plan(item.severity, &services);
        }
    }

    /// Upsert each advisory, parking the unwritten ones on the first failure
    fn persist(&self, advice: Vec<Advice>) -> usize {
        if advice.is_empty() {
            return 0;
        }

        let mut written = 0;
        let mut remaining = advice.into_iter();

        while let Some(item) = remaining.next() {
            match self.store.upsert_advice(&item) {
                Ok(outcome) => {
                    written += 1;
                    debug!("Persisted {} ({:?})", item.advice_id, outcome);
                    self.lock_alerts().notify(&item, outcome);
                }
                Err(e) => {
                    error!(
                        "Failed to persist advisory {}: {}; will retry next cycle",
                        item.advice_id, e
                    );
                    let mut pending = self.lock_pending();
                    for parked in std::iter::once(item).chain(remaining) {
                        pending.insert(parked.advice_id.clone(), parked);
                    }
                    self.monitor.record_persist(false);
                    return written;
                }
            }
        }

        self.monitor.record_persist(true);
        written
    }

    fn retry_pending(&self) {
        let parked: Vec<Advice> = self.lock_pending().drain().map(|(_, a)| a).collect();
        if parked.is_empty() {
            return;
        }

        info!("Retrying {} unpersisted advisories", parked.len());
        self.persist(parked);
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, Advice>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_alerts(&self) -> MutexGuard<'_, AlertDispatcher> {
        self.alerts.lock().unwrap_or_else(|p| p.into_inner())
    }
}
