//! Self-monitoring for the processing pipeline
//!
//! Counters are updated by the background worker and read by the health
//! endpoint, so everything here is lock-free except the short latency
//! window.

use crate::agents::BatchAnalysis;
use crate::error::AgentError;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Number of recent batches the latency mean is computed over
const LATENCY_WINDOW: usize = 100;

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub batches_processed: u64,
    pub entries_analyzed: u64,
    pub advice_emitted: u64,
    pub agent_failures: u64,
    pub agent_timeouts: u64,
    pub persist_failures: u64,
    /// `None` until the first persist attempt
    pub last_persist_ok: Option<bool>,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub retention_runs: u64,
    pub retention_failures: u64,
    /// Mean analysis latency over the last 100 batches
    pub mean_analysis_latency_ms: f64,
}

#[derive(Debug, Default)]
struct LastCycle {
    persist_ok: Option<bool>,
    batch_at: Option<DateTime<Utc>>,
}

/// Collects pipeline counters for the health report
#[derive(Debug, Default)]
pub struct PipelineMonitor {
    batches_processed: AtomicU64,
    entries_analyzed: AtomicU64,
    advice_emitted: AtomicU64,
    agent_failures: AtomicU64,
    agent_timeouts: AtomicU64,
    persist_failures: AtomicU64,
    retention_runs: AtomicU64,
    retention_failures: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
    last: Mutex<LastCycle>,
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one analyzed batch of `entries` log entries
    pub fn record_batch(&self, entries: usize, analysis: &BatchAnalysis) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.entries_analyzed
            .fetch_add(entries as u64, Ordering::Relaxed);
        self.advice_emitted
            .fetch_add(analysis.advice.len() as u64, Ordering::Relaxed);

        for failure in &analysis.failures {
            match failure {
                AgentError::Timeout { .. } => self.agent_timeouts.fetch_add(1, Ordering::Relaxed),
                _ => self.agent_failures.fetch_add(1, Ordering::Relaxed),
            };
        }

        {
            let mut latencies = self.latencies.lock().unwrap_or_else(|p| p.into_inner());
            latencies.push_back(analysis.elapsed);
            while latencies.len() > LATENCY_WINDOW {
                latencies.pop_front();
            }
        }

        self.last.lock().unwrap_or_else(|p| p.into_inner()).batch_at = Some(Utc::now());
        debug!(
            "Batch of {} entries analyzed in {:?}",
            entries, analysis.elapsed
        );
    }

    /// Record the outcome of persisting one cycle's advisories
    pub fn record_persist(&self, ok: bool) {
        if !ok {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last.lock().unwrap_or_else(|p| p.into_inner()).persist_ok = Some(ok);
    }

    pub fn record_retention(&self, ok: bool) {
        self.retention_runs.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.retention_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether the most recent persist attempt failed
    pub fn last_persist_failed(&self) -> bool {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).persist_ok == Some(false)
    }

    pub fn snapshot(&self) -> PipelineMetrics {
        let mean_analysis_latency_ms = {
            let latencies = self.latencies.lock().unwrap_or_else(|p| p.into_inner());
            if latencies.is_empty() {
                0.0
            } else {
                let total: Duration = latencies.iter().sum();
                total.as_secs_f64() * 1000.0 / latencies.len() as f64
            }
        };
        let last = self.last.lock().unwrap_or_else(|p| p.into_inner());

        PipelineMetrics {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            entries_analyzed: self.entries_analyzed.load(Ordering::Relaxed),
            advice_emitted: self.advice_emitted.load(Ordering::Relaxed),
            agent_failures: self.agent_failures.load(Ordering::Relaxed),
            agent_timeouts: self.agent_timeouts.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            last_persist_ok: last.persist_ok,
            last_batch_at: last.batch_at,
            retention_runs: self.retention_runs.load(Ordering::Relaxed),
            retention_failures: self.retention_failures.load(Ordering::Relaxed),
            mean_analysis_latency_ms,
        }
    }
}
