use crate::advice::{Advice, Category, Severity};
use crate::alerts::RateLimiter;
use crate::config::AlertsConfig;
use crate::store::UpsertOutcome;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;

/// Operator notification for a newly opened advisory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub advice_id: String,
    pub title: String,
    pub severity: Severity,
    pub category: Category,
    pub affected_services: Vec<String>,
    pub priority_score: f64,
    /// First escalation contact, if a path was planned
    pub contact: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    fn from_advice(advice: &Advice, now: DateTime<Utc>) -> Self {
        Self {
            advice_id: advice.advice_id.clone(),
            title: advice.title.clone(),
            severity: advice.severity,
            category: advice.category,
            affected_services: advice.affected_services.iter().cloned().collect(),
            priority_score: advice.priority_score,
            contact: advice.escalation_path.first().map(|s| s.contact.clone()),
            raised_at: now,
        }
    }
}

/// Where delivered alerts go
pub trait AlertSink: Send {
    fn deliver(&self, alert: &Alert);
}

/// Default sink: one `warn!` line per alert
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&self, alert: &Alert) {
        warn!(
            "ALERT [{} {}] {} (advice_id={}, priority={:.1}, services={}, contact={})",
            alert.severity,
            alert.category,
            alert.title,
            alert.advice_id,
            alert.priority_score,
            alert.affected_services.join(","),
            alert.contact.as_deref().unwrap_or("-")
        );
    }
}

/// Counters exposed through health
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub delivered: u64,
    pub queued: usize,
    pub dropped: u64,
}

/// Rate-limited delivery of alerts for newly opened advisories
///
/// Only advisories that were just inserted, and whose severity
/// reaches `min_severity`, raise an alert. Alerts over the rate limit wait
/// in a bounded queue (oldest dropped first) and go out on later calls to
/// [`tick`](Self::tick).
pub struct AlertDispatcher {
    rate_limiter: RateLimiter,
    queue: VecDeque<Alert>,
    max_queue_size: usize,
    min_severity: Severity,
    sink: Box<dyn AlertSink>,
    delivered: u64,
    dropped: u64,
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(&AlertsConfig::default())
    }
}

impl AlertDispatcher {
    pub fn new(config: &AlertsConfig) -> Self {
        Self::with_sink(config, Box::new(LogAlertSink))
    }

    pub fn with_sink(config: &AlertsConfig, sink: Box<dyn AlertSink>) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config.rate_limit_per_minute),
            queue: VecDeque::new(),
            max_queue_size: config.queue_size,
            min_severity: config.min_severity,
            sink,
            delivered: 0,
            dropped: 0,
        }
    }

    /// Consider a freshly persisted advisory for alerting
    ///
    /// # Returns
    ///
    /// `true` if an alert was delivered or queued
    pub fn notify(&mut self, advice: &Advice, outcome: UpsertOutcome) -> bool {
        self.notify_at(advice, outcome, Utc::now())
    }

    pub fn notify_at(&mut self, advice: &Advice, outcome: UpsertOutcome, now: DateTime<Utc>) -> bool {
        if !outcome.is_newly_open() {
            return false;
        }
        if advice.severity < self.min_severity {
            debug!(
                "Not alerting on {} advisory {}",
                advice.severity, advice.advice_id
            );
            return false;
        }

        // Queued alerts go first so delivery stays in arrival order
        self.tick_at(now);

        let alert = Alert::from_advice(advice, now);
        if self.queue.is_empty() && self.rate_limiter.can_send(now) {
            self.send(&alert, now);
        } else {
            self.enqueue(alert);
        }
        true
    }

    /// Deliver queued alerts while the rate limit allows
    ///
    /// # Returns
    ///
    /// Number of alerts delivered
    pub fn tick(&mut self) -> usize {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut sent = 0;
        while !self.queue.is_empty() && self.rate_limiter.can_send(now) {
            if let Some(alert) = self.queue.pop_front() {
                self.send(&alert, now);
                sent += 1;
            }
        }
        sent
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            delivered: self.delivered,
            queued: self.queue.len(),
            dropped: self.dropped,
        }
    }

    fn send(&mut self, alert: &Alert, now: DateTime<Utc>) {
        self.sink.deliver(alert);
        self.rate_limiter.record(now);
        self.delivered += 1;
    }

    fn enqueue(&mut self, alert: Alert) {
        if self.max_queue_size == 0 {
            self.dropped += 1;
            warn!("Alert queue disabled, dropping alert for {}", alert.advice_id);
            return;
        }
        if self.queue.len() >= self.max_queue_size {
            if let Some(oldest) = self.queue.pop_front() {
                self.dropped += 1;
                warn!(
                    "Alert queue full, dropping oldest alert for {}",
                    oldest.advice_id
                );
            }
        }
        info!("Rate limited, queued alert for {}", alert.advice_id);
        self.queue.push_back(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Alert>>>);

    impl AlertSink for RecordingSink {
        fn deliver(&self, alert: &Alert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    fn dispatcher(rate: usize, queue: usize) -> (AlertDispatcher, RecordingSink) {
        let sink = RecordingSink::default();
        let config = AlertsConfig {
            rate_limit_per_minute: rate,
            queue_size: queue,
            min_severity: Severity::High,
        };
        (
            AlertDispatcher::with_sink(&config, Box::new(sink.clone())),
            sink,
        )
    }

    fn advice(key: &str, severity: Severity) -> Advice {
        Advice::new(&[key], key.to_string(), severity, Category::Error)
    }

    #[test]
    fn test_only_new_high_severity_advice_alerts() {
        let (mut d, sink) = dispatcher(10, 10);
        let now = Utc::now();

        assert!(!d.notify_at(&advice("m", Severity::Medium), UpsertOutcome::Inserted, now));
        assert!(!d.notify_at(&advice("h", Severity::High), UpsertOutcome::Updated, now));
        assert!(d.notify_at(&advice("h", Severity::High), UpsertOutcome::Inserted, now));
        assert!(!d.notify_at(&advice("c", Severity::Critical), UpsertOutcome::Resolved, now));

        let delivered = sink.0.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].advice_id, advice("h", Severity::High).advice_id);
    }

    #[test]
    fn test_rate_limited_alerts_wait_for_tick() {
        let (mut d, sink) = dispatcher(2, 10);
        let now = Utc::now();

        for key in ["a", "b", "c", "d"] {
            d.notify_at(&advice(key, Severity::Critical), UpsertOutcome::Inserted, now);
        }
        assert_eq!(d.stats().delivered, 2);
        assert_eq!(d.stats().queued, 2);

        assert_eq!(d.tick_at(now + Duration::seconds(30)), 0);
        assert_eq!(d.tick_at(now + Duration::seconds(61)), 2);

        let titles: Vec<String> = sink.0.lock().unwrap().iter().map(|a| a.title.clone()).collect();
        assert_eq!(titles, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let (mut d, sink) = dispatcher(1, 2);
        let now = Utc::now();

        for key in ["a", "b", "c", "d"] {
            d.notify_at(&advice(key, Severity::High), UpsertOutcome::Inserted, now);
        }
        assert_eq!(d.stats(), AlertStats { delivered: 1, queued: 2, dropped: 1 });

        d.tick_at(now + Duration::minutes(2));
        d.tick_at(now + Duration::minutes(4));
        let titles: Vec<String> = sink.0.lock().unwrap().iter().map(|a| a.title.clone()).collect();
        assert_eq!(titles, vec!["a", "c", "d"]);
    }
}
