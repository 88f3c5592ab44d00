//! Core event types for the advisory engine
//!
//! This module defines the log entries produced by monitored services, the
//! service registration records used for escalation routing, and the parsing
//! that turns untrusted request bodies into validated entries.

use crate::error::ValidationError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Open extension bag for arbitrary structured fields
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// A single structured log event emitted by a monitored service
///
/// Entries are immutable once validated. They are archived durably and then
/// buffered for analysis by the pattern detection agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// Name of the service that emitted the entry
    pub service_name: String,
    /// When the entry was produced
    pub timestamp: Timestamp,
    /// Severity level reported by the producer
    pub level: LogLevel,
    /// Free-form message text
    pub message: String,
    /// Request-scoped context; agents read typed keys from here
    #[serde(default)]
    pub context: LogContext,
    /// Producer metadata (host, version, ...)
    #[serde(default)]
    pub metadata: Extensions,
}

/// Log level of an entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// ERROR, CRITICAL and FATAL
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical | LogLevel::Fatal)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed request context carried by a log entry
///
/// The few keys agents consume have explicit fields; everything else lands
/// in `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogContext {
    /// Request or operation duration in milliseconds
    #[serde(
        default,
        alias = "response_time_ms",
        alias = "latency_ms",
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

impl LogContext {
    /// Duration in milliseconds, if the producer reported a finite one
    pub fn duration_ms(&self) -> Option<f64> {
        self.duration_ms.filter(|d| d.is_finite())
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// Accept durations sent either as JSON numbers or numeric strings
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(f64),
        Text(String),
    }

    match Option::<Millis>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Millis::Number(n)) => Ok(Some(n)),
        Some(Millis::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid duration '{}'", s))),
    }
}

impl LogEntry {
    /// Create an entry stamped with the current time and empty context
    pub fn new(service_name: &str, level: LogLevel, message: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            context: LogContext::default(),
            metadata: Extensions::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }
}

/// Unvalidated wire form of a log entry
#[derive(Debug, Deserialize)]
struct RawLogEntry {
    service_name: Option<String>,
    timestamp: Option<String>,
    level: Option<String>,
    message: Option<String>,
    #[serde(default)]
    context: Option<LogContext>,
    #[serde(default)]
    metadata: Option<Extensions>,
}

/// Parse an RFC 3339 timestamp, or a zone-less ISO 8601 one interpreted as UTC
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl RawLogEntry {
    fn validate(self, index: usize, now: Timestamp) -> Result<LogEntry, ValidationError> {
        let service_name = self
            .service_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError::MalformedEntry {
                index,
                reason: "missing required field 'service_name'".to_string(),
            })?;

        let message = self.message.ok_or_else(|| ValidationError::MalformedEntry {
            index,
            reason: "missing required field 'message'".to_string(),
        })?;

        let timestamp = match self.timestamp {
            None => now,
            Some(raw) => parse_timestamp(&raw)
                .ok_or(ValidationError::InvalidTimestamp { index, value: raw })?,
        };

        let level = match self.level {
            None => LogLevel::Info,
            Some(raw) => raw
                .parse()
                .map_err(|_| ValidationError::InvalidLevel { index, value: raw })?,
        };

        Ok(LogEntry {
            service_name,
            timestamp,
            level,
            message,
            context: self.context.unwrap_or_default(),
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

/// Parse an ingest request body into validated log entries
///
/// Accepts a single entry object, a JSON array of entries, or an object with
/// an `entries` array. A single malformed entry fails the whole body.
pub fn parse_ingest_payload(body: serde_json::Value) -> Result<Vec<LogEntry>, ValidationError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("entries") {
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => {
                return Err(ValidationError::InvalidBody(
                    "'entries' must be an array".to_string(),
                ))
            }
            None => vec![serde_json::Value::Object(map)],
        },
        _ => {
            return Err(ValidationError::InvalidBody(
                "expected a log entry object or an array of entries".to_string(),
            ))
        }
    };

    if items.is_empty() {
        return Err(ValidationError::InvalidBody("no log entries supplied".to_string()));
    }

    let now = Utc::now();
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let raw: RawLogEntry =
                serde_json::from_value(item).map_err(|e| ValidationError::MalformedEntry {
                    index,
                    reason: e.to_string(),
                })?;
            raw.validate(index, now)
        })
        .collect()
}

/// Registration record for a monitored service
///
/// Only used as contextual metadata for escalation routing; detection works
/// without it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    pub service_name: String,
    pub service_type: String,
    pub port: Option<u16>,
    pub criticality_level: String,
    pub log_sources: Vec<String>,
    pub health_endpoints: Vec<String>,
    pub expected_patterns: Vec<String>,
    pub alert_contacts: Vec<String>,
    pub registration_time: Timestamp,
    pub last_heartbeat: Timestamp,
    pub status: String,
}

impl ServiceInfo {
    pub fn is_critical(&self) -> bool {
        self.criticality_level.eq_ignore_ascii_case("critical")
    }
}

/// Body of a register request; every field except `service_name` is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRegistration {
    pub service_name: Option<String>,
    pub service_type: Option<String>,
    pub port: Option<u16>,
    pub criticality_level: Option<String>,
    #[serde(default)]
    pub log_sources: Vec<String>,
    #[serde(default)]
    pub health_endpoints: Vec<String>,
    #[serde(default)]
    pub expected_patterns: Vec<String>,
    #[serde(default)]
    pub alert_contacts: Vec<String>,
    pub status: Option<String>,
}

impl ServiceRegistration {
    /// Validate and fill defaults
    ///
    /// `registration_time` is set to `now` here; the store keeps the first
    /// registration's value on later upserts.
    pub fn into_service_info(self, now: Timestamp) -> Result<ServiceInfo, ValidationError> {
        let service_name = self
            .service_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError::MissingField("service_name".to_string()))?;

        Ok(ServiceInfo {
            service_name,
            service_type: self.service_type.unwrap_or_else(|| "generic".to_string()),
            port: self.port,
            criticality_level: self
                .criticality_level
                .unwrap_or_else(|| "medium".to_string())
                .to_lowercase(),
            log_sources: self.log_sources,
            health_endpoints: self.health_endpoints,
            expected_patterns: self.expected_patterns,
            alert_contacts: self.alert_contacts,
            registration_time: now,
            last_heartbeat: now,
            status: self.status.unwrap_or_else(|| "active".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_level_parsing_is_case_insensitive() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("FATAL".parse::<LogLevel>().unwrap(), LogLevel::Fatal);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_try_from_string() {
        assert_eq!(LogLevel::try_from("warn".to_string()), Ok(LogLevel::Warn));
        let err = LogLevel::try_from("loud".to_string()).unwrap_err();
        assert!(err.contains("loud"));
    }

    #[test]
    fn test_log_level_serialization() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"WARN\"");
        let level: LogLevel = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(level, LogLevel::Critical);
    }

    #[test]
    fn test_error_levels() {
        assert!(LogLevel::Error.is_error());
        assert!(LogLevel::Critical.is_error());
        assert!(LogLevel::Fatal.is_error());
        assert!(!LogLevel::Warn.is_error());
        assert!(!LogLevel::Info.is_error());
    }

    #[test]
    fn test_context_typed_duration_and_extra_fields() {
        let context: LogContext = serde_json::from_value(json!({
            "response_time_ms": 7000,
            "request_id": "req-1",
            "user": "alice"
        }))
        .unwrap();

        assert_eq!(context.duration_ms(), Some(7000.0));
        assert_eq!(context.request_id.as_deref(), Some("req-1"));
        assert_eq!(context.get("user"), Some(&json!("alice")));
    }

    #[test]
    fn test_context_duration_accepts_numeric_strings() {
        let context: LogContext =
            serde_json::from_value(json!({ "duration_ms": "1250.5" })).unwrap();
        assert_eq!(context.duration_ms(), Some(1250.5));
    }

    #[test]
    fn test_parse_single_entry() {
        let entries = parse_ingest_payload(json!({
            "service_name": "svc",
            "timestamp": "2024-05-01T12:00:00Z",
            "level": "ERROR",
            "message": "connection refused"
        }))
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service_name, "svc");
        assert_eq!(entries[0].level, LogLevel::Error);
    }

    #[test]
    fn test_parse_batch_forms() {
        let entry = json!({"service_name": "svc", "message": "ok", "level": "info"});

        let as_array = parse_ingest_payload(json!([entry.clone(), entry.clone()])).unwrap();
        assert_eq!(as_array.len(), 2);

        let as_object = parse_ingest_payload(json!({ "entries": [entry] })).unwrap();
        assert_eq!(as_object.len(), 1);
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let ts = parse_timestamp("2024-05-01T12:00:00.250").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:00:00.250+00:00");
    }

    #[test]
    fn test_one_bad_timestamp_rejects_batch() {
        let result = parse_ingest_payload(json!([
            {"service_name": "svc", "message": "fine", "timestamp": "2024-05-01T12:00:00Z"},
            {"service_name": "svc", "message": "broken", "timestamp": "not-a-time"}
        ]));

        assert_eq!(
            result.unwrap_err(),
            ValidationError::InvalidTimestamp {
                index: 1,
                value: "not-a-time".to_string()
            }
        );
    }

    #[test]
    fn test_missing_service_name_rejected() {
        let result = parse_ingest_payload(json!({"message": "orphan"}));
        assert!(matches!(
            result,
            Err(ValidationError::MalformedEntry { index: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_level_rejected() {
        let result = parse_ingest_payload(json!({"service_name": "svc", "message": "x", "level": "LOUD"}));
        assert!(matches!(result, Err(ValidationError::InvalidLevel { .. })));
    }

    #[test]
    fn test_missing_level_defaults_to_info() {
        let entries = parse_ingest_payload(json!({"service_name": "svc", "message": "x"})).unwrap();
        assert_eq!(entries[0].level, LogLevel::Info);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(parse_ingest_payload(json!([])).is_err());
        assert!(parse_ingest_payload(json!("text")).is_err());
    }

    #[test]
    fn test_registration_defaults() {
        let now = Utc::now();
        let info = ServiceRegistration {
            service_name: Some("payments".to_string()),
            ..Default::default()
        }
        .into_service_info(now)
        .unwrap();

        assert_eq!(info.service_type, "generic");
        assert_eq!(info.criticality_level, "medium");
        assert_eq!(info.status, "active");
        assert_eq!(info.registration_time, now);
        assert!(!info.is_critical());
    }

    #[test]
    fn test_registration_requires_service_name() {
        let result = ServiceRegistration::default().into_service_info(Utc::now());
        assert_eq!(
            result.unwrap_err(),
            ValidationError::MissingField("service_name".to_string())
        );
    }

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry::new("svc", LogLevel::Warn, "disk usage high")
            .with_context(LogContext::default().with_duration_ms(12.0));

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, deserialized);
    }
}
