use crate::advice::{Category, Remediation, Severity};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration, loaded from TOML
///
/// Every section has defaults, so an empty file (or no file) yields a
/// working configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub processing: ProcessingConfig,
    pub retention: RetentionConfig,
    pub agents: AgentsConfig,
    pub scoring: ScoringConfig,
    pub escalation: EscalationConfig,
    pub alerts: AlertsConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

/// Ingestion buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of unanalyzed entries held in memory
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Background processing loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    /// Drain a partial batch once its oldest entry has waited this long
    ///
    /// A value beyond any real lull (e.g. one year, `31536000`) keeps
    /// partial batches queued until `batch_size` entries have arrived.
    pub max_batch_age_secs: u64,
    /// Per-agent execution budget for one batch
    pub agent_timeout_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_secs: 5,
            max_batch_age_secs: 60,
            agent_timeout_ms: 2_000,
        }
    }
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_batch_age(&self) -> Duration {
        Duration::from_secs(self.max_batch_age_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

/// Retention job settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub window_days: u32,
    pub interval_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            interval_hours: 24,
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.window_days))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }
}

/// Settings for the built-in detection agents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    pub error: ErrorAgentConfig,
    pub performance: PerformanceAgentConfig,
}

/// Criticality class of a fault signature
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignatureClass {
    Critical,
    Standard,
}

/// One entry of the fault signature table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignatureDefinition {
    pub name: String,
    /// Case-insensitive substrings; any one of them matches
    pub keywords: Vec<String>,
    pub class: SignatureClass,
    #[serde(default = "default_signature_category")]
    pub category: Category,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub resolution_steps: Vec<String>,
    #[serde(default)]
    pub prevention: String,
    #[serde(default)]
    pub remediation: Option<Remediation>,
}

fn default_signature_category() -> Category {
    Category::Error
}

impl SignatureDefinition {
    fn builtin(
        name: &str,
        keywords: &[&str],
        class: SignatureClass,
        category: Category,
        root_cause: &str,
        resolution_steps: &[&str],
        prevention: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            class,
            category,
            root_cause: root_cause.to_string(),
            resolution_steps: resolution_steps.iter().map(|s| s.to_string()).collect(),
            prevention: prevention.to_string(),
            remediation: None,
        }
    }

    fn with_remediation(mut self, action: &str, description: &str) -> Self {
        self.remediation = Some(Remediation {
            action: action.to_string(),
            description: description.to_string(),
            requires_approval: true,
        });
        self
    }

    /// The built-in signature library
    pub fn defaults() -> Vec<Self> {
        use SignatureClass::{Critical, Standard};

        vec![
            Self::builtin(
                "connection_failure",
                &[
                    "connection refused",
                    "connection reset",
                    "connection timed out",
                    "connection timeout",
                    "failed to connect",
                    "could not connect",
                    "econnrefused",
                ],
                Critical,
                Category::Error,
                "A downstream dependency is refusing or dropping connections. The dependency is down, overloaded, or its connection limits are exhausted.",
                &[
                    "Check that the dependency is running and listening on the expected port",
                    "Inspect the dependency's connection pool and accept backlog",
                    "Verify recent configuration changes to host names and ports",
                ],
                "Add connection retries with backoff and a circuit breaker around the dependency.",
            )
            .with_remediation("restart_dependency", "Restart the unreachable dependency"),
            Self::builtin(
                "storage_error",
                &[
                    "database error",
                    "deadlock",
                    "disk i/o error",
                    "disk full",
                    "no space left",
                    "storage error",
                    "database is locked",
                    "write failed",
                ],
                Critical,
                Category::Error,
                "The storage layer is failing reads or writes, risking data loss or corruption.",
                &[
                    "Check free disk space and inode usage on the storage host",
                    "Review database logs for lock contention or corruption",
                    "Fail over to a replica if the primary is unhealthy",
                ],
                "Alert on disk usage trends and run regular integrity checks and backups.",
            ),
            Self::builtin(
                "out_of_memory",
                &[
                    "out of memory",
                    "outofmemory",
                    "memoryerror",
                    "cannot allocate memory",
                    "oom-kill",
                    "oom killer",
                    "heap space",
                ],
                Critical,
                Category::Error,
                "The process exhausted its memory budget and is being killed or failing allocations.",
                &[
                    "Inspect memory usage and recent allocation growth of the service",
                    "Look for unbounded caches, queues, or leaked handles",
                    "Raise the memory limit temporarily if the workload grew legitimately",
                ],
                "Bound in-memory caches and queues and add memory usage alerts below the hard limit.",
            )
            .with_remediation("restart_service", "Restart the service to reclaim memory"),
            Self::builtin(
                "null_dereference",
                &[
                    "null pointer",
                    "nullpointerexception",
                    "nonetype",
                    "nil pointer",
                    "undefined is not",
                    "segmentation fault",
                ],
                Critical,
                Category::Error,
                "Code is dereferencing a missing value, usually after unexpected input or a failed lookup.",
                &[
                    "Find the failing code path from the stack trace in the evidence",
                    "Check recent deployments for the affected service",
                    "Add validation for the missing value and redeploy",
                ],
                "Validate inputs at boundaries and cover missing-value paths in tests.",
            ),
            Self::builtin(
                "auth_failure",
                &[
                    "authentication failed",
                    "invalid credentials",
                    "unauthorized",
                    "invalid api key",
                    "token expired",
                    "invalid token",
                ],
                Standard,
                Category::Security,
                "Requests are failing authentication, either from expired credentials or from unauthorized clients.",
                &[
                    "Check expiry of the service's API keys and tokens",
                    "Rotate credentials if they may have leaked",
                    "Review the source of the failing requests",
                ],
                "Automate credential rotation and alert ahead of expiry.",
            ),
            Self::builtin(
                "permission_denied",
                &["permission denied", "access denied", "forbidden", "eacces"],
                Standard,
                Category::Security,
                "The service lacks permission for a resource it needs.",
                &[
                    "Check file, database, or API permissions for the service account",
                    "Review recent policy or role changes",
                ],
                "Manage permissions as code and test them in staging.",
            ),
            Self::builtin(
                "missing_resource",
                &["not found", "no such file", "does not exist", "enoent"],
                Standard,
                Category::Error,
                "A resource the service expects is absent: a file, table, endpoint, or record.",
                &[
                    "Identify the missing resource from the evidence messages",
                    "Check deployment artifacts and migrations for the resource",
                ],
                "Verify required resources at startup instead of at first use.",
            ),
            Self::builtin(
                "network_unreachable",
                &[
                    "network is unreachable",
                    "network unreachable",
                    "no route to host",
                    "host unreachable",
                    "name resolution",
                    "name or service not known",
                ],
                Standard,
                Category::Error,
                "The service cannot reach the network destination; routing, DNS, or firewall rules are failing.",
                &[
                    "Check DNS resolution and routes from the affected host",
                    "Review firewall and security group changes",
                ],
                "Monitor DNS and network reachability from each deployment zone.",
            ),
            Self::builtin(
                "handshake_failure",
                &[
                    "handshake failed",
                    "handshake failure",
                    "ssl error",
                    "tls error",
                    "certificate verify failed",
                    "certificate has expired",
                ],
                Standard,
                Category::Error,
                "TLS negotiation is failing, typically from expired or mismatched certificates or protocol versions.",
                &[
                    "Check certificate validity and chain on both endpoints",
                    "Compare supported TLS versions and cipher suites",
                ],
                "Track certificate expiry and renew automatically.",
            ),
        ]
    }
}

/// ErrorAgent settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorAgentConfig {
    /// Minimum group size before a signature group yields an advisory
    pub pattern_threshold: usize,
    /// Minimum derived confidence before a group yields an advisory
    pub confidence_threshold: f64,
    /// Maximum number of entries kept as evidence
    pub evidence_limit: usize,
    pub signatures: Vec<SignatureDefinition>,
}

impl Default for ErrorAgentConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 5,
            confidence_threshold: 0.7,
            evidence_limit: 5,
            signatures: SignatureDefinition::defaults(),
        }
    }
}

/// PerformanceAgent settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceAgentConfig {
    pub response_time_threshold_ms: f64,
    pub resource_keywords: Vec<String>,
    pub evidence_limit: usize,
}

impl Default for PerformanceAgentConfig {
    fn default() -> Self {
        Self {
            response_time_threshold_ms: 5_000.0,
            resource_keywords: [
                "memory usage",
                "cpu usage",
                "high cpu",
                "high memory",
                "disk usage",
                "thread pool",
                "connection pool",
                "queue full",
                "resource exhausted",
                "quota exceeded",
                "throttl",
                "gc pause",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            evidence_limit: 5,
        }
    }
}

/// Severity weights for one category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityWeights {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl SeverityWeights {
    fn new(critical: f64, high: f64, medium: f64, low: f64) -> Self {
        Self {
            critical,
            high,
            medium,
            low,
        }
    }

    pub fn get(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    fn values(&self) -> [f64; 4] {
        [self.critical, self.high, self.medium, self.low]
    }
}

/// Per-category severity weight tables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CategoryWeights {
    pub error: SeverityWeights,
    pub performance: SeverityWeights,
    pub security: SeverityWeights,
    pub compliance: SeverityWeights,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            error: SeverityWeights::new(70.0, 50.0, 30.0, 15.0),
            performance: SeverityWeights::new(60.0, 42.0, 25.0, 10.0),
            security: SeverityWeights::new(75.0, 55.0, 35.0, 20.0),
            compliance: SeverityWeights::new(65.0, 45.0, 28.0, 12.0),
        }
    }
}

impl CategoryWeights {
    pub fn for_category(&self, category: Category) -> &SeverityWeights {
        match category {
            Category::Error => &self.error,
            Category::Performance => &self.performance,
            Category::Security => &self.security,
            Category::Compliance => &self.compliance,
        }
    }
}

/// Priority scoring settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Score added per contributing occurrence
    pub frequency_rate: f64,
    /// Upper bound of the frequency contribution
    pub frequency_cap: f64,
    pub weights: CategoryWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            frequency_rate: 1.0,
            frequency_cap: 30.0,
            weights: CategoryWeights::default(),
        }
    }
}

/// Escalation routing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscalationConfig {
    /// Level-1 contact when no affected service lists its own contacts
    pub default_contact: String,
    pub team_contact: String,
    pub management_contact: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            default_contact: "operations".to_string(),
            team_contact: "on-call-engineering".to_string(),
            management_contact: "engineering-management".to_string(),
        }
    }
}

/// Operator alert settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub rate_limit_per_minute: usize,
    pub queue_size: usize,
    /// Lowest severity that raises an operator alert
    pub min_severity: Severity,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 3,
            queue_size: 100,
            min_severity: Severity::High,
        }
    }
}

/// Persistent store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("advisor.db"),
        }
    }
}

/// HTTP boundary settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::ValidationError(msg.into()))
        }

        if self.buffer.capacity == 0 {
            return invalid("buffer.capacity must be greater than 0");
        }
        if self.processing.batch_size == 0 {
            return invalid("processing.batch_size must be greater than 0");
        }
        if self.processing.batch_size > self.buffer.capacity {
            return invalid("processing.batch_size cannot exceed buffer.capacity");
        }
        if self.processing.poll_interval_secs == 0 {
            return invalid("processing.poll_interval_secs must be greater than 0");
        }
        if self.processing.agent_timeout_ms == 0 {
            return invalid("processing.agent_timeout_ms must be greater than 0");
        }
        if self.retention.window_days == 0 || self.retention.interval_hours == 0 {
            return invalid("retention.window_days and retention.interval_hours must be greater than 0");
        }

        let error = &self.agents.error;
        if error.pattern_threshold == 0 {
            return invalid("agents.error.pattern_threshold must be at least 1");
        }
        if !(0.0..=1.0).contains(&error.confidence_threshold) {
            return invalid("agents.error.confidence_threshold must be within [0, 1]");
        }
        if error.evidence_limit == 0 || self.agents.performance.evidence_limit == 0 {
            return invalid("evidence_limit must be at least 1");
        }
        if error.signatures.is_empty() {
            return invalid("agents.error.signatures cannot be empty");
        }
        let mut names = HashSet::new();
        for signature in &error.signatures {
            if !names.insert(signature.name.as_str()) {
                return invalid(format!("duplicate signature '{}'", signature.name));
            }
            if signature.keywords.iter().all(|k| k.trim().is_empty()) {
                return invalid(format!("signature '{}' has no keywords", signature.name));
            }
        }

        let threshold = self.agents.performance.response_time_threshold_ms;
        if !threshold.is_finite() || threshold <= 0.0 {
            return invalid("agents.performance.response_time_threshold_ms must be positive");
        }

        let scoring = &self.scoring;
        if !scoring.frequency_rate.is_finite() || scoring.frequency_rate < 0.0 {
            return invalid("scoring.frequency_rate must be non-negative");
        }
        if !(0.0..=100.0).contains(&scoring.frequency_cap) {
            return invalid("scoring.frequency_cap must be within [0, 100]");
        }
        let w = &scoring.weights;
        for table in [&w.error, &w.performance, &w.security, &w.compliance] {
            if table.values().iter().any(|v| !(0.0..=100.0).contains(v)) {
                return invalid("scoring weights must be within [0, 100]");
            }
        }

        if self.alerts.rate_limit_per_minute == 0 {
            return invalid("alerts.rate_limit_per_minute must be greater than 0");
        }
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return invalid(format!("server.bind '{}' is not a socket address", self.server.bind));
        }

        Ok(())
    }
}
