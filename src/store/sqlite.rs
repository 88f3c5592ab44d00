use crate::advice::{Advice, AdviceStatus};
use crate::error::StoreError;
use crate::events::{LogEntry, ServiceInfo, Timestamp};
use crate::store::{
    empty_buckets, AdviceStore, DashboardStats, ResolveOutcome, RetentionReport, UpsertOutcome,
};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS services (
        service_name      TEXT PRIMARY KEY,
        service_type      TEXT NOT NULL,
        port              INTEGER,
        criticality_level TEXT NOT NULL,
        log_sources       TEXT NOT NULL,
        health_endpoints  TEXT NOT NULL,
        expected_patterns TEXT NOT NULL,
        alert_contacts    TEXT NOT NULL,
        registration_time TEXT NOT NULL,
        last_heartbeat    TEXT NOT NULL,
        status            TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS log_entries (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        service_name TEXT NOT NULL,
        timestamp    TEXT NOT NULL,
        level        TEXT NOT NULL,
        message      TEXT NOT NULL,
        context      TEXT NOT NULL,
        metadata     TEXT NOT NULL,
        archived_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_log_service_time ON log_entries(service_name, timestamp);
    CREATE INDEX IF NOT EXISTS idx_log_time ON log_entries(timestamp);

    CREATE TABLE IF NOT EXISTS advice (
        advice_id      TEXT PRIMARY KEY,
        severity       TEXT NOT NULL,
        category       TEXT NOT NULL,
        priority_score REAL NOT NULL,
        status         TEXT NOT NULL,
        body           TEXT NOT NULL,
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL,
        resolved_at    TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_advice_priority ON advice(priority_score DESC);
    CREATE INDEX IF NOT EXISTS idx_advice_status ON advice(status);
";

/// SQLite-backed [`AdviceStore`]
///
/// A single connection in WAL mode, guarded by a mutex that is held for one
/// statement or transaction at a time.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the file cannot
    /// be opened, or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening advisory store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn corrupt(table: &str, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    fn service_from_row(row: &Row<'_>) -> Result<ServiceInfo, StoreError> {
        let list = |idx: usize| -> Result<Vec<String>, StoreError> {
            let raw: String = row.get(idx)?;
            Ok(serde_json::from_str(&raw)?)
        };

        Ok(ServiceInfo {
            service_name: row.get(0)?,
            service_type: row.get(1)?,
            port: row.get(2)?,
            criticality_level: row.get(3)?,
            log_sources: list(4)?,
            health_endpoints: list(5)?,
            expected_patterns: list(6)?,
            alert_contacts: list(7)?,
            registration_time: row.get(8)?,
            last_heartbeat: row.get(9)?,
            status: row.get(10)?,
        })
    }

    /// Rebuild an advisory from its JSON body, with lifecycle columns taking
    /// precedence over whatever the body recorded.
    fn advice_from_row(row: &Row<'_>) -> Result<Advice, StoreError> {
        let body: String = row.get(0)?;
        let status: String = row.get(1)?;

        let mut advice: Advice = serde_json::from_str(&body)?;
        advice.status = status
            .parse()
            .map_err(|e: String| Self::corrupt("advice", e))?;
        advice.created_at = row.get(2)?;
        advice.updated_at = row.get(3)?;
        advice.resolved_at = row.get(4)?;
        Ok(advice)
    }

    fn count(conn: &Connection, sql: &str) -> Result<u64, StoreError> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

impl AdviceStore for SqliteStore {
    fn upsert_service(&self, service: &ServiceInfo) -> Result<ServiceInfo, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO services (
                service_name, service_type, port, criticality_level, log_sources,
                health_endpoints, expected_patterns, alert_contacts,
                registration_time, last_heartbeat, status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(service_name) DO UPDATE SET
                service_type = excluded.service_type,
                port = excluded.port,
                criticality_level = excluded.criticality_level,
                log_sources = excluded.log_sources,
                health_endpoints = excluded.health_endpoints,
                expected_patterns = excluded.expected_patterns,
                alert_contacts = excluded.alert_contacts,
                last_heartbeat = excluded.last_heartbeat,
                status = excluded.status",
            params![
                service.service_name,
                service.service_type,
                service.port,
                service.criticality_level,
                serde_json::to_string(&service.log_sources)?,
                serde_json::to_string(&service.health_endpoints)?,
                serde_json::to_string(&service.expected_patterns)?,
                serde_json::to_string(&service.alert_contacts)?,
                service.registration_time,
                service.last_heartbeat,
                service.status,
            ],
        )?;

        let mut stmt = conn.prepare("SELECT * FROM services WHERE service_name = ?1")?;
        let mut rows = stmt.query(params![service.service_name])?;
        let stored = match rows.next()? {
            Some(row) => Self::service_from_row(row)?,
            None => return Err(Self::corrupt("services", "row vanished after upsert")),
        };
        Ok(stored)
    }

    fn get_service(&self, service_name: &str) -> Result<Option<ServiceInfo>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM services WHERE service_name = ?1")?;
        let mut rows = stmt.query(params![service_name])?;
        let service = rows.next()?.map(Self::service_from_row).transpose()?;
        Ok(service)
    }

    fn archive_logs(&self, entries: &[LogEntry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let archived_at = chrono::Utc::now();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO log_entries
                    (service_name, timestamp, level, message, context, metadata, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.service_name,
                    entry.timestamp,
                    entry.level.as_str(),
                    entry.message,
                    serde_json::to_string(&entry.context)?,
                    serde_json::to_string(&entry.metadata)?,
                    archived_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Archived {} log entries", entries.len());
        Ok(entries.len())
    }

    fn upsert_advice(&self, advice: &Advice) -> Result<UpsertOutcome, StoreError> {
        let body = serde_json::to_string(advice)?;
        let now = chrono::Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT status FROM advice WHERE advice_id = ?1",
                params![advice.advice_id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match previous {
            None => {
                tx.execute(
                    "INSERT INTO advice (
                        advice_id, severity, category, priority_score, status,
                        body, created_at, updated_at, resolved_at
                     ) VALUES (?1, ?2, ?3, ?4, 'OPEN', ?5, ?6, ?7, NULL)",
                    params![
                        advice.advice_id,
                        advice.severity.as_str(),
                        advice.category.as_str(),
                        advice.priority_score,
                        body,
                        advice.created_at,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some(status) => {
                // RESOLVED is terminal; only the analysis is refreshed
                tx.execute(
                    "UPDATE advice SET
                        severity = ?2, category = ?3, priority_score = ?4,
                        body = ?5, updated_at = ?6
                     WHERE advice_id = ?1",
                    params![
                        advice.advice_id,
                        advice.severity.as_str(),
                        advice.category.as_str(),
                        advice.priority_score,
                        body,
                        now,
                    ],
                )?;
                if status == AdviceStatus::Resolved.as_str() {
                    UpsertOutcome::Resolved
                } else {
                    UpsertOutcome::Updated
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_advice(&self, advice_id: &str) -> Result<Option<Advice>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body, status, created_at, updated_at, resolved_at
             FROM advice WHERE advice_id = ?1",
        )?;
        let mut rows = stmt.query(params![advice_id])?;
        let advice = rows.next()?.map(Self::advice_from_row).transpose()?;
        Ok(advice)
    }

    fn list_advice(&self, status: AdviceStatus, limit: usize) -> Result<Vec<Advice>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body, status, created_at, updated_at, resolved_at
             FROM advice WHERE status = ?1
             ORDER BY priority_score DESC, updated_at DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![status.as_str(), limit])?;

        let mut advice = Vec::new();
        while let Some(row) = rows.next()? {
            advice.push(Self::advice_from_row(row)?);
        }
        Ok(advice)
    }

    fn resolve_advice(&self, advice_id: &str, at: Timestamp) -> Result<ResolveOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE advice SET status = 'RESOLVED', resolved_at = ?2, updated_at = ?2
             WHERE advice_id = ?1 AND status = 'OPEN'",
            params![advice_id, at],
        )? > 0;

        let resolved_at: Option<Timestamp> = tx
            .query_row(
                "SELECT resolved_at FROM advice WHERE advice_id = ?1",
                params![advice_id],
                |row| row.get::<_, Option<Timestamp>>(0),
            )
            .optional()?
            .flatten();

        tx.commit()?;

        Ok(ResolveOutcome {
            advice_id: advice_id.to_string(),
            status: AdviceStatus::Resolved,
            resolved_at,
            changed,
        })
    }

    fn dashboard(&self) -> Result<DashboardStats, StoreError> {
        let conn = self.lock()?;
        let (mut by_status, mut open_by_severity) = empty_buckets();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM advice GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            by_status.insert(status, count.max(0) as u64);
        }

        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM advice WHERE status = 'OPEN' GROUP BY severity",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let severity: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            open_by_severity.insert(severity, count.max(0) as u64);
        }

        let average_open_priority: Option<f64> = conn.query_row(
            "SELECT AVG(priority_score) FROM advice WHERE status = 'OPEN'",
            [],
            |row| row.get(0),
        )?;

        Ok(DashboardStats {
            total_advice: by_status.values().sum(),
            by_status,
            open_by_severity,
            average_open_priority: average_open_priority.unwrap_or(0.0),
            archived_logs: Self::count(&conn, "SELECT COUNT(*) FROM log_entries")?,
            registered_services: Self::count(&conn, "SELECT COUNT(*) FROM services")?,
        })
    }

    fn purge_older_than(&self, cutoff: Timestamp) -> Result<RetentionReport, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let logs_deleted = tx.execute(
            "DELETE FROM log_entries WHERE timestamp < ?1",
            params![cutoff],
        )?;
        let advice_deleted = tx.execute(
            "DELETE FROM advice WHERE status = 'RESOLVED' AND resolved_at < ?1",
            params![cutoff],
        )?;

        tx.commit()?;

        Ok(RetentionReport {
            cutoff,
            logs_deleted,
            advice_deleted,
        })
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{Category, Severity};
    use crate::events::{LogLevel, ServiceRegistration};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn registration(name: &str, criticality: &str) -> ServiceInfo {
        ServiceRegistration {
            service_name: Some(name.to_string()),
            criticality_level: Some(criticality.to_string()),
            alert_contacts: vec!["oncall@example.com".to_string()],
            ..Default::default()
        }
        .into_service_info(Utc::now())
        .unwrap()
    }

    fn advice(key: &str, severity: Severity, score: f64) -> Advice {
        let mut advice = Advice::new(&[key], format!("advice {}", key), severity, Category::Error);
        advice.priority_score = score;
        advice.affected_services.insert("svc".to_string());
        advice
    }

    #[test]
    fn test_open_on_disk_creates_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("advisor.db");

        let store = SqliteStore::open(&path).unwrap();
        store.ping().unwrap();
        assert!(path.exists());

        drop(store);
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.dashboard().unwrap().total_advice, 0);
    }

    #[test]
    fn test_second_registration_overwrites_but_keeps_registration_time() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store.upsert_service(&registration("service-C", "low")).unwrap();
        let mut second = registration("service-C", "critical");
        second.registration_time = first.registration_time + Duration::hours(1);
        let stored = store.upsert_service(&second).unwrap();

        assert_eq!(stored.criticality_level, "critical");
        assert_eq!(stored.registration_time, first.registration_time);
        assert_eq!(store.dashboard().unwrap().registered_services, 1);

        let fetched = store.get_service("service-C").unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert!(store.get_service("missing").unwrap().is_none());
    }

    #[test]
    fn test_archive_counts_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entries: Vec<LogEntry> = (0..3)
            .map(|i| LogEntry::new("svc", LogLevel::Info, &format!("line {}", i)))
            .collect();

        assert_eq!(store.archive_logs(&entries).unwrap(), 3);
        assert_eq!(store.archive_logs(&[]).unwrap(), 0);
        assert_eq!(store.dashboard().unwrap().archived_logs, 3);
    }

    #[test]
    fn test_upsert_is_keyed_by_advice_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = advice("a", Severity::Medium, 40.0);

        assert_eq!(store.upsert_advice(&original).unwrap(), UpsertOutcome::Inserted);

        let mut refreshed = advice("a", Severity::High, 60.0);
        refreshed.created_at = original.created_at + Duration::minutes(5);
        assert_eq!(store.upsert_advice(&refreshed).unwrap(), UpsertOutcome::Updated);

        let stored = store.get_advice(&original.advice_id).unwrap().unwrap();
        assert_eq!(stored.severity, Severity::High);
        assert_eq!(stored.created_at, original.created_at);
        assert_eq!(store.dashboard().unwrap().total_advice, 1);
    }

    #[test]
    fn test_list_orders_by_priority_and_filters_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (key, score) in [("low", 10.0), ("high", 90.0), ("mid", 50.0)] {
            store.upsert_advice(&advice(key, Severity::Medium, score)).unwrap();
        }
        let mid_id = advice("mid", Severity::Medium, 0.0).advice_id;
        store.resolve_advice(&mid_id, Utc::now()).unwrap();

        let open = store.list_advice(AdviceStatus::Open, 10).unwrap();
        let scores: Vec<f64> = open.iter().map(|a| a.priority_score).collect();
        assert_eq!(scores, vec![90.0, 10.0]);

        let resolved = store.list_advice(AdviceStatus::Resolved, 10).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].status, AdviceStatus::Resolved);

        assert_eq!(store.list_advice(AdviceStatus::Open, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_twice_keeps_first_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = advice("a", Severity::High, 70.0);
        store.upsert_advice(&a).unwrap();

        let first_at = Utc::now();
        let first = store.resolve_advice(&a.advice_id, first_at).unwrap();
        let second = store
            .resolve_advice(&a.advice_id, first_at + Duration::minutes(10))
            .unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.status, AdviceStatus::Resolved);
        assert_eq!(second.resolved_at, first.resolved_at);
    }

    #[test]
    fn test_resolve_unknown_id_succeeds() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = store.resolve_advice("adv-does-not-exist", Utc::now()).unwrap();

        assert_eq!(outcome.status, AdviceStatus::Resolved);
        assert!(!outcome.changed);
        assert!(outcome.resolved_at.is_none());
    }

    #[test]
    fn test_redetection_keeps_resolved_advice_resolved() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut a = advice("a", Severity::High, 70.0);
        store.upsert_advice(&a).unwrap();
        let resolved = store.resolve_advice(&a.advice_id, Utc::now()).unwrap();

        a.priority_score = 90.0;
        assert_eq!(store.upsert_advice(&a).unwrap(), UpsertOutcome::Resolved);

        let stored = store.get_advice(&a.advice_id).unwrap().unwrap();
        assert_eq!(stored.status, AdviceStatus::Resolved);
        assert_eq!(stored.resolved_at, resolved.resolved_at);
        assert_eq!(stored.priority_score, 90.0);
        assert!(store.list_advice(AdviceStatus::Open, 10).unwrap().is_empty());
    }

    #[test]
    fn test_dashboard_counts_sum_to_total() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_advice(&advice("a", Severity::Critical, 80.0)).unwrap();
        store.upsert_advice(&advice("b", Severity::Low, 20.0)).unwrap();
        let c = advice("c", Severity::High, 60.0);
        store.upsert_advice(&c).unwrap();
        store.resolve_advice(&c.advice_id, Utc::now()).unwrap();

        let stats = store.dashboard().unwrap();
        assert_eq!(stats.total_advice, 3);
        assert_eq!(stats.by_status.values().sum::<u64>(), stats.total_advice);
        assert_eq!(stats.by_status["OPEN"], 2);
        assert_eq!(stats.open_by_severity["CRITICAL"], 1);
        assert_eq!(stats.open_by_severity["HIGH"], 0);
        assert!((stats.average_open_priority - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_retention_spares_open_advice() {
        let store = SqliteStore::open_in_memory().unwrap();
        let old = Utc::now() - Duration::days(120);

        let entries = vec![
            LogEntry::new("svc", LogLevel::Info, "ancient").with_timestamp(old),
            LogEntry::new("svc", LogLevel::Info, "fresh"),
        ];
        store.archive_logs(&entries).unwrap();

        let open = advice("open", Severity::Low, 10.0);
        let closed = advice("closed", Severity::Low, 10.0);
        store.upsert_advice(&open).unwrap();
        store.upsert_advice(&closed).unwrap();
        store.resolve_advice(&closed.advice_id, old).unwrap();

        let report = store.purge_older_than(Utc::now() - Duration::days(90)).unwrap();

        assert_eq!(report.logs_deleted, 1);
        assert_eq!(report.advice_deleted, 1);
        assert!(store.get_advice(&open.advice_id).unwrap().is_some());
        assert!(store.get_advice(&closed.advice_id).unwrap().is_none());
    }
}
