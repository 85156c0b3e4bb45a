//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory store. Used by tests and ad-hoc tooling.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Monitors ---

    /// Add a new monitor and return its ID.
    pub fn add_monitor(&self, monitor: &mut Monitor) -> Result<u64, DbError> {
        if monitor.notification_tag.is_empty() {
            monitor.notification_tag = "default".to_string();
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitors (name, target, cron_spec, notify, latency_notify, min_latency, max_latency, notification_tag) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                monitor.name,
                monitor.target,
                monitor.cron_spec,
                monitor.notify,
                monitor.latency_notify,
                monitor.min_latency,
                monitor.max_latency,
                monitor.notification_tag,
            ],
        )?;
        let id = conn.last_insert_rowid() as u64;
        monitor.id = id;
        Ok(id)
    }

    /// Upsert an existing monitor by ID.
    pub fn save_monitor(&self, monitor: &Monitor) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitors (id, name, target, cron_spec, notify, latency_notify, min_latency, max_latency, notification_tag) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(id) DO UPDATE SET \
             name=excluded.name, target=excluded.target, cron_spec=excluded.cron_spec, \
             notify=excluded.notify, latency_notify=excluded.latency_notify, \
             min_latency=excluded.min_latency, max_latency=excluded.max_latency, \
             notification_tag=excluded.notification_tag",
            params![
                monitor.id as i64,
                monitor.name,
                monitor.target,
                monitor.cron_spec,
                monitor.notify,
                monitor.latency_notify,
                monitor.min_latency,
                monitor.max_latency,
                monitor.notification_tag,
            ],
        )?;
        Ok(())
    }

    /// Load all monitors.
    pub fn load_monitors(&self) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, target, cron_spec, notify, latency_notify, min_latency, max_latency, \
             COALESCE(notification_tag, '') FROM monitors ORDER BY id ASC",
        )?;

        let monitors = stmt
            .query_map([], |row| {
                Ok(Monitor {
                    id: row.get::<_, i64>(0)? as u64,
                    name: row.get(1)?,
                    target: row.get(2)?,
                    cron_spec: row.get(3)?,
                    cron_job_id: None,
                    notify: row.get(4)?,
                    latency_notify: row.get(5)?,
                    min_latency: row.get(6)?,
                    max_latency: row.get(7)?,
                    notification_tag: row.get(8)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(monitors)
    }

    // --- Monitor history ---

    /// Insert one probe outcome row.
    pub fn create_history(&self, history: &MonitorHistory) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitor_histories (monitor_id, created_at, successful, delay, data) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                history.monitor_id as i64,
                format_db_time(history.created_at),
                history.successful,
                history.delay,
                history.data,
            ],
        )?;
        Ok(())
    }

    /// Get history rows at or after the given time.
    pub fn history_since(&self, since: DateTime<Utc>) -> Result<Vec<MonitorHistory>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id, created_at, successful, delay, data FROM monitor_histories \
             WHERE created_at >= ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![format_db_time(since)], row_to_history)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Get history rows in the half-open range `[start, end)`.
    pub fn history_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitorHistory>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id, created_at, successful, delay, data FROM monitor_histories \
             WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(
                params![format_db_time(start), format_db_time(end)],
                row_to_history,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_history(row: &rusqlite::Row<'_>) -> SqlResult<MonitorHistory> {
    let time_str: String = row.get(1)?;
    let created_at = parse_db_time(&time_str).unwrap_or_else(Utc::now);
    Ok(MonitorHistory {
        monitor_id: row.get::<_, i64>(0)? as u64,
        created_at,
        successful: row.get(2)?,
        delay: row.get(3)?,
        data: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_monitor(name: &str) -> Monitor {
        Monitor {
            name: name.to_string(),
            target: "https://example.com".to_string(),
            cron_spec: "@every 30s".to_string(),
            notify: true,
            max_latency: 200.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_and_load_monitors() {
        let store = Store::open_in_memory().unwrap();

        let mut m = sample_monitor("web");
        let id = store.add_monitor(&mut m).unwrap();
        assert!(id > 0);
        assert_eq!(m.id, id);

        let mut m2 = sample_monitor("api");
        store.add_monitor(&mut m2).unwrap();

        let loaded = store.load_monitors().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "web");
        assert_eq!(loaded[0].notification_tag, "default");
        assert!(loaded[0].notify);
        assert_eq!(loaded[1].name, "api");
    }

    #[test]
    fn test_save_monitor_upserts() {
        let store = Store::open_in_memory().unwrap();

        let mut m = sample_monitor("web");
        store.add_monitor(&mut m).unwrap();

        m.notification_tag = "ops".to_string();
        m.max_latency = 500.0;
        store.save_monitor(&m).unwrap();

        let loaded = store.load_monitors().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].notification_tag, "ops");
        assert_eq!(loaded[0].max_latency, 500.0);
    }

    #[test]
    fn test_history_ranges() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        for (offset_days, successful) in [(0, true), (1, true), (3, false)] {
            store
                .create_history(&MonitorHistory {
                    monitor_id: 1,
                    created_at: now - Duration::days(offset_days),
                    successful,
                    delay: 42.0,
                    data: String::new(),
                })
                .unwrap();
        }

        let recent = store.history_since(now - Duration::days(2)).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|h| h.successful));

        let window = store
            .history_between(now - Duration::days(4), now - Duration::days(2))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert!(!window[0].successful);
        assert_eq!(window[0].delay, 42.0);
    }
}
