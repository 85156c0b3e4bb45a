//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::JobId;

/// A monitor configuration: probe target, schedule and alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: u64,
    pub name: String,
    /// Probe target (URL, host:port, ...). Interpreted by the reporters.
    pub target: String,
    /// 6-field cron spec (with seconds) handed to the scheduler.
    pub cron_spec: String,
    /// Scheduler handle for the currently registered job. Runtime-only.
    #[serde(skip)]
    pub cron_job_id: Option<JobId>,
    /// Whether status and SSL events emit notifications.
    pub notify: bool,
    /// Whether latency-band events emit notifications.
    pub latency_notify: bool,
    /// Latency bounds in milliseconds.
    pub min_latency: f64,
    pub max_latency: f64,
    /// Routing key for the notifier; backfilled to "default" when missing.
    pub notification_tag: String,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            target: String::new(),
            cron_spec: "@every 60s".to_string(),
            cron_job_id: None,
            notify: false,
            latency_notify: false,
            min_latency: 0.0,
            max_latency: 0.0,
            notification_tag: "default".to_string(),
        }
    }
}

/// A single probe outcome, as reported and as persisted.
///
/// For TLS probes `data` has the shape
/// `"issuer-or-cn|YYYY-MM-DD HH:MM:SS ±HHMM TZ"`; TLS handshake failures
/// carry a fixed error prefix instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorHistory {
    pub monitor_id: u64,
    pub created_at: DateTime<Utc>,
    pub successful: bool,
    /// Latency in milliseconds.
    pub delay: f64,
    pub data: String,
}

/// Reporter metadata, used to enrich incident log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
}
