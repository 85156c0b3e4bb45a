//! Service sentinel: the ingestion, aggregation and alerting core.
//!
//! Reporters submit probe outcomes onto a bounded report channel; a single
//! worker task drains it, maintains per-monitor sliding windows and day
//! buckets, persists compacted history and raises notifications. Probe jobs
//! are driven by the scheduler, which pushes monitor snapshots onto the
//! dispatch bus for the (external) probe engine.
//!
//! Lock order is strict: response store, then monthly stats, then the
//! monitor registry. Any path touching two or more must acquire downward.

mod ssl;
mod status;

pub use status::Status;

use crate::db::{DbError, Monitor, MonitorHistory, Server, Store};
use crate::i18n::Localizer;
use crate::notify::Notifier;
use crate::scheduler::{JobFn, JobId, ScheduleError, Scheduler};

use chrono::{DateTime, Duration, Local, LocalResult, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Slots in the short window: roughly the last 15 minutes of probes at the
/// default cadence. The wall-clock span follows each monitor's cron spec.
const CURRENT_STATUS_SIZE: usize = 30;

/// Day buckets in the rolling month; slot 29 is today, slot 0 is 29 days ago.
const DAY_BUCKETS: usize = 30;

/// Depth of the report channel. Producers block when it is full, which acts
/// as backpressure on the reporters.
const REPORT_QUEUE_DEPTH: usize = 200;

/// Local midnight, six fields with seconds.
const DAILY_ROLL_SPEC: &str = "0 0 0 * * *";

/// Probe outcome as delivered by a reporter.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: u64,
    /// Latency in milliseconds.
    pub delay: f64,
    pub successful: bool,
    pub data: String,
}

/// A reporter's submission: the probe outcome plus who ran it.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub data: TaskResult,
    pub reporter: u64,
}

/// Shared reporter directory. Read-locked only to enrich incident logs.
pub type ServerRegistry = Arc<RwLock<HashMap<u64, Server>>>;

/// Sentinel error types.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("schedule rejected: {0}")]
    ScheduleRejected(#[from] ScheduleError),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Today's counters for one monitor. The delay is kept as a sum so the mean
/// of successful delays since midnight is exact on read.
#[derive(Debug, Default, Clone)]
struct TodayStats {
    up: u64,
    down: u64,
    delay_sum: f64,
}

impl TodayStats {
    fn mean_delay(&self) -> f64 {
        if self.up == 0 {
            0.0
        } else {
            self.delay_sum / self.up as f64
        }
    }
}

/// Per-monitor aggregation state. Lives under the response-store lock.
#[derive(Debug)]
struct MonitorState {
    today: TodayStats,
    /// Ring buffer of the last `CURRENT_STATUS_SIZE` outcomes; `None` slots
    /// have never been written.
    window: Vec<Option<MonitorHistory>>,
    cursor: usize,
    current_up: u64,
    current_down: u64,
    /// Most recent discrete status; `None` until the first report.
    last_status: Option<Status>,
    /// Last non-error TLS payload; empty until the first success.
    ssl_cache: String,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            today: TodayStats::default(),
            window: vec![None; CURRENT_STATUS_SIZE],
            cursor: 0,
            current_up: 0,
            current_down: 0,
            last_status: None,
            ssl_cache: String::new(),
        }
    }
}

/// 30-day rollup for one monitor, as served to readers.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub monitor: Monitor,
    pub up: [u64; DAY_BUCKETS],
    pub down: [u64; DAY_BUCKETS],
    /// Per-day mean delay over successful probes, in milliseconds.
    pub delay: [f64; DAY_BUCKETS],
    pub total_up: u64,
    pub total_down: u64,
    /// Short-window counters at the time of the last refresh.
    pub current_up: u64,
    pub current_down: u64,
}

impl ServiceStats {
    fn new(monitor: Monitor) -> Self {
        Self {
            monitor,
            up: [0; DAY_BUCKETS],
            down: [0; DAY_BUCKETS],
            delay: [0.0; DAY_BUCKETS],
            total_up: 0,
            total_down: 0,
            current_up: 0,
            current_down: 0,
        }
    }
}

/// The monitoring core. One instance per process, owned by the composition
/// root and shared behind an [`Arc`].
pub struct Sentinel {
    report_tx: Mutex<Option<mpsc::Sender<ReportData>>>,
    dispatch_bus: mpsc::Sender<Monitor>,
    store: Store,
    scheduler: Arc<dyn Scheduler>,
    notifier: Arc<dyn Notifier>,
    localizer: Arc<dyn Localizer>,
    servers: ServerRegistry,
    daily_roll_job: Mutex<Option<JobId>>,

    // Lock order: response -> monthly -> monitors.
    response: RwLock<HashMap<u64, MonitorState>>,
    monthly: Mutex<HashMap<u64, ServiceStats>>,
    monitors: RwLock<HashMap<u64, Monitor>>,
}

impl Sentinel {
    /// Construct the sentinel, replay persisted history, register all probe
    /// jobs plus the daily roll, and spawn the ingestion worker.
    ///
    /// Must run inside a tokio runtime. Database and scheduling failures
    /// here are fatal.
    pub fn start(
        store: Store,
        scheduler: Arc<dyn Scheduler>,
        notifier: Arc<dyn Notifier>,
        localizer: Arc<dyn Localizer>,
        servers: ServerRegistry,
        dispatch_bus: mpsc::Sender<Monitor>,
    ) -> Result<Arc<Self>, SentinelError> {
        let (report_tx, report_rx) = mpsc::channel(REPORT_QUEUE_DEPTH);

        let sentinel = Arc::new(Self {
            report_tx: Mutex::new(Some(report_tx)),
            dispatch_bus,
            store,
            scheduler,
            notifier,
            localizer,
            servers,
            daily_roll_job: Mutex::new(None),
            response: RwLock::new(HashMap::new()),
            monthly: Mutex::new(HashMap::new()),
            monitors: RwLock::new(HashMap::new()),
        });

        sentinel.load_monitor_history()?;

        // The callback holds a weak handle so a retired sentinel is not kept
        // alive by its own cron job.
        let weak = Arc::downgrade(&sentinel);
        let job = sentinel.scheduler.add_func(
            DAILY_ROLL_SPEC,
            Arc::new(move || {
                if let Some(ss) = weak.upgrade() {
                    ss.roll_daily_stats();
                }
            }),
        )?;
        *sentinel.daily_roll_job.lock().unwrap() = Some(job);

        tokio::spawn(Arc::clone(&sentinel).run_worker(report_rx));

        Ok(sentinel)
    }

    /// Enqueue a report. Blocks while the report channel is full.
    pub async fn dispatch(&self, r: ReportData) {
        let tx = self.report_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(r).await.is_err() {
                    warn!("report channel closed, dropping report");
                }
            }
            None => warn!("sentinel is shut down, dropping report"),
        }
    }

    /// Deregister every cron job and close the report channel. The worker
    /// drains what is queued and stops.
    pub fn shutdown(&self) {
        if let Some(job) = self.daily_roll_job.lock().unwrap().take() {
            self.scheduler.remove(job);
        }
        {
            let registry = self.monitors.read().unwrap();
            for m in registry.values() {
                if let Some(job) = m.cron_job_id {
                    self.scheduler.remove(job);
                }
            }
        }
        self.report_tx.lock().unwrap().take();
    }

    /// Snapshot of active monitors, ascending by id.
    pub fn monitors(&self) -> Vec<Monitor> {
        let registry = self.monitors.read().unwrap();
        let mut monitors: Vec<Monitor> = registry.values().cloned().collect();
        monitors.sort_by_key(|m| m.id);
        monitors
    }

    /// Register or replace a monitor.
    ///
    /// A fresh probe job is registered first; if the scheduler rejects the
    /// spec nothing changes. Existing aggregation state is preserved across
    /// updates and initialised for new ids.
    pub fn on_monitor_update(&self, mut m: Monitor) -> Result<(), SentinelError> {
        let mut response = self.response.write().unwrap();
        let mut monthly = self.monthly.lock().unwrap();
        let mut registry = self.monitors.write().unwrap();

        let job = self.register_dispatch_job(&m)?;
        m.cron_job_id = Some(job);

        if let Some(old) = registry.get(&m.id) {
            if let Some(old_job) = old.cron_job_id {
                self.scheduler.remove(old_job);
            }
        } else {
            response.insert(m.id, MonitorState::new());
            monthly.insert(m.id, ServiceStats::new(m.clone()));
        }
        registry.insert(m.id, m);
        Ok(())
    }

    /// Drop a monitor: deregister its job, then purge all per-monitor state.
    pub fn on_monitor_delete(&self, id: u64) {
        let mut response = self.response.write().unwrap();
        let mut monthly = self.monthly.lock().unwrap();
        let mut registry = self.monitors.write().unwrap();

        response.remove(&id);

        if let Some(job) = registry.get(&id).and_then(|m| m.cron_job_id) {
            self.scheduler.remove(job);
        }
        registry.remove(&id);

        monthly.remove(&id);
    }

    /// Refresh today's slot in every monitor's 30-day rollup and return a
    /// consistent snapshot.
    pub fn load_stats(&self) -> HashMap<u64, ServiceStats> {
        let response = self.response.read().unwrap();
        let mut monthly = self.monthly.lock().unwrap();
        let registry = self.monitors.read().unwrap();

        for (id, m) in registry.iter() {
            let stats = match monthly.get_mut(id) {
                Some(s) => s,
                None => continue,
            };
            stats.monitor = m.clone();

            let state = match response.get(id) {
                Some(s) => s,
                None => continue,
            };

            // Replace the previous fold of today's slot with current values.
            stats.total_up -= stats.up[DAY_BUCKETS - 1];
            stats.total_down -= stats.down[DAY_BUCKETS - 1];
            stats.total_up += state.today.up;
            stats.total_down += state.today.down;

            stats.up[DAY_BUCKETS - 1] = state.today.up;
            stats.down[DAY_BUCKETS - 1] = state.today.down;
            stats.delay[DAY_BUCKETS - 1] = state.today.mean_delay();

            stats.current_up = state.current_up;
            stats.current_down = state.current_down;
        }

        monthly.clone()
    }

    /// Midnight maintenance: fold today's counters, then slide every day
    /// bucket left by one and zero today.
    pub fn roll_daily_stats(&self) {
        self.load_stats();

        let mut response = self.response.write().unwrap();
        let mut monthly = self.monthly.lock().unwrap();

        for (id, stats) in monthly.iter_mut() {
            // The oldest day falls out of the 30-day totals.
            stats.total_up -= stats.up[0];
            stats.total_down -= stats.down[0];

            for i in 0..DAY_BUCKETS - 1 {
                stats.up[i] = stats.up[i + 1];
                stats.down[i] = stats.down[i + 1];
                stats.delay[i] = stats.delay[i + 1];
            }
            stats.up[DAY_BUCKETS - 1] = 0;
            stats.down[DAY_BUCKETS - 1] = 0;
            stats.delay[DAY_BUCKETS - 1] = 0.0;

            if let Some(state) = response.get_mut(id) {
                state.current_up = 0;
                state.current_down = 0;
                state.today = TodayStats::default();
            }
        }
    }

    /// Load monitors from the store, register their probe jobs and rebuild
    /// aggregation state from persisted history.
    fn load_monitor_history(&self) -> Result<(), SentinelError> {
        let mut loaded = self.store.load_monitors()?;

        let mut response = self.response.write().unwrap();
        let mut monthly = self.monthly.lock().unwrap();
        let mut registry = self.monitors.write().unwrap();

        for m in loaded.iter_mut() {
            // Configurations predating notification groups get the default.
            if m.notification_tag.is_empty() {
                m.notification_tag = "default".to_string();
                if let Err(e) = self.store.save_monitor(m) {
                    warn!(monitor = m.id, "failed to backfill notification tag: {}", e);
                }
            }

            let job = self.register_dispatch_job(m)?;
            m.cron_job_id = Some(job);

            registry.insert(m.id, m.clone());
            response.insert(m.id, MonitorState::new());
            monthly.insert(m.id, ServiceStats::new(m.clone()));
        }

        let today_start = local_midnight();

        // Day buckets for the previous 29 days.
        let rows = self
            .store
            .history_between(today_start - Duration::days(29), today_start)?;
        for h in rows {
            let stats = match monthly.get_mut(&h.monitor_id) {
                Some(s) => s,
                None => continue,
            };
            let days_back = (today_start - h.created_at).num_hours() / 24;
            if !(0..=28).contains(&days_back) {
                continue;
            }
            let day = 28 - days_back as usize;
            if h.successful {
                let up = stats.up[day] as f64;
                stats.delay[day] = (stats.delay[day] * up + h.delay) / (up + 1.0);
                stats.up[day] += 1;
                stats.total_up += 1;
            } else {
                stats.down[day] += 1;
                stats.total_down += 1;
            }
        }

        // Today's partial counters. Totals are left alone: the next
        // load_stats folds today's slot in exactly once.
        let rows = self.store.history_since(today_start)?;
        for h in rows {
            let state = match response.get_mut(&h.monitor_id) {
                Some(s) => s,
                None => continue,
            };
            if h.successful {
                state.today.up += 1;
                state.today.delay_sum += h.delay;
            } else {
                state.today.down += 1;
            }
        }

        info!(monitors = registry.len(), "monitor history loaded");
        Ok(())
    }

    /// Register the probe job for a monitor. The callback owns a snapshot
    /// taken at registration time, not a live reference.
    fn register_dispatch_job(&self, m: &Monitor) -> Result<JobId, ScheduleError> {
        let snapshot = Monitor {
            cron_job_id: None,
            ..m.clone()
        };
        let bus = self.dispatch_bus.clone();
        let f: JobFn = Arc::new(move || {
            if let Err(e) = bus.try_send(snapshot.clone()) {
                warn!(monitor = snapshot.id, "dispatch bus refused probe task: {}", e);
            }
        });
        self.scheduler.add_func(&m.cron_spec, f)
    }

    async fn run_worker(self: Arc<Self>, mut rx: mpsc::Receiver<ReportData>) {
        while let Some(r) = rx.recv().await {
            self.process_report(r);
        }
        info!("report channel closed, ingestion worker stopped");
    }

    /// Apply one report: today counters, short window, status derivation,
    /// periodic persistence, then alerting.
    fn process_report(&self, r: ReportData) {
        let monitor_id = r.data.id;
        {
            let registry = self.monitors.read().unwrap();
            if monitor_id == 0 || !registry.contains_key(&monitor_id) {
                warn!(
                    monitor = monitor_id,
                    reporter = r.reporter,
                    "dropping report for unknown monitor"
                );
                return;
            }
        }

        let mh = MonitorHistory {
            monitor_id,
            created_at: Utc::now(),
            successful: r.data.successful,
            delay: r.data.delay,
            data: r.data.data,
        };

        let mut response = self.response.write().unwrap();
        let state = match response.get_mut(&monitor_id) {
            Some(s) => s,
            None => {
                warn!(monitor = monitor_id, "missing aggregation state, dropping report");
                return;
            }
        };

        // Today counters.
        if mh.successful {
            state.today.delay_sum += mh.delay;
            state.today.up += 1;
        } else {
            state.today.down += 1;
            let reporter = {
                let servers = self.servers.read().unwrap();
                servers
                    .get(&r.reporter)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| format!("#{}", r.reporter))
            };
            let registry = self.monitors.read().unwrap();
            if let Some(m) = registry.get(&monitor_id) {
                warn!(
                    monitor_target = %m.target,
                    reporter = %reporter,
                    "service incident: {}",
                    mh.data
                );
            }
        }

        // Short window write and rescan.
        state.window[state.cursor] = Some(mh.clone());
        state.cursor += 1;

        let mut current_up = 0u64;
        let mut current_down = 0u64;
        for slot in state.window.iter().flatten() {
            if slot.successful {
                current_up += 1;
            } else {
                current_down += 1;
            }
        }
        state.current_up = current_up;
        state.current_down = current_down;

        let populated = current_up + current_down;
        let up_percent = if populated > 0 {
            current_up * 100 / populated
        } else {
            0
        };
        let state_code = Status::from_percent(up_percent);

        // One compacted row per full window.
        if state.cursor == CURRENT_STATUS_SIZE {
            state.cursor = 0;
            let row = MonitorHistory {
                monitor_id,
                created_at: mh.created_at,
                successful: state_code == Status::Good,
                delay: state.today.mean_delay(),
                data: mh.data.clone(),
            };
            if let Err(e) = self.store.create_history(&row) {
                error!(monitor = monitor_id, "failed to persist monitor history: {}", e);
            }
        }

        // Latency band.
        if mh.delay > 0.0 {
            let registry = self.monitors.read().unwrap();
            if let Some(m) = registry.get(&monitor_id) {
                if m.latency_notify {
                    if mh.delay > m.max_latency {
                        self.spawn_notification(
                            &m.notification_tag,
                            format!("[Latency] {} {:.2} > {:.2}", m.name, mh.delay, m.max_latency),
                        );
                    }
                    if mh.delay < m.min_latency {
                        self.spawn_notification(
                            &m.notification_tag,
                            format!("[Latency] {} {:.2} < {:.2}", m.name, mh.delay, m.min_latency),
                        );
                    }
                }
            }
        }

        // Status transition. Fired once per transition; the first ever
        // observation is suppressed unless the service is already down.
        if state_code == Status::Down || state.last_status != Some(state_code) {
            let registry = self.monitors.read().unwrap();
            if let Some(m) = registry.get(&monitor_id) {
                let changed = state.last_status != Some(state_code);
                let first = state.last_status.is_none();
                let notify = changed && (!first || state_code == Status::Down) && m.notify;
                state.last_status = Some(state_code);
                if notify {
                    let label = state_code.localized(self.localizer.as_ref());
                    self.spawn_notification(
                        &m.notification_tag,
                        format!("[{}] {}", label, m.name),
                    );
                }
            }
        }

        // Certificate tracking.
        if !mh.data.is_empty() {
            if let Some(err_msg) = ssl::check_certificate(&mh.data, &mut state.ssl_cache, Utc::now())
            {
                let registry = self.monitors.read().unwrap();
                if let Some(m) = registry.get(&monitor_id) {
                    if m.notify {
                        self.spawn_notification(
                            &m.notification_tag,
                            format!("[SSL] {} {}", m.name, err_msg),
                        );
                    }
                }
            }
        }
    }

    /// Fire-and-forget notification on its own task. Muteable: the
    /// transport may coalesce repeats.
    fn spawn_notification(&self, tag: &str, message: String) {
        let notifier = Arc::clone(&self.notifier);
        let tag = tag.to_string();
        tokio::spawn(async move {
            notifier.send_notification(&tag, &message, true);
        });
    }
}

/// Start of the current local day, as a UTC instant.
fn local_midnight() -> DateTime<Utc> {
    let now = Local::now();
    let naive = now.date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        // A DST gap swallowing midnight: fall back to the current instant.
        LocalResult::None => now.with_timezone(&Utc),
    }
}
