//! Job scheduling for probe dispatch and daily maintenance.
//!
//! The sentinel only depends on the [`Scheduler`] trait; [`CronScheduler`] is
//! the production implementation, running one tokio task per job.

use chrono::Local;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Opaque handle for a scheduled job.
pub type JobId = u64;

/// A scheduled callback. Must be cheap; long work belongs on its own task.
pub type JobFn = Arc<dyn Fn() + Send + Sync>;

/// Scheduling error types.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid schedule spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },
}

/// Registration surface for recurring jobs.
///
/// Specs are either 6-field cron expressions (with seconds, local time) or
/// the `"@every <duration>"` shorthand.
pub trait Scheduler: Send + Sync {
    /// Register `f` to run on `spec`. Returns a handle for [`Scheduler::remove`].
    fn add_func(&self, spec: &str, f: JobFn) -> Result<JobId, ScheduleError>;

    /// Deregister a job. Unknown handles are ignored.
    fn remove(&self, id: JobId);
}

enum Cadence {
    Every(Duration),
    Cron(Box<Schedule>),
}

fn parse_spec(spec: &str) -> Result<Cadence, ScheduleError> {
    if let Some(dur_str) = spec.strip_prefix("@every ") {
        let dur = parse_duration(dur_str).ok_or_else(|| ScheduleError::InvalidSpec {
            spec: spec.to_string(),
            reason: format!("bad duration {:?}", dur_str),
        })?;
        if dur.is_zero() {
            return Err(ScheduleError::InvalidSpec {
                spec: spec.to_string(),
                reason: "zero interval".to_string(),
            });
        }
        return Ok(Cadence::Every(dur));
    }

    let schedule = Schedule::from_str(spec).map_err(|e| ScheduleError::InvalidSpec {
        spec: spec.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Cadence::Cron(Box::new(schedule)))
}

/// Parse durations of the form `30s`, `500ms`, `5m`, `1h` and combinations
/// like `1m30s`.
fn parse_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = s.trim();
    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let value: u64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let (unit_len, unit) = if rest.starts_with("ms") {
            (2, Duration::from_millis(value))
        } else if rest.starts_with('s') {
            (1, Duration::from_secs(value))
        } else if rest.starts_with('m') {
            (1, Duration::from_secs(value * 60))
        } else if rest.starts_with('h') {
            (1, Duration::from_secs(value * 3600))
        } else {
            return None;
        };
        total += unit;
        rest = &rest[unit_len..];
    }

    Some(total)
}

/// Tokio-backed scheduler. One spawned task per job, torn down through a
/// broadcast stop channel.
#[derive(Default)]
pub struct CronScheduler {
    next_id: AtomicU64,
    stop_chans: Mutex<HashMap<JobId, broadcast::Sender<()>>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for CronScheduler {
    fn add_func(&self, spec: &str, f: JobFn) -> Result<JobId, ScheduleError> {
        let cadence = parse_spec(spec)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let (stop_tx, stop_rx) = broadcast::channel(1);
        self.stop_chans.lock().unwrap().insert(id, stop_tx);

        tokio::spawn(run_job_loop(cadence, f, stop_rx));
        Ok(id)
    }

    fn remove(&self, id: JobId) {
        if let Some(stop_tx) = self.stop_chans.lock().unwrap().remove(&id) {
            let _ = stop_tx.send(());
        }
    }
}

async fn run_job_loop(cadence: Cadence, f: JobFn, mut stop_rx: broadcast::Receiver<()>) {
    match cadence {
        Cadence::Every(period) => {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => f(),
                }
            }
        }
        Cadence::Cron(schedule) => loop {
            let next = match schedule.upcoming(Local).next() {
                Some(t) => t,
                None => break,
            };
            let wait = (next - Local::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep(wait) => f(),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("10x"), None);
    }

    #[test]
    fn test_parse_spec() {
        assert!(matches!(
            parse_spec("@every 30s"),
            Ok(Cadence::Every(d)) if d == Duration::from_secs(30)
        ));
        // Daily-roll spec: midnight local, six fields with seconds.
        assert!(matches!(parse_spec("0 0 0 * * *"), Ok(Cadence::Cron(_))));
        assert!(parse_spec("@every soon").is_err());
        assert!(parse_spec("not a cron spec").is_err());
    }

    #[tokio::test]
    async fn test_add_and_remove_job() {
        let scheduler = CronScheduler::new();
        let count = Arc::new(AtomicU64::new(0));

        let count_fn = count.clone();
        let id = scheduler
            .add_func(
                "@every 20ms",
                Arc::new(move || {
                    count_fn.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        scheduler.remove(id);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let frozen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen);

        // Removing an unknown handle is a no-op.
        scheduler.remove(9999);
    }

    #[tokio::test]
    async fn test_rejects_bad_spec() {
        let scheduler = CronScheduler::new();
        let err = scheduler
            .add_func("* * *", Arc::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidSpec { .. }));
        assert!(scheduler.stop_chans.lock().unwrap().is_empty());
    }
}
