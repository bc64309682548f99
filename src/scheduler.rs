//! Background job scheduler.
//!
//! A `Scheduler` is an owned value handed to whoever needs it; there is no
//! process-wide instance. One polling thread scans for due jobs and runs
//! them with a wall-clock budget: a job that overruns its budget is marked
//! failed and the loop moves on, leaving the stuck thread to finish in the
//! background.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_JOB_BUDGET: Duration = Duration::from_secs(300);

/// Wait before retrying a failed job.
const ERROR_BACKOFF: Duration = Duration::from_secs(300);

/// How often the loop checks the stop flag while idle.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(100);

pub type JobFn = Arc<dyn Fn() -> Result<()> + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub job_budget: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_budget: DEFAULT_JOB_BUDGET,
        }
    }
}

struct Job {
    name: String,
    interval: Duration,
    task: JobFn,
    next_run: DateTime<Utc>,
    run_count: u64,
    error_count: u64,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Point-in-time snapshot of one job's bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub interval_secs: u64,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct SchedulerInner {
    jobs: Mutex<Vec<Job>>,
    running: AtomicBool,
    config: SchedulerConfig,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                config,
            }),
            handle: None,
        }
    }

    /// Registers a job, replacing any existing job of the same name. With
    /// `run_immediately` the first run is due on the next poll; otherwise
    /// it is due one interval from now.
    pub fn schedule_task(
        &self,
        name: &str,
        interval: Duration,
        run_immediately: bool,
        task: JobFn,
    ) {
        let now = Utc::now();
        let next_run = if run_immediately {
            now
        } else {
            now + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero())
        };
        let job = Job {
            name: name.to_string(),
            interval,
            task,
            next_run,
            run_count: 0,
            error_count: 0,
            last_run: None,
            last_error: None,
        };
        let mut jobs = lock_jobs(&self.inner);
        if let Some(existing) = jobs.iter_mut().find(|j| j.name == name) {
            info!("replacing scheduled job '{name}'");
            *existing = job;
        } else {
            info!(
                "scheduled job '{name}' every {}s{}",
                interval.as_secs(),
                if run_immediately { ", first run now" } else { "" }
            );
            jobs.push(job);
        }
    }

    pub fn remove_task(&self, name: &str) -> bool {
        let mut jobs = lock_jobs(&self.inner);
        let before = jobs.len();
        jobs.retain(|j| j.name != name);
        jobs.len() != before
    }

    pub fn status(&self) -> Vec<JobStatus> {
        lock_jobs(&self.inner)
            .iter()
            .map(|j| JobStatus {
                name: j.name.clone(),
                interval_secs: j.interval.as_secs(),
                next_run: j.next_run,
                run_count: j.run_count,
                error_count: j.error_count,
                last_run: j.last_run,
                last_error: j.last_error.clone(),
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts the polling thread. A no-op if already running.
    pub fn start(&mut self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.handle = Some(thread::spawn(move || poll_loop(inner)));
        info!(
            "scheduler started, polling every {}s",
            self.inner.config.poll_interval.as_secs()
        );
    }

    /// Signals the polling thread to stop and waits for it. A run already
    /// in flight completes and is recorded first.
    pub fn stop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            } else {
                info!("scheduler stopped");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_jobs(inner: &SchedulerInner) -> std::sync::MutexGuard<'_, Vec<Job>> {
    // Job bookkeeping is plain data; a poisoned lock only means a panic
    // elsewhere already aborted a run.
    inner.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn poll_loop(inner: Arc<SchedulerInner>) {
    let mut last_scan: Option<Instant> = None;
    while inner.running.load(Ordering::SeqCst) {
        let due_for_scan = last_scan
            .map(|at| at.elapsed() >= inner.config.poll_interval)
            .unwrap_or(true);
        if due_for_scan {
            last_scan = Some(Instant::now());
            run_due_jobs(&inner);
        }
        thread::sleep(STOP_CHECK_SLICE);
    }
}

fn run_due_jobs(inner: &SchedulerInner) {
    let now = Utc::now();
    // Snapshot due tasks outside the lock so a slow job never blocks
    // schedule_task or status callers.
    let due: Vec<(String, JobFn)> = lock_jobs(inner)
        .iter()
        .filter(|j| j.next_run <= now)
        .map(|j| (j.name.clone(), Arc::clone(&j.task)))
        .collect();

    for (name, task) in due {
        let outcome = run_with_budget(&name, task, inner.config.job_budget);
        let finished = Utc::now();
        let mut jobs = lock_jobs(inner);
        let Some(job) = jobs.iter_mut().find(|j| j.name == name) else {
            // Removed while running; nothing to record.
            continue;
        };
        job.last_run = Some(finished);
        match outcome {
            Ok(()) => {
                job.run_count += 1;
                job.last_error = None;
                job.next_run = finished
                    + chrono::Duration::from_std(job.interval)
                        .unwrap_or(chrono::Duration::zero());
            }
            Err(message) => {
                job.error_count += 1;
                warn!("job '{name}' failed: {message}");
                job.last_error = Some(message);
                job.next_run = finished
                    + chrono::Duration::from_std(ERROR_BACKOFF)
                        .unwrap_or(chrono::Duration::zero());
            }
        }
    }
}

/// Runs the task on its own thread and waits up to `budget`. Overrunning
/// the budget counts as failure; the thread itself is left to wind down.
/// A task that panics drops its sender without reporting, which is also
/// recorded as a failure.
fn run_with_budget(name: &str, task: JobFn, budget: Duration) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    let job_name = name.to_string();
    thread::spawn(move || {
        let result = task().map_err(|err| format!("{err:#}"));
        // The receiver is gone if the budget already expired.
        if tx.send(result).is_err() {
            warn!("job '{job_name}' finished after its budget expired");
        }
    });
    match rx.recv_timeout(budget) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(format!("exceeded budget of {}s", budget.as_secs()))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err("job panicked before reporting a result".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            job_budget: Duration::from_millis(200),
        }
    }

    fn wait_until(deadline_ms: u64, mut ready: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if ready() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        ready()
    }

    #[test]
    fn immediate_job_runs_and_counts() {
        let mut scheduler = Scheduler::new(fast_config());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_job = Arc::clone(&hits);
        scheduler.schedule_task(
            "counter",
            Duration::from_secs(3600),
            true,
            Arc::new(move || {
                hits_in_job.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        scheduler.start();
        assert!(wait_until(2000, || hits.load(Ordering::SeqCst) >= 1));
        scheduler.stop();

        let status = scheduler.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].run_count, 1);
        assert_eq!(status[0].error_count, 0);
        assert!(status[0].last_run.is_some());
        // Next run is pushed a full interval out.
        assert!(status[0].next_run > Utc::now() + chrono::Duration::minutes(30));
    }

    #[test]
    fn deferred_job_waits_one_interval() {
        let mut scheduler = Scheduler::new(fast_config());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_job = Arc::clone(&hits);
        scheduler.schedule_task(
            "later",
            Duration::from_secs(3600),
            false,
            Arc::new(move || {
                hits_in_job.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        scheduler.start();
        thread::sleep(Duration::from_millis(150));
        scheduler.stop();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failures_are_recorded_with_backoff() {
        let mut scheduler = Scheduler::new(fast_config());
        scheduler.schedule_task(
            "flaky",
            Duration::from_secs(1),
            true,
            Arc::new(|| anyhow::bail!("feed unavailable")),
        );
        scheduler.start();
        assert!(wait_until(2000, || {
            scheduler.status()[0].error_count >= 1
        }));
        scheduler.stop();

        let status = &scheduler.status()[0];
        assert_eq!(status.run_count, 0);
        assert!(status.last_error.as_deref().unwrap().contains("feed unavailable"));
        // Error backoff is minutes out, well past the 1s interval.
        assert!(status.next_run > Utc::now() + chrono::Duration::minutes(1));
    }

    #[test]
    fn overrunning_job_counts_as_failure() {
        let mut scheduler = Scheduler::new(SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            job_budget: Duration::from_millis(50),
        });
        scheduler.schedule_task(
            "slow",
            Duration::from_secs(3600),
            true,
            Arc::new(|| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            }),
        );
        scheduler.start();
        assert!(wait_until(2000, || {
            scheduler.status()[0].error_count >= 1
        }));
        scheduler.stop();
        let status = &scheduler.status()[0];
        assert!(status.last_error.as_deref().unwrap().contains("budget"));
    }

    #[test]
    fn stop_mid_run_lets_the_job_finish_and_record() {
        let mut scheduler = Scheduler::new(SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            job_budget: Duration::from_secs(5),
        });
        let started = Arc::new(AtomicUsize::new(0));
        let started_in_job = Arc::clone(&started);
        scheduler.schedule_task(
            "long",
            Duration::from_secs(3600),
            true,
            Arc::new(move || {
                started_in_job.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(200));
                Ok(())
            }),
        );
        scheduler.start();
        assert!(wait_until(2000, || started.load(Ordering::SeqCst) >= 1));

        // Stop lands while the run is in flight; the outcome is still
        // recorded before the loop exits.
        scheduler.stop();
        let status = &scheduler.status()[0];
        assert_eq!(status.run_count, 1);
        assert_eq!(status.error_count, 0);
        assert!(status.last_run.is_some());
    }

    #[test]
    fn panicking_job_is_recorded_as_a_failure() {
        let mut scheduler = Scheduler::new(fast_config());
        scheduler.schedule_task(
            "crasher",
            Duration::from_secs(3600),
            true,
            Arc::new(|| panic!("boom")),
        );
        scheduler.start();
        assert!(wait_until(2000, || {
            scheduler.status()[0].error_count >= 1
        }));
        scheduler.stop();

        let status = &scheduler.status()[0];
        assert_eq!(status.run_count, 0);
        let message = status.last_error.as_deref().unwrap();
        assert!(message.contains("panicked"), "unexpected message: {message}");
        assert!(!message.contains("budget"));
    }

    #[test]
    fn same_name_replaces_the_job() {
        let scheduler = Scheduler::new(fast_config());
        scheduler.schedule_task("job", Duration::from_secs(60), false, Arc::new(|| Ok(())));
        scheduler.schedule_task("job", Duration::from_secs(120), false, Arc::new(|| Ok(())));
        let status = scheduler.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].interval_secs, 120);
    }

    #[test]
    fn stop_joins_and_is_idempotent() {
        let mut scheduler = Scheduler::new(fast_config());
        scheduler.schedule_task("noop", Duration::from_secs(60), true, Arc::new(|| Ok(())));
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.stop();

        let removed = scheduler.remove_task("noop");
        assert!(removed);
        assert!(!scheduler.remove_task("noop"));
    }
}
