//! Recurring job execution with interval and signal triggers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::signals::{Signal, SignalBus};
use crate::domain::AppError;

/// One pipeline stage run by the scheduler
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), AppError>;
}

/// Trigger configuration of a job
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub interval: Duration,
    /// Signals that wake the job before its next tick
    pub wake_on: Vec<Signal>,
    /// Pause after each run, triggers arriving meanwhile are skipped.
    /// The trigger that ran the job returns before the pause ends.
    pub cool_down: Option<Duration>,
    /// Disabled jobs are not looped but can still be triggered manually
    pub enabled: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            wake_on: Vec::new(),
            cool_down: None,
            enabled: true,
        }
    }
}

impl JobConfig {
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn wake_on(mut self, signal: Signal) -> Self {
        self.wake_on.push(signal);
        self
    }

    #[must_use]
    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = Some(cool_down);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Result of a single trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRun {
    Completed,
    Failed,
    /// A run was already in progress
    Skipped,
}

/// A job with its mutex and trigger configuration
pub struct ScheduledJob {
    job: Arc<dyn Job>,
    config: JobConfig,
    running: Arc<Mutex<()>>,
}

impl ScheduledJob {
    pub fn new(job: Arc<dyn Job>, config: JobConfig) -> Self {
        Self {
            job,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run the job now unless a run is already in progress
    pub async fn trigger(&self) -> JobRun {
        let Ok(guard) = Arc::clone(&self.running).try_lock_owned() else {
            debug!(job = self.name(), "Run in progress, trigger skipped");
            return JobRun::Skipped;
        };

        let result = match AssertUnwindSafe(self.job.run()).catch_unwind().await {
            Ok(Ok(())) => JobRun::Completed,
            Ok(Err(e)) => {
                error!(job = self.name(), error = ?e, "Job run failed");
                JobRun::Failed
            }
            Err(_) => {
                error!(job = self.name(), "Job run panicked");
                JobRun::Failed
            }
        };

        match self.config.cool_down {
            Some(cool_down) => {
                tokio::spawn(async move {
                    tokio::time::sleep(cool_down).await;
                    drop(guard);
                });
            }
            None => drop(guard),
        }
        result
    }

    async fn run_loop(self: Arc<Self>, signals: Arc<SignalBus>, mut shutdown: watch::Receiver<bool>) {
        info!(
            job = self.name(),
            interval_secs = self.config.interval.as_secs(),
            "Job loop started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                signal = signals.wait_any(&self.config.wake_on) => {
                    debug!(job = self.name(), signal = %signal, "Woken by signal");
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.trigger().await;

            // Wake-ups during the cool-down are held until it ends
            if self.config.cool_down.is_some() {
                tokio::select! {
                    _ = self.running.lock() => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        info!(job = self.name(), "Job loop stopped");
    }
}

/// Registry of the pipeline jobs
pub struct JobScheduler {
    jobs: Vec<Arc<ScheduledJob>>,
    signals: Arc<SignalBus>,
}

impl JobScheduler {
    pub fn new(signals: Arc<SignalBus>) -> Self {
        Self {
            jobs: Vec::new(),
            signals,
        }
    }

    pub fn register(&mut self, job: Arc<dyn Job>, config: JobConfig) {
        if self.get(job.name()).is_some() {
            warn!(job = job.name(), "Job registered twice, replacing");
            self.jobs.retain(|j| j.name() != job.name());
        }
        self.jobs.push(Arc::new(ScheduledJob::new(job, config)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ScheduledJob>> {
        self.jobs.iter().find(|j| j.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Run a registered job now
    pub async fn trigger(&self, name: &str) -> Result<JobRun, AppError> {
        let job = self
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("Job '{}'", name)))?;
        Ok(job.trigger().await)
    }

    /// Spawn one loop per enabled job, all stopping on `shutdown`
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .filter(|job| job.config.enabled)
            .map(|job| {
                tokio::spawn(Arc::clone(job).run_loop(Arc::clone(&self.signals), shutdown.clone()))
            })
            .collect()
    }
}
