use crate::{
    error::{ResolverError, ResolverResult},
    metrics,
};
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// What a job wants after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Run again at the next tick
    Continue,
    /// Stop the job permanently
    Stop,
}

/// Job scheduler for background tasks
pub struct JobScheduler {
    handle: Handle,
    jobs: Mutex<Vec<AbortHandle>>,
    shut_down: AtomicBool,
}

/// Handle to one scheduled job
#[derive(Debug)]
pub struct ScheduledJob {
    name: String,
    handle: AbortHandle,
}

impl ScheduledJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the job; an in-flight run is dropped at its next await point
    pub fn cancel(&self) {
        debug!("Cancelling background job '{}'", self.name);
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Keeps the active job gauge in step with spawned job loops
struct ActiveJobGuard;

impl ActiveJobGuard {
    fn new() -> Self {
        metrics::BACKGROUND_JOBS_ACTIVE.inc();
        Self
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        metrics::BACKGROUND_JOBS_ACTIVE.dec();
    }
}

impl JobScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            jobs: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Scheduler on the runtime of the calling context
    pub fn current() -> ResolverResult<Self> {
        let handle = Handle::try_current().map_err(|e| {
            ResolverError::Configuration(format!(
                "No tokio runtime available for background jobs: {}",
                e
            ))
        })?;
        Ok(Self::new(handle))
    }

    /// Run `job` after `initial_delay` and then every `period`
    ///
    /// Failed runs are logged and the job keeps its schedule; a run returning
    /// [`JobStatus::Stop`] ends the job.
    pub fn schedule<F, Fut>(
        &self,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        job: F,
    ) -> ResolverResult<ScheduledJob>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult<JobStatus>> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(ResolverError::Resolution(
                "Job scheduler has been shut down".to_string(),
            ));
        }

        if period.is_zero() {
            return Err(ResolverError::Configuration(format!(
                "Background job '{}' needs a positive period",
                name
            )));
        }

        let job_name = name.to_string();
        let task = self.handle.spawn(async move {
            let _active = ActiveJobGuard::new();
            let start = tokio::time::Instant::now() + initial_delay;
            let mut interval = interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                debug!("Running background job '{}'", job_name);

                let started = Instant::now();
                let result = job().await;
                let elapsed = started.elapsed().as_secs_f64();

                match result {
                    Ok(JobStatus::Continue) => {
                        metrics::record_background_job(&job_name, "success", elapsed);
                    }
                    Ok(JobStatus::Stop) => {
                        metrics::record_background_job(&job_name, "success", elapsed);
                        info!("Background job '{}' stopped", job_name);
                        break;
                    }
                    Err(e) => {
                        metrics::record_background_job(&job_name, "failure", elapsed);
                        error!("Background job '{}' failed: {}", job_name, e);
                    }
                }
            }
        });

        let handle = task.abort_handle();
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            jobs.retain(|h| !h.is_finished());
            jobs.push(handle.clone());
        }

        info!(
            "Scheduled background job '{}' (initial delay {:?}, every {:?})",
            name, initial_delay, period
        );

        Ok(ScheduledJob {
            name: name.to_string(),
            handle,
        })
    }

    /// Abort every job and refuse new ones
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap_or_else(PoisonError::into_inner));
        info!("Shutting down job scheduler ({} jobs)", jobs.len());
        for job in jobs {
            job.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Jobs that have not finished or been cancelled
    pub fn active_jobs(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}
