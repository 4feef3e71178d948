use crate::{
    error::JobError,
    executor::Executor,
    job::{DeviceAddress, JobSpec},
    pipeline::{DeviceRecord, DeviceStatus, Pipeline, panic_message},
    progress::{Progress, ProgressView},
    report::Report,
    util::now_rfc3339,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Run-level cancellation flag, cheap to clone into workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fixed pool of `workers` threads pulling items in input order.
///
/// Each item is handed to `work` at most once; once `cancel` is set, idle
/// workers stop pulling and items not yet taken are never visited.
pub fn worker_pool<T, F>(items: &[T], workers: usize, cancel: &CancelToken, work: F)
where
    T: Sync,
    F: Fn(usize, &T) + Sync,
{
    if items.is_empty() {
        return;
    }
    let workers = workers.clamp(1, items.len());
    let next = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let next = &next;
            let work = &work;
            scope.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(i) else {
                        break;
                    };
                    work(i, item);
                }
            });
        }
    });
}

/// Fans device pipelines out over a bounded worker pool.
pub struct Scheduler<E: Executor> {
    pipeline: Arc<Pipeline<E>>,
}

impl<E: Executor> Clone for Scheduler<E> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<E: Executor + 'static> Scheduler<E> {
    pub fn new(executor: E) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(executor)),
        }
    }

    pub fn pipeline(&self) -> &Pipeline<E> {
        &self.pipeline
    }

    /// Run every device to completion on the calling thread.
    pub fn run_all(
        &self,
        job: &JobSpec,
        progress: &Progress,
        cancel: &CancelToken,
    ) -> Result<(), JobError> {
        progress.begin(job)?;
        self.dispatch(job, progress, cancel);
        Ok(())
    }

    /// Start a run in the background. The run is registered with `progress`
    /// before this returns, so a concurrent `begin` sees it as running.
    pub fn spawn(&self, job: Arc<JobSpec>, progress: Arc<Progress>) -> Result<RunHandle, JobError> {
        progress.begin(&job)?;
        let cancel = CancelToken::new();

        let scheduler = self.clone();
        let (job_t, progress_t, cancel_t) = (Arc::clone(&job), Arc::clone(&progress), cancel.clone());
        let thread = std::thread::Builder::new()
            .name("fleet-run".into())
            .spawn(move || scheduler.dispatch(&job_t, &progress_t, &cancel_t))
            .map_err(|e| JobError::state(format!("failed to start run thread: {e}")))?;

        Ok(RunHandle {
            job,
            progress,
            cancel,
            thread,
        })
    }

    fn dispatch(&self, job: &JobSpec, progress: &Progress, cancel: &CancelToken) {
        let total = job.devices.len();
        let done = AtomicUsize::new(0);
        info!(
            "run started: devices={} workers={} steps={:?}",
            total,
            job.concurrency,
            job.configured_steps()
        );

        worker_pool(&job.devices, job.concurrency, cancel, |_, device| {
            progress.mark_started(device);
            let record = catch_unwind(AssertUnwindSafe(|| {
                self.pipeline.run_cancellable(device, job, cancel)
            }))
            .unwrap_or_else(|payload| {
                error!(
                    "pipeline for {device} panicked: {}",
                    panic_message(payload.as_ref())
                );
                panicked_record(device)
            });

            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            match record.failure() {
                Some(f) => info!(
                    "completed {n}/{total}: {device} - {:?} ({} failed: {})",
                    record.status, f.step, f.diagnostic
                ),
                None => info!("completed {n}/{total}: {device} - {:?}", record.status),
            }
            progress.record(record);
        });

        let mut skipped = 0usize;
        for device in &job.devices {
            if !progress.has_record(device) {
                progress.record(DeviceRecord::skipped(device));
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!("run cancelled: {skipped} device(s) skipped");
        }

        progress.finish();
        info!("run finished");
    }
}

fn panicked_record(device: &DeviceAddress) -> DeviceRecord {
    DeviceRecord {
        device: device.clone(),
        started_at: now_rfc3339(),
        steps: Vec::new(),
        status: DeviceStatus::Failed,
        total: Duration::ZERO,
    }
}

/// Handle to a background run.
pub struct RunHandle {
    job: Arc<JobSpec>,
    progress: Arc<Progress>,
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl RunHandle {
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn snapshot(&self) -> ProgressView {
        self.progress.snapshot()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the run is done and build its report.
    pub fn wait(self) -> Result<Report, JobError> {
        self.thread
            .join()
            .map_err(|_| JobError::state("run thread panicked"))?;
        Report::build(&self.progress.state(), &self.job)
    }
}
