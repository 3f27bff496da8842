// Job scheduler
// Runs a batch at bounded parallelism: a single coordinator owns the batch
// state, workers drive one job each through the driver

use crate::constants::scheduling::AGGREGATE_EMIT_INTERVAL_MS;
use crate::driver::{run_job, DriverOptions};
use crate::job::{BatchReport, Job, JobResult};
use crate::progress::{ProgressEvent, ProgressStage};
use crate::sandbox::{ProcessSandbox, SandboxPolicy};
use crate::toolchain::Toolchain;
use crate::transcode::TranscodeSpec;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Scheduler knobs for one batch
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Worker-slot count; in-flight jobs never exceed this
    pub parallelism: usize,

    /// Abort the batch on the first fatal-class failure
    pub stop_on_fatal: bool,

    /// Per-job driver settings
    pub driver: DriverOptions,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            stop_on_fatal: false,
            driver: DriverOptions::default(),
        }
    }
}

/// Batch-level completion estimate
#[derive(Debug, Clone, Copy)]
pub struct AggregateProgress {
    /// Completion fraction across the whole batch, in [0, 1]
    pub fraction: f64,

    /// Jobs with a sealed result
    pub completed: usize,

    /// Jobs in the batch
    pub total: usize,
}

/// Executes batches of jobs against one sandbox and toolchain
pub struct Scheduler {
    spec: Arc<TranscodeSpec>,
    policy: Arc<SandboxPolicy>,
    sandbox: Arc<ProcessSandbox>,
    toolchain: Arc<Toolchain>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        spec: TranscodeSpec,
        policy: SandboxPolicy,
        sandbox: Arc<ProcessSandbox>,
        toolchain: Toolchain,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            spec: Arc::new(spec),
            policy: Arc::new(policy),
            sandbox,
            toolchain: Arc::new(toolchain),
            options,
        }
    }

    /// Run a batch to completion
    ///
    /// Every job yields exactly one terminal JobResult, in seal order.
    /// Submission is FIFO; completion order is whatever the workers produce.
    /// Cancelling `cancel` stops new submissions, terminates what is in
    /// flight (5 s grace inside the driver), and seals the untouched
    /// remainder of the queue as cancelled. Aggregate progress lands on
    /// `progress_sink` at most four times a second and never decreases.
    pub async fn process(
        &self,
        jobs: Vec<Job>,
        cancel: CancellationToken,
        progress_sink: Option<mpsc::Sender<AggregateProgress>>,
    ) -> BatchReport {
        let started_at = Utc::now();
        let total = jobs.len();
        let parallelism = self.options.parallelism.max(1);
        info!(
            "starting batch of {} job(s) at parallelism {}",
            total, parallelism
        );

        let mut pending: VecDeque<Job> = jobs.into();
        let mut results: Vec<JobResult> = Vec::with_capacity(total);

        // Workers hold a child of the caller's token so a fatal abort can
        // stop the batch without cancelling the caller
        let worker_cancel = cancel.child_token();

        let mut workers: JoinSet<JobResult> = JoinSet::new();
        // Task id -> job, so even a panicked worker still seals a result
        let mut in_flight: HashMap<tokio::task::Id, Job> = HashMap::new();
        let mut progress_taps: HashMap<String, watch::Receiver<ProgressEvent>> = HashMap::new();
        let mut latest: HashMap<String, f64> = HashMap::new();

        let mut aggregate = Aggregate::new(total, progress_sink);
        let mut ticker =
            tokio::time::interval(Duration::from_millis(AGGREGATE_EMIT_INTERVAL_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut aborting = false;

        loop {
            // Fill free worker slots FIFO from the queue
            while !aborting && workers.len() < parallelism && !pending.is_empty() {
                if let Some(job) = pending.pop_front() {
                    debug!("submitting job {} ({})", job.id, job.input_path.display());
                    let (tap_tx, tap_rx) = watch::channel(ProgressEvent::new(
                        &job.id,
                        0.0,
                        ProgressStage::Probing,
                    ));
                    progress_taps.insert(job.id.clone(), tap_rx);

                    let spec = Arc::clone(&self.spec);
                    let policy = Arc::clone(&self.policy);
                    let sandbox = Arc::clone(&self.sandbox);
                    let toolchain = Arc::clone(&self.toolchain);
                    let token = worker_cancel.clone();
                    let driver_options = self.options.driver.clone();

                    let worker_job = job.clone();
                    let task_id = workers
                        .spawn(async move {
                            run_job(
                                &worker_job,
                                &spec,
                                &policy,
                                &sandbox,
                                &toolchain,
                                &tap_tx,
                                &token,
                                &driver_options,
                            )
                            .await
                        })
                        .id();
                    in_flight.insert(task_id, job);
                }
            }

            if workers.is_empty() && (pending.is_empty() || aborting) {
                break;
            }

            tokio::select! {
                joined = workers.join_next_with_id(), if !workers.is_empty() => {
                    let Some(joined) = joined else { continue };
                    let result = match joined {
                        Ok((task_id, result)) => {
                            in_flight.remove(&task_id);
                            result
                        }
                        Err(join_error) => {
                            warn!("worker task failed: {}", join_error);
                            match in_flight.remove(&join_error.id()) {
                                Some(job) => worker_crash_result(&job),
                                None => continue,
                            }
                        }
                    };

                    // Retire the job's progress contribution; from here on
                    // it counts through `completed`
                    progress_taps.remove(&result.job_id);
                    latest.remove(&result.job_id);
                    aggregate.complete_one();
                    aggregate.update(latest.values().copied().sum());
                    aggregate.emit();

                    if self.options.stop_on_fatal
                        && result.error_kind.is_some_and(|k| k.is_fatal())
                        && !aborting
                    {
                        warn!(
                            "fatal failure ({}) on {}, aborting batch",
                            result.error_kind.map(|k| k.to_string()).unwrap_or_default(),
                            result.input_path.display()
                        );
                        aborting = true;
                        worker_cancel.cancel();
                    }

                    results.push(result);
                }
                _ = ticker.tick() => {
                    for (job_id, tap) in &mut progress_taps {
                        let fraction = tap.borrow_and_update().fraction;
                        latest.insert(job_id.clone(), fraction);
                    }
                    aggregate.update(latest.values().copied().sum());
                    aggregate.emit();
                }
                _ = cancel.cancelled(), if !aborting => {
                    info!("cancellation requested, draining in-flight jobs");
                    aborting = true;
                }
            }
        }

        // Whatever never left the queue still seals a terminal result
        for job in pending.drain(..) {
            debug!("sealing queued job {} as cancelled", job.id);
            results.push(JobResult::cancelled(&job, Utc::now()));
            aggregate.complete_one();
        }
        aggregate.update(0.0);
        aggregate.emit();

        let report = BatchReport::new(results, started_at, Utc::now());
        info!("batch finished: {}", report.summary_line());
        report
    }
}

/// Seal a result for a worker that died without producing one
fn worker_crash_result(job: &Job) -> JobResult {
    JobResult {
        job_id: job.id.clone(),
        input_path: job.input_path.clone(),
        status: crate::job::JobStatus::Failed,
        started_at: Utc::now(),
        ended_at: Utc::now(),
        exit_code: None,
        error_kind: None,
        message: Some("worker task panicked".to_string()),
        stderr_tail: Vec::new(),
    }
}

/// Monotone aggregate progress with rate-limited emission
struct Aggregate {
    total: usize,
    completed: usize,
    in_flight_sum: f64,
    last_emitted: f64,
    emitted_once: bool,
    sink: Option<mpsc::Sender<AggregateProgress>>,
}

impl Aggregate {
    fn new(total: usize, sink: Option<mpsc::Sender<AggregateProgress>>) -> Self {
        Self {
            total,
            completed: 0,
            in_flight_sum: 0.0,
            last_emitted: 0.0,
            emitted_once: false,
            sink,
        }
    }

    fn complete_one(&mut self) {
        self.completed += 1;
    }

    fn update(&mut self, in_flight_sum: f64) {
        self.in_flight_sum = in_flight_sum;
    }

    fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let raw = (self.completed as f64 + self.in_flight_sum) / self.total as f64;
        // A failed job's contribution drops to zero when it is retired, but
        // the batch fraction itself never regresses
        raw.clamp(0.0, 1.0).max(self.last_emitted)
    }

    fn emit(&mut self) {
        let fraction = self.fraction();
        if self.emitted_once && fraction <= self.last_emitted {
            return;
        }
        self.last_emitted = fraction;
        self.emitted_once = true;
        if let Some(sink) = &self.sink {
            // Advisory stream: drop on a full sink rather than block
            let _ = sink.try_send(AggregateProgress {
                fraction,
                completed: self.completed,
                total: self.total,
            });
        }
    }
}
