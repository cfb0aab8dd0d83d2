use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broadcast::job_progress::JobProgressEvent;
use crate::error::WorkerError;
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressReporter};
use crate::pipeline::{Pipeline, PipelineError};
use crate::queue::{Delivery, FailOutcome, JobQueue, QueueError};

/// Tuning of a [`WorkerPool`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub worker_count: usize,
    /// Sleep between queue polls while idle.
    pub poll_interval: Duration,
    /// How often stalled messages on their final attempt are reaped.
    pub reap_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval: Duration::from_millis(500),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// How one delivery ended, reported to the pool owner.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Completed {
        job_id: i64,
        product_id: String,
        attempt: u32,
    },
    /// The attempt failed; the queue redelivers after `delay`.
    Retrying {
        job_id: i64,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Acknowledged without running, e.g. the job was cancelled.
    Discarded { job_id: i64, reason: String },
    /// The lease expired and another delivery owns the message now. The
    /// job is left to that delivery.
    LeaseLost { job_id: i64, attempt: u32 },
    Failed(WorkerError),
}

impl DeliveryOutcome {
    pub fn job_id(&self) -> Option<i64> {
        match self {
            DeliveryOutcome::Completed { job_id, .. }
            | DeliveryOutcome::Retrying { job_id, .. }
            | DeliveryOutcome::Discarded { job_id, .. }
            | DeliveryOutcome::LeaseLost { job_id, .. } => Some(*job_id),
            DeliveryOutcome::Failed(
                WorkerError::PermanentFailure { job_id, .. }
                | WorkerError::Queue { job_id, .. }
                | WorkerError::Store { job_id, .. },
            ) => Some(*job_id),
            DeliveryOutcome::Failed(_) => None,
        }
    }
}

/// Fixed-size pool of worker threads pulling deliveries from the queue.
pub struct WorkerPool {
    result_receiver: Receiver<DeliveryOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

struct WorkerContext {
    worker_id: String,
    pipeline: Arc<Pipeline>,
    queue: JobQueue,
    settings: WorkerSettings,
    reaper: bool,
    result_sender: Sender<DeliveryOutcome>,
    shutdown: Arc<AtomicBool>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
}

impl WorkerPool {
    /// Spawns `settings.worker_count` worker threads. Each claims one
    /// message at a time and runs its job to the end before the next.
    pub fn start(
        pipeline: Arc<Pipeline>,
        queue: JobQueue,
        settings: WorkerSettings,
        progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    ) -> Result<Self, WorkerError> {
        if settings.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (result_sender, result_receiver) =
            bounded::<DeliveryOutcome>(settings.worker_count * 4);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(settings.worker_count);
        let instance = Uuid::new_v4().simple().to_string();

        for index in 0..settings.worker_count {
            let ctx = WorkerContext {
                worker_id: format!("{}-{}", instance, index),
                pipeline: Arc::clone(&pipeline),
                queue: queue.clone(),
                settings,
                reaper: index == 0,
                result_sender: result_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                progress_sender: progress_sender.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("storegen-worker-{}", index))
                .spawn(move || run_worker(ctx));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", settings.worker_count);

        Ok(Self {
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn try_recv_result(&self) -> Option<DeliveryOutcome> {
        self.result_receiver.try_recv().ok()
    }

    /// Blocks until an outcome arrives or every worker has exited.
    pub fn recv_result(&self) -> Option<DeliveryOutcome> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<DeliveryOutcome> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Asks workers to stop claiming. Jobs in flight run to completion.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Joins all workers. Returns outcomes not yet received.
    pub fn wait(self) -> Vec<DeliveryOutcome> {
        let mut pending = Vec::new();
        for (i, worker) in self.workers.into_iter().enumerate() {
            // Keep the bounded channel from blocking a draining worker
            while !worker.is_finished() {
                match self.result_receiver.recv_timeout(Duration::from_millis(50)) {
                    Ok(outcome) => pending.push(outcome),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        pending.extend(self.result_receiver.try_iter());

        info!("All workers have stopped");
        pending
    }
}

fn run_worker(ctx: WorkerContext) {
    debug!("Worker {} started", ctx.worker_id);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Worker {} could not start its runtime: {}", ctx.worker_id, e);
            let _ = ctx
                .result_sender
                .send(DeliveryOutcome::Failed(WorkerError::SpawnFailed(e.to_string())));
            return;
        }
    };

    let mut last_reap: Option<Instant> = None;

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", ctx.worker_id);
            break;
        }

        if ctx.reaper && last_reap.map_or(true, |t| t.elapsed() >= ctx.settings.reap_interval) {
            last_reap = Some(Instant::now());
            if !reap_stalled(&ctx) {
                break;
            }
        }

        let delivery = match ctx.queue.claim(&ctx.worker_id, Utc::now()) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                thread::sleep(ctx.settings.poll_interval);
                continue;
            }
            Err(e) => {
                error!("Worker {} failed to claim from queue: {}", ctx.worker_id, e);
                thread::sleep(ctx.settings.poll_interval);
                continue;
            }
        };

        debug!(
            "Worker {} processing job {} (attempt {}/{})",
            ctx.worker_id, delivery.job_id, delivery.attempt, delivery.max_attempts
        );

        let outcome = process_delivery(&ctx, &runtime, &delivery);
        if let Err(e) = ctx.result_sender.send(outcome) {
            error!("Worker {} failed to send result: {}", ctx.worker_id, e);
            break;
        }
    }

    debug!("Worker {} stopped", ctx.worker_id);
}

/// Fails the jobs of messages that stalled on their final attempt.
/// Returns `false` once the outcome channel is gone.
fn reap_stalled(ctx: &WorkerContext) -> bool {
    let reaped = match ctx.queue.reap_exhausted(Utc::now()) {
        Ok(reaped) => reaped,
        Err(e) => {
            warn!("Failed to reap stalled messages: {}", e);
            return true;
        }
    };

    for message in reaped {
        let error = "worker stopped responding on the final attempt".to_string();
        let outcome = match ctx.pipeline.store().fail_job(message.job_id, &error) {
            Ok(_) => DeliveryOutcome::Failed(WorkerError::PermanentFailure {
                job_id: message.job_id,
                attempts: message.attempts,
                error,
            }),
            Err(source) => DeliveryOutcome::Failed(WorkerError::Store {
                job_id: message.job_id,
                source,
            }),
        };
        if ctx.result_sender.send(outcome).is_err() {
            return false;
        }
    }
    true
}

/// Renews the delivery's lease three times per lease period. Returns once
/// the lease is lost.
async fn keep_lease(queue: &JobQueue, delivery: &Delivery) {
    let period = (queue.lease() / 3).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match queue.extend_lease(delivery, Utc::now()) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Lease on message {} (job {}) was lost",
                    delivery.message_id, delivery.job_id
                );
                return;
            }
            Err(e) => warn!(
                "Failed to extend lease on message {}: {}",
                delivery.message_id, e
            ),
        }
    }
}

fn process_delivery(
    ctx: &WorkerContext,
    runtime: &tokio::runtime::Runtime,
    delivery: &Delivery,
) -> DeliveryOutcome {
    let progress: Box<dyn ProgressReporter> = match &ctx.progress_sender {
        Some(sender) => Box::new(BroadcastProgress::new(delivery.job_id, Arc::clone(sender))),
        None => Box::new(NoopProgress),
    };

    let result = runtime.block_on(async {
        let run = ctx.pipeline.run(delivery.job_id, progress.as_ref());
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            () = keep_lease(&ctx.queue, delivery) => run.await,
        }
    });
    settle(ctx, delivery, result)
}

/// Acknowledges the message according to the run's result.
fn settle(
    ctx: &WorkerContext,
    delivery: &Delivery,
    result: Result<String, PipelineError>,
) -> DeliveryOutcome {
    let job_id = delivery.job_id;
    let now = Utc::now();
    let queue_failure = |source: QueueError| match source {
        QueueError::LeaseLost { .. } => {
            warn!(
                "Job {} attempt {} was superseded by another delivery",
                job_id, delivery.attempt
            );
            DeliveryOutcome::LeaseLost {
                job_id,
                attempt: delivery.attempt,
            }
        }
        source => DeliveryOutcome::Failed(WorkerError::Queue { job_id, source }),
    };

    match result {
        Ok(product_id) => match ctx.queue.complete(delivery, now) {
            Ok(()) => {
                info!("Job {} completed (product {})", job_id, product_id);
                DeliveryOutcome::Completed {
                    job_id,
                    product_id,
                    attempt: delivery.attempt,
                }
            }
            Err(e) => queue_failure(e),
        },
        Err(err @ (PipelineError::Cancelled { .. } | PipelineError::AlreadyCompleted { .. })) => {
            let reason = err.to_string();
            info!("Job {}: {}, dropping message", job_id, reason);
            match ctx.queue.discard(delivery, &reason, now) {
                Ok(()) => DeliveryOutcome::Discarded { job_id, reason },
                Err(e) => queue_failure(e),
            }
        }
        Err(err) if err.is_retryable() => {
            let error = err.to_string();
            match ctx.queue.fail(delivery, &error, now) {
                Ok(FailOutcome::Retry { delay, attempt }) => {
                    warn!(
                        "Job {} failed on attempt {}, retrying in {:?}: {}",
                        job_id, attempt, delay, error
                    );
                    DeliveryOutcome::Retrying {
                        job_id,
                        attempt,
                        delay,
                        error,
                    }
                }
                Ok(FailOutcome::Exhausted { attempts }) => {
                    fail_permanently(ctx, job_id, attempts, error)
                }
                Err(e) => queue_failure(e),
            }
        }
        Err(err) => {
            let error = err.to_string();
            if let Err(e) = ctx.queue.discard(delivery, &error, now) {
                return queue_failure(e);
            }
            fail_permanently(ctx, job_id, delivery.attempt, error)
        }
    }
}

fn fail_permanently(
    ctx: &WorkerContext,
    job_id: i64,
    attempts: u32,
    error: String,
) -> DeliveryOutcome {
    error!(
        "Job {} failed permanently after {} attempts: {}",
        job_id, attempts, error
    );
    match ctx.pipeline.store().fail_job(job_id, &error) {
        Ok(_) => DeliveryOutcome::Failed(WorkerError::PermanentFailure {
            job_id,
            attempts,
            error,
        }),
        Err(source) => DeliveryOutcome::Failed(WorkerError::Store { job_id, source }),
    }
}
