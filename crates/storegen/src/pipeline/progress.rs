use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobProgressEvent, JobProgressTracker};

use super::step::StepName;

/// Events emitted by the pipeline during processing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StepStarted { step: StepName },
    StepCompleted { step: StepName },
    /// Completed by an earlier attempt; output restored instead of re-run.
    StepSkipped { step: StepName },
    Completed { product_id: String },
    Failed { step: Option<StepName>, error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to the job progress broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(job_id: i64, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            tracker: JobProgressTracker::new(job_id, sender),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StepStarted { step } => {
                self.tracker.step(step, &format!("Running {}...", step));
            }
            ProgressEvent::StepCompleted { step } => {
                self.tracker.step(step, &format!("Finished {}", step));
            }
            ProgressEvent::StepSkipped { step } => {
                self.tracker
                    .step(step, &format!("Skipped {} (completed earlier)", step));
            }
            ProgressEvent::Completed { product_id } => {
                self.tracker.completed(&product_id);
            }
            ProgressEvent::Failed { step, error } => {
                self.tracker.failed(step, &error);
            }
        }
    }
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for Arc<T> {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}
