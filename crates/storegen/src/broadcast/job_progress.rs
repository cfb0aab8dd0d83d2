//! Live progress of store-generation jobs over a tokio broadcast channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::JobStatus;
use crate::pipeline::step::StepName;

/// Coarse phase shown to status consumers. One per step plus the ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Scraping,
    Generating,
    BuildingTheme,
    UploadingTheme,
    CreatingProduct,
    CreatingPages,
    Completed,
    Failed,
}

impl From<StepName> for JobPhase {
    fn from(step: StepName) -> Self {
        match step {
            StepName::Scrape => JobPhase::Scraping,
            StepName::AiGenerate => JobPhase::Generating,
            StepName::BuildTheme => JobPhase::BuildingTheme,
            StepName::UploadTheme => JobPhase::UploadingTheme,
            StepName::CreateProduct => JobPhase::CreatingProduct,
            StepName::CreatePages => JobPhase::CreatingPages,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Scraping => write!(f, "Scraping product"),
            JobPhase::Generating => write!(f, "Generating content"),
            JobPhase::BuildingTheme => write!(f, "Building theme"),
            JobPhase::UploadingTheme => write!(f, "Uploading theme"),
            JobPhase::CreatingProduct => write!(f, "Creating product"),
            JobPhase::CreatingPages => write!(f, "Creating pages"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// One progress update, serialized as camelCase JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: i64,
    pub phase: JobPhase,
    /// Overall job status.
    pub status: JobStatus,
    /// Step the event refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepName>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Shopify product id (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: i64, phase: JobPhase, message: &str) -> Self {
        let status = match phase {
            JobPhase::Queued => JobStatus::Pending,
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        };

        Self {
            job_id,
            phase,
            status,
            step: None,
            message: message.to_string(),
            timestamp: Utc::now(),
            product_id: None,
            error: None,
        }
    }

    /// Creates an event for a step transition.
    pub fn for_step(job_id: i64, step: StepName, message: &str) -> Self {
        Self {
            step: Some(step),
            ..Self::new(job_id, step.into(), message)
        }
    }

    pub fn completed(job_id: i64, product_id: &str) -> Self {
        Self {
            product_id: Some(product_id.to_string()),
            ..Self::new(job_id, JobPhase::Completed, "Store generation completed")
        }
    }

    pub fn failed(job_id: i64, step: Option<StepName>, error: &str) -> Self {
        Self {
            step,
            error: Some(error.to_string()),
            ..Self::new(job_id, JobPhase::Failed, "Store generation failed")
        }
    }
}

/// Fan-out of job progress events. Clones share the channel.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes `event`. Dropped silently without subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for a job and announces it as queued.
    pub fn start_job(&self, job_id: i64) -> JobProgressTracker {
        let tracker = JobProgressTracker::new(job_id, Arc::clone(&self.sender));
        tracker.update_phase(JobPhase::Queued, "Job queued for processing");
        tracker
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Publishes events for one job.
pub struct JobProgressTracker {
    job_id: i64,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: i64, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self { job_id, sender }
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::new(self.job_id, phase, message));
    }

    pub fn step(&self, step: StepName, message: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::for_step(self.job_id, step, message));
    }

    pub fn completed(&self, product_id: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::completed(self.job_id, product_id));
    }

    pub fn failed(&self, step: Option<StepName>, error: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::failed(self.job_id, step, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new(4, JobPhase::Scraping, "Testing"));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, 4);
        assert_eq!(received.phase, JobPhase::Scraping);
        assert_eq!(received.status, JobStatus::Processing);
    }

    #[test]
    fn test_start_job_announces_queued() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start_job(1);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::Queued);
        assert_eq!(received.status, JobStatus::Pending);

        tracker.step(StepName::UploadTheme, "Uploading theme...");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::UploadingTheme);
        assert_eq!(received.step, Some(StepName::UploadTheme));
    }

    #[test]
    fn test_completion_and_failure() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = JobProgressTracker::new(2, broadcaster.sender());

        tracker.completed("8001");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.product_id.as_deref(), Some("8001"));

        tracker.failed(Some(StepName::CreateProduct), "HTTP 422");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Failed);
        assert_eq!(received.step, Some(StepName::CreateProduct));
        assert_eq!(received.error.as_deref(), Some("HTTP 422"));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let json = serde_json::to_value(JobProgressEvent::completed(9, "77")).unwrap();
        assert_eq!(json["jobId"], 9);
        assert_eq!(json["productId"], "77");
        assert_eq!(json["phase"], "completed");
        assert!(json.get("error").is_none());
    }
}
