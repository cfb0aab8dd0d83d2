use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::jobs::{JobStatus, JobStoreError};

use super::step::StepName;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Step {step} failed: {source}")]
    Step {
        step: StepName,
        #[source]
        source: CollaboratorError,
    },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: i64 },

    #[error("Job {job_id} is already completed")]
    AlreadyCompleted { job_id: i64 },

    #[error("Job {job_id} has no recorded output for completed step {step}")]
    MissingOutput { job_id: i64, step: StepName },

    #[error(transparent)]
    Store(JobStoreError),
}

impl PipelineError {
    /// Maps a job store error. Only a job that was actually cancelled
    /// becomes `Cancelled`; a step found in an unexpected state means
    /// another delivery took the job over and stays a store error.
    pub fn from_store(job_id: i64, error: JobStoreError) -> Self {
        match error {
            JobStoreError::Cancelled(_) => PipelineError::Cancelled { job_id },
            JobStoreError::InvalidState {
                status: JobStatus::Completed,
                ..
            } => PipelineError::AlreadyCompleted { job_id },
            other => PipelineError::Store(other),
        }
    }

    /// Whether the queue may redeliver the job after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Step {
                source: CollaboratorError::ShopNotConnected(_),
                ..
            } => false,
            PipelineError::Step { .. } => true,
            PipelineError::Store(JobStoreError::Database(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_job_maps_to_cancelled() {
        let err = PipelineError::from_store(3, JobStoreError::Cancelled(3));
        assert!(matches!(err, PipelineError::Cancelled { job_id: 3 }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_step_state_mismatch_is_not_cancellation() {
        let err = PipelineError::from_store(
            3,
            JobStoreError::InvalidState {
                job_id: 3,
                status: JobStatus::Pending,
                action: "transition step of",
            },
        );
        assert!(matches!(
            err,
            PipelineError::Store(JobStoreError::InvalidState { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_completed_job_is_not_cancelled() {
        let err = PipelineError::from_store(
            3,
            JobStoreError::InvalidState {
                job_id: 3,
                status: JobStatus::Completed,
                action: "start attempt of",
            },
        );
        assert!(matches!(err, PipelineError::AlreadyCompleted { job_id: 3 }));
    }

    #[test]
    fn test_step_errors_are_retryable() {
        let err = PipelineError::Step {
            step: StepName::Scrape,
            source: CollaboratorError::request("scraper", "timeout"),
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Step scrape failed: scraper request failed: timeout"
        );
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let missing_shop = PipelineError::Step {
            step: StepName::UploadTheme,
            source: CollaboratorError::ShopNotConnected(99),
        };
        assert!(!missing_shop.is_retryable());
        assert!(!PipelineError::Store(JobStoreError::NotFound(5)).is_retryable());
        assert!(!PipelineError::Store(JobStoreError::Validation("bad url".into())).is_retryable());
        assert!(!PipelineError::MissingOutput {
            job_id: 5,
            step: StepName::Scrape,
        }
        .is_retryable());
    }
}
