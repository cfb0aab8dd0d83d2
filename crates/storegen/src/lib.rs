pub mod broadcast;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod queue;
pub mod secrets;
pub mod service;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use collaborators::{CollaboratorError, Collaborators};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, Result, StoregenError, WorkerError};
pub use jobs::{Job, JobFilter, JobStatus, JobStore, JobStoreError, NewJob, StepRecord};
pub use pipeline::{Pipeline, PipelineError, StepName, StepOutput};
pub use queue::{JobQueue, QueueError, RetryPolicy};
pub use service::{build_collaborators, PipelineService};
pub use worker::{DeliveryOutcome, WorkerPool, WorkerSettings};
