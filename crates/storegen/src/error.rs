use std::path::PathBuf;
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::jobs::JobStoreError;
use crate::queue::QueueError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum StoregenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Secret '{name}' could not be resolved: {source}")]
    Secret {
        name: &'static str,
        #[source]
        source: SecretError,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Job {job_id} failed permanently after {attempts} attempts: {error}")]
    PermanentFailure {
        job_id: i64,
        attempts: u32,
        error: String,
    },

    #[error("Queue error while settling job {job_id}: {source}")]
    Queue {
        job_id: i64,
        #[source]
        source: QueueError,
    },

    #[error("Job store error while settling job {job_id}: {source}")]
    Store {
        job_id: i64,
        #[source]
        source: JobStoreError,
    },
}

pub type Result<T> = std::result::Result<T, StoregenError>;
