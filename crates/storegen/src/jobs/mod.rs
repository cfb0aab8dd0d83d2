//! Job model and its durable store.

pub mod model;
pub mod store;

pub use model::{Job, JobCounts, JobFilter, JobStatus, NewJob, StepRecord};
pub use store::{JobStore, JobStoreError, StepTransition, CANCELLED_MESSAGE};
