//! Broadcasting of live job progress to status consumers.

pub mod job_progress;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
