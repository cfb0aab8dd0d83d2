pub mod context;
pub mod error;
pub mod executors;
pub mod progress;
pub mod runner;
pub mod step;

pub use context::PipelineContext;
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::Pipeline;
pub use step::{StepName, StepOutput};
