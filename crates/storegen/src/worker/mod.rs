pub mod pool;

pub use pool::{DeliveryOutcome, WorkerPool, WorkerSettings};
