//! Shared test utilities for storegen integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a real job store and queue to scripted fake collaborators
//! - Builders for job input and collaborator payloads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
