//! Domain error taxonomy for the scheduler and publish pipeline.
//!
//! Mirrors the split used throughout this crate: `SchedulerError` for
//! conditions callers must match on and handle, `anyhow::Result` at the
//! binary/application boundary for everything else.

use thiserror::Error;

use crate::kernel::jobs::job::JobStatus;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
