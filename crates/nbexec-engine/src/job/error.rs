//! Job API errors.
//!
//! Only problems with the request itself surface as errors. Execution
//! problems (spawn failures, non-zero exits, timeouts) are recorded on the
//! job as a terminal outcome instead.

use thiserror::Error;

use crate::job::types::JobStatus;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Concurrency limit reached ({active}/{max})")]
    CapacityExceeded { active: usize, max: usize },

    #[error("Job not found: {id}")]
    NotFound { id: String },

    #[error("Job {id} is {status} and cannot be canceled")]
    NotCancelable { id: String, status: JobStatus },
}
