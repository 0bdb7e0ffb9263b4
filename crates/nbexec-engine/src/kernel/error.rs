//! Kernel API errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Kernel not found: {id}")]
    NotFound { id: String },

    #[error("Kernel already registered: {id}")]
    AlreadyRegistered { id: String },

    #[error("Kernel channel error: {0}")]
    Channel(String),

    #[error("Kernel worker error: {0}")]
    Worker(String),

    #[error("Malformed kernel message: {0}")]
    Malformed(String),
}
