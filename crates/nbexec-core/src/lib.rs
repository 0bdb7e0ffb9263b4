//! `nbexec` Core Library
//!
//! Shared functionality for `nbexec` components:
//! - Layered configuration loading
//! - Execution timeout calibration rules
//! - Tracing/logging initialization
//! - Config error types

pub mod config;
pub mod error;
pub mod timeout;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use timeout::{TimeoutEstimator, TimeoutRule};
