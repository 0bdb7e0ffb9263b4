//! Background job execution: registry, runner, manager, and command boundary.
//!
//! - [`JobRegistry`]: single-lock in-memory store for job state and logs.
//! - [`ProcessRunner`]: spawns one engine process per job, captures both
//!   output streams, and enforces the deadline with terminate-then-kill.
//! - [`JobManager`]: high-level coordinator for submission, queries,
//!   cancellation, and cleanup.
//! - [`JobCommand`]: closed command enum for embedding surfaces.

pub mod command;
pub mod error;
pub mod manager;
pub mod registry;
pub mod runner;
pub mod types;

pub use command::{JobCommand, JobReply};
pub use error::JobError;
pub use manager::JobManager;
pub use registry::JobRegistry;
pub use runner::{ProcessRunner, RunSpec};
pub use types::{JobRequest, JobStatus, JobView, LogChunk, LogLine, RunOutcome, StreamKind};
