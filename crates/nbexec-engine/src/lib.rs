//! nbexec Engine Library
//!
//! Core functionality for the nbexec orchestrator:
//! - Background job management for notebook execution-engine processes
//! - Bounded admission with an in-memory job registry
//! - Append-only per-job log capture with offset pagination
//! - Kernel sessions executing code fragments over a message channel
//!
//! Job state lives in memory only; restarting the embedding process loses
//! all job history.

pub mod job;
pub mod kernel;
