//! Interactive kernel execution.
//!
//! A [`KernelSession`] drives code fragments through a message channel to a
//! kernel worker process and folds the replies into an execution result.
//! The channel and worker sit behind traits so sessions can run against any
//! transport; [`KernelRegistry`] keys live sessions by id.

pub mod channel;
pub mod error;
pub mod registry;
pub mod session;
pub mod wire;
pub mod worker;

pub use channel::{ExecuteRequest, JsonChannel, KernelChannel};
pub use error::KernelError;
pub use registry::KernelRegistry;
pub use session::{ExecutionResult, ExecutionStatus, KernelSession, Output};
pub use wire::{ExecutionState, KernelMessage, MessageContent};
pub use worker::{KernelWorker, ProcessWorker};
