//! Kernel execution sessions.
//!
//! A session pairs a message channel with a worker handle and executes code
//! fragments one at a time. Replies are polled in short reads under an
//! overall deadline, folded into an [`ExecutionResult`], and the fragment
//! ends on the kernel's idle status frame. `execute` is infallible: channel
//! breakage and deadline expiry become the result's status, with whatever
//! output arrived before the problem.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use nbexec_core::config::KernelConfig;

use crate::job::types::StreamKind;
use crate::kernel::channel::KernelChannel;
use crate::kernel::error::KernelError;
use crate::kernel::wire::{ExecutionState, KernelMessage, MessageContent};
use crate::kernel::worker::KernelWorker;

/// Verdict of one fragment execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Error,
    #[serde(rename = "timeout")]
    TimedOut,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::TimedOut => "timeout",
        })
    }
}

/// One output produced by a fragment, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        stream: StreamKind,
        text: String,
    },
    ExecuteResult {
        execution_count: Option<u32>,
        data: serde_json::Map<String, Value>,
    },
    DisplayData {
        data: serde_json::Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

/// Everything one fragment produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Position of this fragment within the session, starting at 1.
    pub sequence: u64,
    pub execution_count: Option<u32>,
    pub status: ExecutionStatus,
    pub outputs: Vec<Output>,
    /// Concatenated stream text, in arrival order.
    pub text: String,
}

/// One interactive kernel with its channel and worker handle.
pub struct KernelSession<C, W> {
    id: String,
    channel: C,
    worker: W,
    poll_timeout: Duration,
    exec_timeout: Duration,
    sequence: u64,
}

impl<C: KernelChannel, W: KernelWorker> KernelSession<C, W> {
    pub fn new(id: impl Into<String>, channel: C, worker: W, config: &KernelConfig) -> Self {
        Self {
            id: id.into(),
            channel,
            worker,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            exec_timeout: Duration::from_secs(config.exec_timeout_secs),
            sequence: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run one code fragment to completion or deadline. `None` falls back to
    /// the configured `exec_timeout_secs`.
    pub async fn execute(&mut self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        let timeout = timeout.unwrap_or(self.exec_timeout);
        self.sequence += 1;
        let mut result = ExecutionResult {
            sequence: self.sequence,
            execution_count: None,
            status: ExecutionStatus::Ok,
            outputs: Vec::new(),
            text: String::new(),
        };

        let msg_id = match self.channel.submit(code).await {
            Ok(id) => id,
            Err(e) => {
                warn!(kernel_id = %self.id, error = %e, "Failed to submit fragment");
                push_failure(&mut result, &e);
                return result;
            }
        };
        debug!(kernel_id = %self.id, msg_id = %msg_id, "Fragment submitted");

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    kernel_id = %self.id,
                    timeout_secs = timeout.as_secs(),
                    "Fragment deadline expired"
                );
                result.status = ExecutionStatus::TimedOut;
                // Best effort: a wedged kernel may ignore this too.
                if let Err(e) = self.worker.interrupt().await {
                    warn!(kernel_id = %self.id, error = %e, "Failed to interrupt kernel");
                }
                break;
            }
            let poll = self.poll_timeout.min(remaining);
            match self.channel.recv(poll).await {
                // Quiet read inside the deadline; poll again.
                Ok(None) => {}
                Ok(Some(message)) => {
                    if is_foreign(&message, &msg_id) {
                        debug!(kernel_id = %self.id, "Skipping frame for another request");
                        continue;
                    }
                    if fold_content(&mut result, message.content) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(kernel_id = %self.id, error = %e, "Kernel channel failed");
                    push_failure(&mut result, &e);
                    break;
                }
            }
        }
        result
    }

    /// Interrupt the currently executing fragment.
    pub async fn interrupt(&mut self) -> Result<(), KernelError> {
        self.worker.interrupt().await
    }

    /// Restart the kernel. Resets the fragment sequence; execution state in
    /// the kernel is lost.
    pub async fn restart(&mut self) -> Result<(), KernelError> {
        self.worker.restart().await?;
        self.sequence = 0;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), KernelError> {
        self.worker.shutdown().await
    }

    pub async fn is_alive(&mut self) -> bool {
        self.worker.is_alive().await
    }
}

/// Frames answering a different request are replayed noise, not ours.
/// Frames without a parent id are kept.
fn is_foreign(message: &KernelMessage, msg_id: &str) -> bool {
    message
        .parent_id
        .as_deref()
        .is_some_and(|parent| parent != msg_id)
}

/// Fold one frame into the result. Returns true when the fragment is done.
fn fold_content(result: &mut ExecutionResult, content: MessageContent) -> bool {
    match content {
        MessageContent::Stream { stream, text } => {
            result.text.push_str(&text);
            result.outputs.push(Output::Stream { stream, text });
        }
        MessageContent::ExecuteResult {
            execution_count,
            data,
        } => {
            if execution_count.is_some() {
                result.execution_count = execution_count;
            }
            result.outputs.push(Output::ExecuteResult {
                execution_count,
                data,
            });
        }
        MessageContent::DisplayData { data } => {
            result.outputs.push(Output::DisplayData { data });
        }
        MessageContent::Error {
            ename,
            evalue,
            traceback,
        } => {
            result.status = ExecutionStatus::Error;
            result.outputs.push(Output::Error {
                ename,
                evalue,
                traceback,
            });
        }
        MessageContent::Status { state } => {
            if state == ExecutionState::Idle {
                return true;
            }
        }
        MessageContent::Unknown { msg_type } => {
            debug!(msg_type = %msg_type, "Ignoring unhandled kernel frame");
        }
    }
    false
}

fn push_failure(result: &mut ExecutionResult, error: &KernelError) {
    result.status = ExecutionStatus::Error;
    result.outputs.push(Output::Error {
        ename: "ChannelError".to_string(),
        evalue: error.to_string(),
        traceback: Vec::new(),
    });
}
