//! Kernel message channel.
//!
//! Sessions talk to the kernel through [`KernelChannel`], so the transport
//! can be swapped out. [`JsonChannel`] is the in-process implementation: it
//! hands execute requests to a transport task and reads raw JSON frames
//! back.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::kernel::error::KernelError;
use crate::kernel::wire::{self, KernelMessage};

/// Transport seam between a session and its kernel.
#[async_trait]
pub trait KernelChannel: Send {
    /// Submit a code fragment and return the message id replies will carry
    /// in their parent header.
    async fn submit(&mut self, code: &str) -> Result<String, KernelError>;

    /// Read the next classified frame.
    ///
    /// `Ok(None)` means the read timed out with the channel still healthy;
    /// callers retry. `Err` means the channel is unusable.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<KernelMessage>, KernelError>;
}

/// An execute request on its way to the kernel transport.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub msg_id: String,
    pub code: String,
}

/// Channel backed by a pair of in-process queues carrying JSON frames.
pub struct JsonChannel {
    requests: mpsc::Sender<ExecuteRequest>,
    events: mpsc::Receiver<Value>,
}

impl JsonChannel {
    pub const fn new(requests: mpsc::Sender<ExecuteRequest>, events: mpsc::Receiver<Value>) -> Self {
        Self { requests, events }
    }
}

#[async_trait]
impl KernelChannel for JsonChannel {
    async fn submit(&mut self, code: &str) -> Result<String, KernelError> {
        let msg_id = uuid::Uuid::new_v4().to_string();
        self.requests
            .send(ExecuteRequest {
                msg_id: msg_id.clone(),
                code: code.to_string(),
            })
            .await
            .map_err(|_| KernelError::Channel("kernel transport closed".to_string()))?;
        Ok(msg_id)
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<KernelMessage>, KernelError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    return Err(KernelError::Channel("kernel transport closed".to_string()));
                }
                Ok(Some(frame)) => match wire::parse_value(&frame) {
                    Ok(message) => return Ok(Some(message)),
                    // Skip garbage frames instead of poisoning the read.
                    Err(e) => warn!(error = %e, "Skipping malformed kernel frame"),
                },
            }
        }
    }
}
