//! Kernel worker process control.
//!
//! [`KernelWorker`] abstracts lifecycle control over the kernel process so
//! sessions can interrupt, restart, and shut down without knowing how the
//! kernel runs. [`ProcessWorker`] manages a real child process; interrupt
//! maps to SIGINT and shutdown to SIGTERM, a grace period, then SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use nbexec_core::config::KernelConfig;

use crate::kernel::error::KernelError;

/// Lifecycle seam between a session and its kernel process.
#[async_trait]
pub trait KernelWorker: Send {
    /// Interrupt whatever the kernel is executing right now.
    async fn interrupt(&mut self) -> Result<(), KernelError>;

    /// Tear the kernel down and bring up a fresh one.
    async fn restart(&mut self) -> Result<(), KernelError>;

    /// Stop the kernel. Safe to call more than once.
    async fn shutdown(&mut self) -> Result<(), KernelError>;

    async fn is_alive(&mut self) -> bool;
}

/// Worker backed by a real kernel child process.
#[derive(Debug)]
pub struct ProcessWorker {
    bin: String,
    args: Vec<String>,
    grace: Duration,
    child: Option<Child>,
}

impl ProcessWorker {
    pub async fn spawn(config: &KernelConfig) -> Result<Self, KernelError> {
        let mut worker = Self {
            bin: config.worker_bin.clone(),
            args: config.worker_args.clone(),
            grace: Duration::from_secs(config.shutdown_grace_secs),
            child: None,
        };
        worker.start().await?;
        Ok(worker)
    }

    async fn start(&mut self) -> Result<(), KernelError> {
        let mut child = Command::new(&self.bin)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KernelError::Worker(format!("Failed to spawn kernel worker: {e}")))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("kernel stderr: {}", line);
                }
            });
        }

        info!(pid = ?child.id(), bin = %self.bin, "Kernel worker started");
        self.child = Some(child);
        Ok(())
    }
}

#[async_trait]
impl KernelWorker for ProcessWorker {
    async fn interrupt(&mut self) -> Result<(), KernelError> {
        #[cfg(unix)]
        {
            let Some(pid) = self.child.as_ref().and_then(Child::id) else {
                return Err(KernelError::Worker("kernel is not running".to_string()));
            };
            // SAFETY: kill(2) with the pid of a child we own is safe to call.
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                return Err(KernelError::Worker(format!("Failed to send SIGINT: {err}")));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            Err(KernelError::Worker(
                "interrupt is not supported on this platform".to_string(),
            ))
        }
    }

    async fn restart(&mut self) -> Result<(), KernelError> {
        self.shutdown().await?;
        self.start().await
    }

    async fn shutdown(&mut self) -> Result<(), KernelError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: kill(2) with the pid of a child we own is safe to call.
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(error = %err, "Failed to send SIGTERM to kernel worker");
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
            warn!("Grace period expired, sending SIGKILL to kernel worker");
            let _ = child.kill().await;
        }
        info!(bin = %self.bin, "Kernel worker stopped");
        Ok(())
    }

    async fn is_alive(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }
}
