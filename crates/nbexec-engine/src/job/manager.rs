//! Job manager.
//!
//! Front door of the job flow: validates submissions, resolves timeouts
//! through the calibration table, admits jobs against the concurrency cap,
//! and hands each admitted job to a spawned worker that drives the runner
//! and records the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use nbexec_core::{Config, TimeoutEstimator};

use crate::job::error::JobError;
use crate::job::registry::JobRegistry;
use crate::job::runner::{ProcessRunner, RunSpec};
use crate::job::types::{JobRequest, JobStatus, JobView, LogChunk};

/// Applied when the configured concurrency cap is zero.
const DEFAULT_MAX_CONCURRENT: usize = 5;

pub struct JobManager {
    registry: Arc<JobRegistry>,
    runner: Arc<ProcessRunner>,
    estimator: TimeoutEstimator,
    max_concurrent: usize,
    log_page_size: usize,
}

impl JobManager {
    pub fn new(config: &Config) -> Self {
        let max_concurrent = if config.jobs.max_concurrent == 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            config.jobs.max_concurrent
        };
        Self {
            registry: Arc::new(JobRegistry::new()),
            runner: Arc::new(ProcessRunner::new(&config.engine)),
            estimator: TimeoutEstimator::from_config(&config.timeouts),
            max_concurrent,
            log_page_size: config.jobs.log_page_size,
        }
    }

    /// Validate and admit a job, then start it in the background.
    ///
    /// Returns the PENDING snapshot immediately; execution progresses on a
    /// spawned worker task.
    pub async fn submit(&self, request: JobRequest) -> Result<JobView, JobError> {
        if request.input.as_os_str().is_empty() {
            return Err(JobError::Validation {
                message: "input path must not be empty".to_string(),
            });
        }
        let is_file = tokio::fs::metadata(&request.input)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(JobError::Validation {
                message: format!("input artifact not found: {}", request.input.display()),
            });
        }
        if request.timeout_secs == Some(0) {
            return Err(JobError::Validation {
                message: "timeout must be positive".to_string(),
            });
        }
        if request.parameters.keys().any(|key| key.is_empty()) {
            return Err(JobError::Validation {
                message: "parameter names must not be empty".to_string(),
            });
        }

        let working_dir = request
            .working_dir
            .clone()
            .unwrap_or_else(|| working_dir_of(&request.input));
        let output = request
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&request.input));
        // The engine writes a relative output into its working directory;
        // the artifact check must look in the same place.
        let output = resolve_output(output, &working_dir);
        let timeout = match request.timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.estimate_timeout(&request.input).await,
        };

        let view = self
            .registry
            .create(
                request.input.clone(),
                output,
                request.parameters.clone(),
                timeout,
                self.max_concurrent,
            )
            .await?;
        let spec = RunSpec {
            job_id: view.id.clone(),
            input: request.input,
            output: view.output.clone(),
            parameters: request.parameters,
            working_dir,
            env: request.env,
            timeout,
        };
        info!(
            job_id = %spec.job_id,
            input = %spec.input.display(),
            timeout_secs = timeout.as_secs(),
            "Job submitted"
        );

        let registry = Arc::clone(&self.registry);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let Some((cancel_rx, logs)) = registry.mark_running(&spec.job_id).await else {
                debug!(job_id = %spec.job_id, "Job no longer pending, skipping run");
                return;
            };
            let outcome = runner.run(&spec, logs, cancel_rx).await;
            registry.apply_outcome(&spec.job_id, outcome).await;
        });

        Ok(view)
    }

    pub async fn status(&self, id: &str) -> Result<JobView, JobError> {
        self.registry
            .view(id)
            .await
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })
    }

    /// Page through a job's captured output. A missing or zero limit uses
    /// the configured page size.
    pub async fn logs(
        &self,
        id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<LogChunk, JobError> {
        let limit = match limit {
            Some(0) | None => self.log_page_size,
            Some(n) => n,
        };
        self.registry.logs(id, offset, limit).await
    }

    /// Request cancellation. PENDING jobs flip to CANCELED immediately;
    /// RUNNING jobs get their cancel signal fired and the runner tears the
    /// process down and records the outcome.
    pub async fn cancel(&self, id: &str) -> Result<JobView, JobError> {
        let (view, signal) = self.registry.begin_cancel(id).await?;
        // Fired outside the registry lock; the runner owns the teardown.
        if let Some(tx) = signal {
            let _ = tx.send(());
            info!(job_id = %id, "Cancel signal sent");
        }
        Ok(view)
    }

    pub async fn list(&self, status: Option<JobStatus>) -> Vec<JobView> {
        self.registry.list(status).await
    }

    /// Drop terminal jobs, optionally only those older than the given age.
    pub async fn cleanup(&self, older_than_secs: Option<u64>) -> usize {
        let removed = self
            .registry
            .cleanup(older_than_secs.map(Duration::from_secs))
            .await;
        info!(removed, "Cleaned up finished jobs");
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.registry.active_count().await
    }

    pub const fn capacity(&self) -> usize {
        self.max_concurrent
    }

    async fn estimate_timeout(&self, input: &Path) -> Duration {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Unreadable content degrades to name-only matching.
        let content = tokio::fs::read_to_string(input).await.unwrap_or_default();
        self.estimator.estimate(&name, &content)
    }
}

/// Derive `<stem>_output.<ext>` next to the input.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".to_string(), |s| s.to_string_lossy().into_owned());
    let name = match input.extension() {
        Some(ext) => format!("{stem}_output.{}", ext.to_string_lossy()),
        None => format!("{stem}_output"),
    };
    input.with_file_name(name)
}

fn working_dir_of(input: &Path) -> PathBuf {
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Anchor a relative output path to the job's working directory. Absolute
/// paths pass through.
fn resolve_output(output: PathBuf, working_dir: &Path) -> PathBuf {
    if output.is_absolute() {
        output
    } else {
        working_dir.join(output)
    }
}
