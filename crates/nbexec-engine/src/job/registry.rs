//! In-memory job registry.
//!
//! All job state lives behind one `RwLock`ed map. Capacity checks, status
//! transitions, and cancel classification happen under the write lock so
//! concurrent callers observe a consistent count. Log buffers are shared
//! through their own lock so readers never hold the registry lock while
//! paging.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::sync::{RwLock, oneshot};
use tracing::{info, warn};

use crate::job::error::JobError;
use crate::job::types::{CANCELED_MARKER, JobLog, JobStatus, JobView, LogChunk, RunOutcome};

/// Internal per-job record. Never handed out; callers get [`JobView`]
/// snapshots.
struct JobRecord {
    id: String,
    input: PathBuf,
    output: PathBuf,
    parameters: HashMap<String, Value>,
    timeout: Duration,
    status: JobStatus,
    created_at: SystemTime,
    updated_at: SystemTime,
    started_at: Option<SystemTime>,
    ended_at: Option<SystemTime>,
    return_code: Option<i32>,
    error: Option<String>,
    logs: Arc<RwLock<JobLog>>,
    /// Handle to the running worker's cancel channel. Present only while
    /// RUNNING and not yet canceled.
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl JobRecord {
    fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            parameters: self.parameters.clone(),
            status: self.status,
            timeout_secs: self.timeout.as_secs(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            return_code: self.return_code,
            error: self.error.clone(),
        }
    }
}

/// Thread-safe store of all known jobs.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new PENDING job, enforcing the concurrency cap.
    ///
    /// The active count (PENDING plus RUNNING) is taken under the write lock
    /// so a burst of submissions cannot overshoot the cap.
    pub async fn create(
        &self,
        input: PathBuf,
        output: PathBuf,
        parameters: HashMap<String, Value>,
        timeout: Duration,
        max_active: usize,
    ) -> Result<JobView, JobError> {
        let mut jobs = self.jobs.write().await;
        let active = jobs.values().filter(|j| !j.status.is_terminal()).count();
        if active >= max_active {
            return Err(JobError::CapacityExceeded {
                active,
                max: max_active,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let record = JobRecord {
            id: id.clone(),
            input,
            output,
            parameters,
            timeout,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            return_code: None,
            error: None,
            logs: Arc::new(RwLock::new(JobLog::default())),
            cancel_tx: None,
        };
        let view = record.view();
        jobs.insert(id, record);
        Ok(view)
    }

    /// Snapshot a single job.
    pub async fn view(&self, id: &str) -> Option<JobView> {
        self.jobs.read().await.get(id).map(JobRecord::view)
    }

    /// Snapshot all jobs, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>) -> Vec<JobView> {
        let jobs = self.jobs.read().await;
        let mut views: Vec<JobView> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .map(JobRecord::view)
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    /// Number of non-terminal jobs.
    pub async fn active_count(&self) -> usize {
        let jobs = self.jobs.read().await;
        jobs.values().filter(|j| !j.status.is_terminal()).count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Transition a PENDING job to RUNNING and install its cancel channel.
    ///
    /// Returns `None` when the job is gone or no longer PENDING (canceled
    /// before its worker started); the worker must then back off without
    /// spawning anything.
    pub async fn mark_running(
        &self,
        id: &str,
    ) -> Option<(oneshot::Receiver<()>, Arc<RwLock<JobLog>>)> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id)?;
        if record.status != JobStatus::Pending {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        record.status = JobStatus::Running;
        let now = SystemTime::now();
        record.started_at = Some(now);
        record.updated_at = now;
        record.cancel_tx = Some(tx);
        Some((rx, Arc::clone(&record.logs)))
    }

    /// Record the runner's terminal verdict.
    ///
    /// This is a no-op once the job is terminal, so a cancel that lands
    /// first keeps its CANCELED status even when the runner later reports
    /// how the process died.
    pub async fn apply_outcome(&self, id: &str, outcome: RunOutcome) {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(id) else {
            warn!(job_id = %id, "Outcome for unknown job dropped");
            return;
        };
        if record.status.is_terminal() {
            warn!(job_id = %id, status = %record.status, "Ignoring outcome for terminal job");
            return;
        }

        match outcome {
            RunOutcome::Succeeded { code } => {
                record.status = JobStatus::Succeeded;
                record.return_code = Some(code);
            }
            RunOutcome::Failed { code, error } => {
                record.status = JobStatus::Failed;
                record.return_code = code;
                record.error = Some(error);
            }
            RunOutcome::TimedOut { error } => {
                record.status = JobStatus::TimedOut;
                record.error = Some(error);
            }
            RunOutcome::Canceled { error } => {
                record.status = JobStatus::Canceled;
                record.error = Some(error);
            }
        }
        let now = SystemTime::now();
        record.updated_at = now;
        record.ended_at = Some(now);
        record.cancel_tx = None;
        info!(job_id = %id, status = %record.status, "Job finished");
    }

    /// Classify a cancel request and flip what can be flipped under the lock.
    ///
    /// PENDING jobs are canceled in place. For RUNNING jobs the cancel
    /// sender is detached and returned so the caller can fire it after the
    /// lock is released; the runner then tears the process down and reports
    /// the CANCELED outcome. A second cancel of a RUNNING job is accepted
    /// with no sender left to fire.
    pub async fn begin_cancel(
        &self,
        id: &str,
    ) -> Result<(JobView, Option<oneshot::Sender<()>>), JobError> {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(id) else {
            return Err(JobError::NotFound { id: id.to_string() });
        };
        if record.status.is_terminal() {
            return Err(JobError::NotCancelable {
                id: id.to_string(),
                status: record.status,
            });
        }

        if record.status == JobStatus::Pending {
            let now = SystemTime::now();
            record.status = JobStatus::Canceled;
            record.error = Some(CANCELED_MARKER.to_string());
            record.updated_at = now;
            record.ended_at = Some(now);
            info!(job_id = %id, "Pending job canceled");
            return Ok((record.view(), None));
        }

        let signal = record.cancel_tx.take();
        record.updated_at = SystemTime::now();
        Ok((record.view(), signal))
    }

    /// Page through a job's log buffer.
    ///
    /// The buffer handle is cloned under the registry read lock and the
    /// buffer is locked only after the registry lock is released.
    pub async fn logs(&self, id: &str, offset: usize, limit: usize) -> Result<LogChunk, JobError> {
        let (logs, closed) = {
            let jobs = self.jobs.read().await;
            let record = jobs
                .get(id)
                .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
            (Arc::clone(&record.logs), record.status.is_terminal())
        };
        Ok(logs.read().await.chunk(offset, limit, closed))
    }

    /// Drop terminal jobs, optionally only those that ended more than
    /// `older_than` ago. Returns how many were removed.
    pub async fn cleanup(&self, older_than: Option<Duration>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        let now = SystemTime::now();
        jobs.retain(|_, record| {
            if !record.status.is_terminal() {
                return true;
            }
            match older_than {
                None => false,
                Some(age) => record
                    .ended_at
                    .and_then(|ended| now.duration_since(ended).ok())
                    .is_none_or(|elapsed| elapsed < age),
            }
        });
        before - jobs.len()
    }
}
