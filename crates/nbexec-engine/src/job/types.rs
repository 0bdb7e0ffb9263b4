//! Job domain types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker recorded in the error summary of canceled jobs.
pub const CANCELED_MARKER: &str = "canceled by request";

/// Lifecycle states of a background job.
///
/// `Pending -> Running -> {Succeeded, Failed, TimedOut, Canceled}`, plus
/// `Pending -> Canceled` for jobs canceled before their worker starts.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(rename = "timeout")]
    TimedOut,
    Canceled,
}

impl JobStatus {
    /// Whether this state ends the job lifecycle.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Canceled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
            Self::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Output stream of the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// One captured line of engine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: StreamKind,
    pub at: SystemTime,
    pub text: String,
}

/// Append-only log buffer for a single job.
///
/// Lines are stored in arrival order. Order within one stream matches the
/// process output; interleaving across the two streams follows scheduling.
#[derive(Debug, Default)]
pub struct JobLog {
    lines: Vec<LogLine>,
}

impl JobLog {
    /// Append one line, stamped with the arrival time.
    pub fn append(&mut self, stream: StreamKind, text: String) {
        self.lines.push(LogLine {
            stream,
            at: SystemTime::now(),
            text,
        });
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Slice one page out of the buffer.
    ///
    /// Offsets beyond the end yield an empty chunk whose `next_offset` is
    /// clamped to the buffer length, never an error.
    pub fn chunk(&self, offset: usize, limit: usize, closed: bool) -> LogChunk {
        let start = offset.min(self.lines.len());
        let end = start.saturating_add(limit).min(self.lines.len());
        LogChunk {
            lines: self.lines[start..end].to_vec(),
            next_offset: end,
            closed,
        }
    }
}

/// One page of job logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunk {
    pub lines: Vec<LogLine>,
    /// Offset to pass for the next page.
    pub next_offset: usize,
    /// True once the job is terminal; no further lines will arrive.
    pub closed: bool,
}

/// A job submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Input artifact to execute.
    pub input: PathBuf,
    /// Output artifact path; derived from the input when omitted.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Parameters injected into the artifact.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// Execution timeout in seconds; taken from the calibration table when
    /// omitted.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Working directory for the engine process; the input's directory when
    /// omitted.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Point-in-time snapshot of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub parameters: HashMap<String, Value>,
    pub status: JobStatus,
    pub timeout_secs: u64,
    pub created_at: SystemTime,
    /// Last status-affecting mutation.
    pub updated_at: SystemTime,
    #[serde(default)]
    pub started_at: Option<SystemTime>,
    /// Set exactly when the job enters a terminal state.
    #[serde(default)]
    pub ended_at: Option<SystemTime>,
    #[serde(default)]
    pub return_code: Option<i32>,
    /// Error summary for failed, timed out, or canceled jobs.
    #[serde(default)]
    pub error: Option<String>,
}

/// Terminal verdict produced by the process runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { code: i32 },
    Failed { code: Option<i32>, error: String },
    TimedOut { error: String },
    Canceled { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
    }

    #[test]
    fn timed_out_renders_as_timeout() {
        assert_eq!(JobStatus::TimedOut.to_string(), "timeout");
        let json = serde_json::to_string(&JobStatus::TimedOut).unwrap_or_default();
        assert_eq!(json, "\"timeout\"");
    }

    #[test]
    fn chunk_slices_in_order() {
        let mut log = JobLog::default();
        for i in 0..5 {
            log.append(StreamKind::Stdout, format!("line {i}"));
        }
        let chunk = log.chunk(1, 2, false);
        assert_eq!(chunk.lines.len(), 2);
        assert_eq!(chunk.lines[0].text, "line 1");
        assert_eq!(chunk.lines[1].text, "line 2");
        assert_eq!(chunk.next_offset, 3);
        assert!(!chunk.closed);
    }

    #[test]
    fn chunk_beyond_end_is_empty() {
        let mut log = JobLog::default();
        log.append(StreamKind::Stderr, "only".to_string());
        let chunk = log.chunk(10, 5, true);
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.next_offset, 1);
        assert!(chunk.closed);
    }

    #[test]
    fn chunk_of_empty_buffer() {
        let log = JobLog::default();
        let chunk = log.chunk(0, 100, false);
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.next_offset, 0);
    }
}
