//! Engine process runner.
//!
//! Spawns the execution engine as a child process, captures both output
//! streams into the job's log buffer, and enforces the deadline and cancel
//! signal. Shutdown is graceful first: SIGTERM, a grace period, then
//! SIGKILL.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nbexec_core::config::EngineConfig;

use crate::job::types::{CANCELED_MARKER, JobLog, RunOutcome, StreamKind};

/// Everything the runner needs to execute one job.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub job_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub parameters: HashMap<String, Value>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

/// Runs engine processes according to the configured command line.
pub struct ProcessRunner {
    bin: String,
    args: Vec<String>,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            bin: config.bin.clone(),
            args: config.args.clone(),
            grace: Duration::from_secs(config.grace_period_secs),
        }
    }

    /// Execute one job to completion.
    ///
    /// Never returns an error: anything that goes wrong folds into a
    /// terminal [`RunOutcome`] on the job.
    pub async fn run(
        &self,
        spec: &RunSpec,
        logs: Arc<RwLock<JobLog>>,
        cancel_rx: oneshot::Receiver<()>,
    ) -> RunOutcome {
        let mut command = self.build_command(spec);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id = %spec.job_id, engine = %self.bin, error = %e, "Failed to spawn engine process");
                return RunOutcome::Failed {
                    code: None,
                    error: format!("Failed to spawn engine process: {e}"),
                };
            }
        };
        info!(job_id = %spec.job_id, pid = ?child.id(), engine = %self.bin, "Engine process started");

        let stdout_task = child.stdout.take().map(|pipe| {
            spawn_reader(
                spec.job_id.clone(),
                StreamKind::Stdout,
                pipe,
                Arc::clone(&logs),
            )
        });
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| spawn_reader(spec.job_id.clone(), StreamKind::Stderr, pipe, logs));

        let mut cancel_rx = cancel_rx;
        let outcome = tokio::select! {
            exit = tokio::time::timeout(spec.timeout, child.wait()) => match exit {
                Ok(Ok(status)) => outcome_for(spec, status),
                Ok(Err(e)) => {
                    warn!(job_id = %spec.job_id, error = %e, "Failed to wait for engine process");
                    child.kill().await.ok();
                    RunOutcome::Failed {
                        code: None,
                        error: format!("Process error: {e}"),
                    }
                }
                Err(_) => {
                    warn!(job_id = %spec.job_id, timeout_secs = spec.timeout.as_secs(), "Deadline expired, terminating engine");
                    self.terminate(&mut child).await;
                    RunOutcome::TimedOut {
                        error: format!("Timed out after {}s", spec.timeout.as_secs()),
                    }
                }
            },
            // A dropped sender means the job record is gone; treat it as a
            // cancel and tear the process down.
            _ = &mut cancel_rx => {
                info!(job_id = %spec.job_id, "Cancel requested, terminating engine");
                self.terminate(&mut child).await;
                RunOutcome::Canceled {
                    error: CANCELED_MARKER.to_string(),
                }
            }
        };

        self.drain_readers(&spec.job_id, stdout_task, stderr_task)
            .await;
        outcome
    }

    fn build_command(&self, spec: &RunSpec) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(&self.args);
        cmd.arg(&spec.input);
        cmd.arg(&spec.output);
        for (key, value) in &spec.parameters {
            cmd.arg("-p").arg(key).arg(render_parameter(value));
        }
        cmd.current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Graceful shutdown: SIGTERM, wait out the grace period, then SIGKILL.
    /// Safe to call on a process that already exited.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: kill(2) with the pid of a child we own is safe to call.
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(error = %err, "Failed to send SIGTERM");
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
            warn!("Grace period expired, sending SIGKILL");
            let _ = child.kill().await;
        }
    }

    /// Let the reader tasks flush remaining buffered output, bounded by the
    /// grace period. A grandchild of the engine can keep the pipes open past
    /// the engine's own exit; after the bound we abort rather than hang.
    async fn drain_readers(
        &self,
        job_id: &str,
        stdout_task: Option<JoinHandle<()>>,
        stderr_task: Option<JoinHandle<()>>,
    ) {
        for mut handle in [stdout_task, stderr_task].into_iter().flatten() {
            if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                handle.abort();
                warn!(job_id = %job_id, "Log reader did not finish, aborting");
            }
        }
    }
}

fn render_parameter(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Map an exit status to a verdict. A clean exit only counts as success
/// when the output artifact actually exists.
fn outcome_for(spec: &RunSpec, status: ExitStatus) -> RunOutcome {
    if status.success() {
        if spec.output.exists() {
            return RunOutcome::Succeeded {
                code: status.code().unwrap_or(0),
            };
        }
        return RunOutcome::Failed {
            code: status.code(),
            error: format!(
                "Engine exited cleanly but output artifact {} is missing",
                spec.output.display()
            ),
        };
    }
    match status.code() {
        Some(code) => RunOutcome::Failed {
            code: Some(code),
            error: format!("Engine exited with code {code}"),
        },
        None => RunOutcome::Failed {
            code: None,
            error: "Engine terminated by signal".to_string(),
        },
    }
}

fn spawn_reader(
    job_id: String,
    stream: StreamKind,
    pipe: impl AsyncRead + Unpin + Send + 'static,
    logs: Arc<RwLock<JobLog>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reader = BufReader::new(pipe);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.write().await.append(stream, line);
        }
        debug!(job_id = %job_id, stream = %stream, "Log reader finished");
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_spec(output: PathBuf) -> RunSpec {
        RunSpec {
            job_id: "job-1".to_string(),
            input: PathBuf::from("/tmp/in.ipynb"),
            output,
            parameters: HashMap::new(),
            working_dir: PathBuf::from("/tmp"),
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    fn test_runner() -> ProcessRunner {
        ProcessRunner::new(&EngineConfig {
            bin: "papermill".to_string(),
            args: vec!["--log-output".to_string()],
            grace_period_secs: 5,
        })
    }

    #[test]
    fn render_parameter_keeps_strings_raw() {
        let value = Value::String("hello world".to_string());
        assert_eq!(render_parameter(&value), "hello world");
    }

    #[test]
    fn render_parameter_compacts_json() {
        let value = serde_json::json!({"alpha": 0.5, "tags": ["a", "b"]});
        let rendered = render_parameter(&value);
        assert_eq!(rendered, value.to_string());
        assert!(!rendered.contains('\n'));
    }

    #[test]
    fn render_parameter_keeps_scalars() {
        assert_eq!(render_parameter(&serde_json::json!(true)), "true");
        assert_eq!(render_parameter(&serde_json::json!(42)), "42");
    }

    #[test]
    fn build_command_orders_arguments() {
        let runner = test_runner();
        let mut spec = test_spec(PathBuf::from("/tmp/out.ipynb"));
        spec.parameters
            .insert("alpha".to_string(), serde_json::json!(0.5));

        let cmd = runner.build_command(&spec);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "--log-output");
        assert_eq!(args[1], "/tmp/in.ipynb");
        assert_eq!(args[2], "/tmp/out.ipynb");
        assert_eq!(&args[3..], ["-p", "alpha", "0.5"]);
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_with_output_succeeds() {
        use std::os::unix::process::ExitStatusExt;

        let output = tempfile::NamedTempFile::new().unwrap();
        let spec = test_spec(output.path().to_path_buf());
        let outcome = outcome_for(&spec, ExitStatus::from_raw(0));
        assert_eq!(outcome, RunOutcome::Succeeded { code: 0 });
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_without_output_fails() {
        use std::os::unix::process::ExitStatusExt;

        let spec = test_spec(PathBuf::from("/tmp/definitely-not-here.ipynb"));
        let outcome = outcome_for(&spec, ExitStatus::from_raw(0));
        match outcome {
            RunOutcome::Failed { code, error } => {
                assert_eq!(code, Some(0));
                assert!(error.contains("missing"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reports_code() {
        use std::os::unix::process::ExitStatusExt;

        let spec = test_spec(PathBuf::from("/tmp/out.ipynb"));
        // Raw wait status: exit code lives in the high byte.
        let outcome = outcome_for(&spec, ExitStatus::from_raw(3 << 8));
        match outcome {
            RunOutcome::Failed { code, error } => {
                assert_eq!(code, Some(3));
                assert!(error.contains('3'));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn signal_death_reports_no_code() {
        use std::os::unix::process::ExitStatusExt;

        let spec = test_spec(PathBuf::from("/tmp/out.ipynb"));
        // Raw wait status 15: killed by SIGTERM.
        let outcome = outcome_for(&spec, ExitStatus::from_raw(15));
        match outcome {
            RunOutcome::Failed { code, error } => {
                assert_eq!(code, None);
                assert!(error.contains("signal"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
