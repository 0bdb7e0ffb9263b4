//! Tagged command boundary for the job API.
//!
//! Embedders that speak JSON to the manager go through [`JobCommand`] and
//! [`JobReply`]; the set of actions is closed and every frame carries its
//! tag, so unknown actions fail at parse time instead of deep inside a
//! handler.

use serde::{Deserialize, Serialize};

use crate::job::error::JobError;
use crate::job::manager::JobManager;
use crate::job::types::{JobRequest, JobStatus, JobView, LogChunk};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobCommand {
    Submit {
        #[serde(flatten)]
        request: JobRequest,
    },
    Status {
        id: String,
    },
    Logs {
        id: String,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: Option<usize>,
    },
    Cancel {
        id: String,
    },
    List {
        #[serde(default)]
        status: Option<JobStatus>,
    },
    Cleanup {
        #[serde(default)]
        older_than_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobReply {
    Submitted(JobView),
    Status(JobView),
    Logs(LogChunk),
    Canceled(JobView),
    List { jobs: Vec<JobView> },
    Cleaned { removed: usize },
}

impl JobManager {
    /// Route one command to the matching operation.
    pub async fn dispatch(&self, command: JobCommand) -> Result<JobReply, JobError> {
        match command {
            JobCommand::Submit { request } => {
                self.submit(request).await.map(JobReply::Submitted)
            }
            JobCommand::Status { id } => self.status(&id).await.map(JobReply::Status),
            JobCommand::Logs { id, offset, limit } => {
                self.logs(&id, offset, limit).await.map(JobReply::Logs)
            }
            JobCommand::Cancel { id } => self.cancel(&id).await.map(JobReply::Canceled),
            JobCommand::List { status } => Ok(JobReply::List {
                jobs: self.list(status).await,
            }),
            JobCommand::Cleanup { older_than_secs } => Ok(JobReply::Cleaned {
                removed: self.cleanup(older_than_secs).await,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use nbexec_core::Config;

    #[test]
    fn submit_command_parses_from_json() {
        let raw = r#"{"action": "submit", "input": "/data/report.ipynb", "parameters": {"alpha": 0.5}}"#;
        let command: JobCommand = serde_json::from_str(raw).expect("parse");
        match command {
            JobCommand::Submit { request } => {
                assert_eq!(request.input.to_string_lossy(), "/data/report.ipynb");
                assert_eq!(request.parameters.len(), 1);
                assert!(request.timeout_secs.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_rejected() {
        let raw = r#"{"action": "reboot"}"#;
        assert!(serde_json::from_str::<JobCommand>(raw).is_err());
    }

    #[test]
    fn logs_command_defaults_offset() {
        let raw = r#"{"action": "logs", "id": "abc"}"#;
        let command: JobCommand = serde_json::from_str(raw).expect("parse");
        match command {
            JobCommand::Logs { id, offset, limit } => {
                assert_eq!(id, "abc");
                assert_eq!(offset, 0);
                assert!(limit.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn reply_serializes_tagged() {
        let reply = JobReply::Cleaned { removed: 2 };
        let json = serde_json::to_value(&reply).expect("serialize");
        assert_eq!(json["result"], "cleaned");
        assert_eq!(json["removed"], 2);
    }

    #[tokio::test]
    async fn dispatch_routes_commands() {
        let manager = JobManager::new(&Config::default());

        let err = manager
            .dispatch(JobCommand::Status {
                id: "missing".to_string(),
            })
            .await
            .expect_err("unknown job");
        assert!(matches!(err, JobError::NotFound { .. }));

        let reply = manager
            .dispatch(JobCommand::Cleanup {
                older_than_secs: None,
            })
            .await
            .expect("cleanup");
        assert!(matches!(reply, JobReply::Cleaned { removed: 0 }));

        let reply = manager
            .dispatch(JobCommand::List { status: None })
            .await
            .expect("list");
        match reply {
            JobReply::List { jobs } => assert!(jobs.is_empty()),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
