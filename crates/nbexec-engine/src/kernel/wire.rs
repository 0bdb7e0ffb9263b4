//! Kernel wire-message classification.
//!
//! Raw kernel frames arrive as JSON. Classification is tolerant: unknown
//! message types are preserved rather than rejected, and missing optional
//! fields fall back to empty values. Only a frame without a
//! `header.msg_type` is malformed.

use serde_json::Value;

use crate::job::types::StreamKind;
use crate::kernel::error::KernelError;

/// One classified kernel frame.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelMessage {
    /// Id of the request this frame answers, when the kernel sent one.
    pub parent_id: Option<String>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
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
    Status {
        state: ExecutionState,
    },
    Unknown {
        msg_type: String,
    },
}

/// Kernel execution state reported through status frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
    Other(String),
}

/// Classify one raw frame.
pub fn parse_value(raw: &Value) -> Result<KernelMessage, KernelError> {
    let msg_type = raw
        .pointer("/header/msg_type")
        .and_then(Value::as_str)
        .ok_or_else(|| KernelError::Malformed("missing header.msg_type".to_string()))?;
    let parent_id = raw
        .pointer("/parent_header/msg_id")
        .and_then(Value::as_str)
        .map(String::from);
    let content = raw.get("content");

    let content = match msg_type {
        "stream" => parse_stream(content),
        "execute_result" => parse_execute_result(content),
        "display_data" => MessageContent::DisplayData {
            data: mime_bundle(content),
        },
        "error" => parse_error(content),
        "status" => parse_status(content),
        other => MessageContent::Unknown {
            msg_type: other.to_string(),
        },
    };
    Ok(KernelMessage { parent_id, content })
}

fn parse_stream(content: Option<&Value>) -> MessageContent {
    let name = content
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("stdout");
    let stream = if name == "stderr" {
        StreamKind::Stderr
    } else {
        StreamKind::Stdout
    };
    let text = content
        .and_then(|c| c.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    MessageContent::Stream { stream, text }
}

fn parse_execute_result(content: Option<&Value>) -> MessageContent {
    let execution_count = content
        .and_then(|c| c.get("execution_count"))
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());
    MessageContent::ExecuteResult {
        execution_count,
        data: mime_bundle(content),
    }
}

fn mime_bundle(content: Option<&Value>) -> serde_json::Map<String, Value> {
    content
        .and_then(|c| c.get("data"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn parse_error(content: Option<&Value>) -> MessageContent {
    let field = |key: &str| {
        content
            .and_then(|c| c.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let traceback = content
        .and_then(|c| c.get("traceback"))
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    MessageContent::Error {
        ename: field("ename"),
        evalue: field("evalue"),
        traceback,
    }
}

fn parse_status(content: Option<&Value>) -> MessageContent {
    let state = match content
        .and_then(|c| c.get("execution_state"))
        .and_then(Value::as_str)
    {
        Some("busy") => ExecutionState::Busy,
        Some("idle") => ExecutionState::Idle,
        Some("starting") => ExecutionState::Starting,
        Some(other) => ExecutionState::Other(other.to_string()),
        None => ExecutionState::Other(String::new()),
    };
    MessageContent::Status { state }
}
