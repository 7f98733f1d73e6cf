//! Progress events pushed by the service over the event stream.
//!
//! The service emits either flat frames (`{"type": "conversion_progress",
//! "percent": 0.5}`) or enveloped ones (`{"type": ..., "task_id": ...,
//! "data": {...}, "timestamp": ...}`). [`parse_event`] accepts both and
//! yields one [`ProgressEvent`] variant per event type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Fraction in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Zero-based index of the file being processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Connected(ConnectionNotice),
    Disconnected(ConnectionNotice),
    ConversionStarted(ConversionUpdate),
    ConversionProgress(ConversionUpdate),
    ConversionComplete(ConversionUpdate),
    ConversionError(ConversionUpdate),
    BatchStarted(BatchUpdate),
    BatchProgress(BatchUpdate),
    BatchComplete(BatchUpdate),
    WorkflowStarted(WorkflowUpdate),
    WorkflowStep(WorkflowUpdate),
    WorkflowComplete(WorkflowUpdate),
    WorkflowError(WorkflowUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Connection,
    Conversion,
    Batch,
    Workflow,
}

/// Role an event plays in the lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Socket-level marker, unrelated to any operation
    Connection,
    /// Started or still running
    Active,
    /// Completed or failed
    Terminal,
}

/// Borrowed view over the optional fields shared by several families.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommonFields<'a> {
    pub message: Option<&'a str>,
    pub error: Option<&'a str>,
    pub percent: Option<f64>,
    pub input_path: Option<&'a str>,
    pub total: Option<u64>,
    pub current: Option<u64>,
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Connected(_) => "connected",
            ProgressEvent::Disconnected(_) => "disconnected",
            ProgressEvent::ConversionStarted(_) => "conversion_started",
            ProgressEvent::ConversionProgress(_) => "conversion_progress",
            ProgressEvent::ConversionComplete(_) => "conversion_complete",
            ProgressEvent::ConversionError(_) => "conversion_error",
            ProgressEvent::BatchStarted(_) => "batch_started",
            ProgressEvent::BatchProgress(_) => "batch_progress",
            ProgressEvent::BatchComplete(_) => "batch_complete",
            ProgressEvent::WorkflowStarted(_) => "workflow_started",
            ProgressEvent::WorkflowStep(_) => "workflow_step",
            ProgressEvent::WorkflowComplete(_) => "workflow_complete",
            ProgressEvent::WorkflowError(_) => "workflow_error",
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            ProgressEvent::Connected(_) | ProgressEvent::Disconnected(_) => EventFamily::Connection,
            ProgressEvent::ConversionStarted(_)
            | ProgressEvent::ConversionProgress(_)
            | ProgressEvent::ConversionComplete(_)
            | ProgressEvent::ConversionError(_) => EventFamily::Conversion,
            ProgressEvent::BatchStarted(_) | ProgressEvent::BatchProgress(_) | ProgressEvent::BatchComplete(_) => {
                EventFamily::Batch
            }
            ProgressEvent::WorkflowStarted(_)
            | ProgressEvent::WorkflowStep(_)
            | ProgressEvent::WorkflowComplete(_)
            | ProgressEvent::WorkflowError(_) => EventFamily::Workflow,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            ProgressEvent::Connected(_) | ProgressEvent::Disconnected(_) => Lifecycle::Connection,
            ProgressEvent::ConversionStarted(_)
            | ProgressEvent::ConversionProgress(_)
            | ProgressEvent::BatchStarted(_)
            | ProgressEvent::BatchProgress(_)
            | ProgressEvent::WorkflowStarted(_)
            | ProgressEvent::WorkflowStep(_) => Lifecycle::Active,
            ProgressEvent::ConversionComplete(_)
            | ProgressEvent::ConversionError(_)
            | ProgressEvent::BatchComplete(_)
            | ProgressEvent::WorkflowComplete(_)
            | ProgressEvent::WorkflowError(_) => Lifecycle::Terminal,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminal
    }

    pub fn common(&self) -> CommonFields<'_> {
        match self {
            ProgressEvent::Connected(n) | ProgressEvent::Disconnected(n) => CommonFields {
                message: n.message.as_deref(),
                ..Default::default()
            },
            ProgressEvent::ConversionStarted(u)
            | ProgressEvent::ConversionProgress(u)
            | ProgressEvent::ConversionComplete(u)
            | ProgressEvent::ConversionError(u) => CommonFields {
                message: u.message.as_deref(),
                error: u.error.as_deref(),
                percent: u.percent,
                input_path: u.input_path.as_deref(),
                total: None,
                current: None,
            },
            ProgressEvent::BatchStarted(u) | ProgressEvent::BatchProgress(u) | ProgressEvent::BatchComplete(u) => {
                CommonFields {
                    message: u.message.as_deref(),
                    error: u.error.as_deref(),
                    percent: u.percent,
                    input_path: u.input_path.as_deref(),
                    total: u.total,
                    current: u.current,
                }
            }
            ProgressEvent::WorkflowStarted(u)
            | ProgressEvent::WorkflowStep(u)
            | ProgressEvent::WorkflowComplete(u)
            | ProgressEvent::WorkflowError(u) => CommonFields {
                message: u.message.as_deref(),
                error: u.error.as_deref(),
                percent: u.percent,
                input_path: u.input_path.as_deref(),
                total: u.total,
                current: u.current,
            },
        }
    }

    /// Workflow this event belongs to, when the service says so.
    pub fn workflow_id(&self) -> Option<&str> {
        match self {
            ProgressEvent::WorkflowStarted(u)
            | ProgressEvent::WorkflowStep(u)
            | ProgressEvent::WorkflowComplete(u)
            | ProgressEvent::WorkflowError(u) => u.workflow_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Event frame is not a JSON object")]
    NotAnObject,
    #[error("Unrecognized event: {0}")]
    Unrecognized(#[source] serde_json::Error),
}

/// Parse one text frame from the event stream.
pub fn parse_event(text: &str) -> Result<ProgressEvent, EventParseError> {
    let value: Value = serde_json::from_str(text).map_err(EventParseError::InvalidJson)?;
    let Value::Object(frame) = value else {
        return Err(EventParseError::NotAnObject);
    };
    let frame = normalize_frame(frame);
    serde_json::from_value(Value::Object(frame)).map_err(EventParseError::Unrecognized)
}

fn normalize_frame(mut frame: Map<String, Value>) -> Map<String, Value> {
    // envelope fields never override flat ones
    if let Some(Value::Object(data)) = frame.remove("data") {
        for (key, value) in data {
            frame.entry(key).or_insert(value);
        }
    }

    if !frame.contains_key("total") {
        if let Some(total) = frame.remove("total_files") {
            frame.insert("total".to_string(), total);
        }
    }
    if !frame.contains_key("current") {
        // service counts files from 1
        if let Some(position) = frame.get("current_file").and_then(Value::as_u64) {
            frame.insert("current".to_string(), Value::from(position.saturating_sub(1)));
        }
    }
    if !frame.contains_key("input_path") {
        if let Some(path) = frame.remove("file_path") {
            frame.insert("input_path".to_string(), path);
        }
    }
    frame
}
