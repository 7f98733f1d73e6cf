use crate::common::events::{Lifecycle, ProgressEvent};

/// Fold one stream event into the "current operation" projection.
///
/// The latest start/progress event replaces the projection wholesale, a
/// terminal event clears it and connection markers leave it alone.
pub fn reduce(previous: Option<ProgressEvent>, event: &ProgressEvent) -> Option<ProgressEvent> {
    match event.lifecycle() {
        Lifecycle::Active => Some(event.clone()),
        Lifecycle::Terminal => None,
        Lifecycle::Connection => previous,
    }
}

/// What a progress widget shows for the current projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressDisplay {
    pub title: String,
    pub message: String,
    /// Whole percent in `0..=100`
    pub percent: u8,
    pub file_position: Option<String>,
    pub input_path: Option<String>,
}

impl ProgressDisplay {
    pub fn from_event(event: &ProgressEvent) -> Self {
        let fields = event.common();
        let message = fields
            .message
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_message(event));
        let file_position = match (fields.current, fields.total) {
            (Some(current), Some(total)) => Some(format!("File {} of {}", current.saturating_add(1), total)),
            _ => None,
        };
        Self {
            title: title(event),
            message,
            percent: percent_bar(fields.percent),
            file_position,
            input_path: fields.input_path.map(str::to_string),
        }
    }

    /// Single terminal line, e.g. `Running workflow [ 40%] Step 2 (File 2 of 5)`.
    pub fn render_line(&self) -> String {
        let mut line = format!("{} [{:>3}%] {}", self.title, self.percent, self.message);
        if let Some(position) = &self.file_position {
            line.push_str(&format!(" ({})", position));
        }
        if let Some(path) = &self.input_path {
            line.push_str(&format!(" - {}", path));
        }
        line
    }
}

fn title(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::ConversionStarted(u) | ProgressEvent::ConversionProgress(u) => {
            let kind = u.conversion_type.as_deref().filter(|k| !k.is_empty()).unwrap_or("file");
            format!("Converting {}", kind)
        }
        ProgressEvent::BatchStarted(_) | ProgressEvent::BatchProgress(_) => "Batch conversion".to_string(),
        ProgressEvent::WorkflowStarted(_) | ProgressEvent::WorkflowStep(_) => "Running workflow".to_string(),
        _ => "Processing".to_string(),
    }
}

fn default_message(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::ConversionStarted(_) => "Starting conversion...".to_string(),
        ProgressEvent::BatchStarted(_) => "Starting batch conversion...".to_string(),
        ProgressEvent::WorkflowStarted(_) => "Starting workflow...".to_string(),
        ProgressEvent::WorkflowStep(u) => format!("Step {}", u.step.unwrap_or(0)),
        _ => "Processing...".to_string(),
    }
}

fn percent_bar(fraction: Option<f64>) -> u8 {
    match fraction {
        Some(f) if f.is_finite() => (f * 100.0).clamp(0.0, 100.0).round() as u8,
        _ => 0,
    }
}
