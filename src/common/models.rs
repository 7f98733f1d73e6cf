use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target Supernote device. The service decides what each one means; the
/// client only forwards the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    A5X2,
    A5X,
    A6X2,
    A6X,
}

impl Device {
    pub const ALL: [Device; 4] = [Device::A5X2, Device::A5X, Device::A6X2, Device::A6X];

    pub fn id(&self) -> &'static str {
        match self {
            Device::A5X2 => "A5X2",
            Device::A5X => "A5X",
            Device::A6X2 => "A6X2",
            Device::A6X => "A6X",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Device::A5X2 => "Manta (A5X2)",
            Device::A5X => "A5X",
            Device::A6X2 => "Nomad (A6X2)",
            Device::A6X => "A6X",
        }
    }

    pub fn resolution(&self) -> &'static str {
        match self {
            Device::A5X2 => "1920 x 2560",
            Device::A5X | Device::A6X2 | Device::A6X => "1404 x 1872",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Device::ALL
            .iter()
            .copied()
            .find(|d| d.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown device '{}' (expected one of A5X2, A5X, A6X2, A6X)", wanted))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionType {
    MdToNote,
    NoteToMd,
    PdfToNote,
    PngToNote,
}

impl ConversionType {
    /// Path segment under `/convert` for the single-file endpoint.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ConversionType::MdToNote => "md-to-note",
            ConversionType::NoteToMd => "note-to-md",
            ConversionType::PdfToNote => "pdf-to-note",
            ConversionType::PngToNote => "png-to-note",
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

impl FromStr for ConversionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "md-to-note" => Ok(ConversionType::MdToNote),
            "note-to-md" => Ok(ConversionType::NoteToMd),
            "pdf-to-note" => Ok(ConversionType::PdfToNote),
            "png-to-note" => Ok(ConversionType::PngToNote),
            other => Err(format!("unknown conversion type '{}'", other)),
        }
    }
}

/// Result of one conversion, as produced by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub input_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    /// Why the conversion failed: `error`, then `message`. `None` on success.
    pub fn failure_reason(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        let reason = non_empty(self.error.as_deref())
            .or_else(|| non_empty(self.message.as_deref()))
            .unwrap_or("Unknown error");
        Some(reason)
    }

    /// One line suitable for a notification.
    pub fn summary(&self) -> String {
        match self.failure_reason() {
            Some(reason) => format!("Conversion failed: {}", reason),
            None => match (&self.output_path, non_empty(self.message.as_deref())) {
                (Some(out), _) => format!("Converted: {} -> {}", self.input_path, out),
                (None, Some(msg)) => msg.to_string(),
                (None, None) => format!("Converted: {}", self.input_path),
            },
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(default)]
    pub results: Vec<OperationResult>,
}

impl BatchResult {
    pub fn from_results(results: Vec<OperationResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }

    /// Counters agree with each other and with the per-item flags.
    pub fn is_consistent(&self) -> bool {
        let flagged = self.results.iter().filter(|r| r.success).count();
        self.total == self.successful + self.failed
            && self.total == self.results.len()
            && self.successful == flagged
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    #[default]
    Standard,
    Realtime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(rename = "type")]
    pub step_type: String,
    pub action: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// A service-owned automation. Read-only on the client side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub note_type: NoteType,
    pub device: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Workflow {
    /// Steps in execution order, e.g. `source:folder -> convert:md-to-note`.
    pub fn step_outline(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("{}:{}", s.step_type, s.action))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    pub workflow_id: String,
    pub success: bool,
    #[serde(default)]
    pub files_processed: usize,
    #[serde(default)]
    pub files_succeeded: usize,
    #[serde(default)]
    pub files_failed: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl WorkflowRunResult {
    pub fn is_consistent(&self) -> bool {
        self.files_processed == self.files_succeeded + self.files_failed
            && self.success == (self.files_failed == 0)
    }

    pub fn is_partial_failure(&self) -> bool {
        self.files_failed > 0 && self.files_succeeded > 0
    }

    pub fn summary(&self) -> String {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        if self.files_processed == 0 {
            return format!("{}Workflow {}: no files matched", prefix, self.workflow_id);
        }
        format!(
            "{}Workflow {}: {} processed, {} succeeded, {} failed",
            prefix, self.workflow_id, self.files_processed, self.files_succeeded, self.files_failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    #[serde(default)]
    pub uptime_seconds: Option<f64>,
}

impl StatusResponse {
    pub fn uptime(&self) -> Option<String> {
        self.uptime_seconds.map(format_uptime)
    }
}

pub fn format_uptime(seconds: f64) -> String {
    let secs = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

pub type Dependencies = BTreeMap<String, DependencyStatus>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseResponse {
    pub current_path: String,
    #[serde(default)]
    pub parent_path: Option<String>,
    #[serde(default)]
    pub items: Vec<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveInfo {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDialogResponse {
    pub selected: bool,
    #[serde(default)]
    pub path: Option<String>,
}
