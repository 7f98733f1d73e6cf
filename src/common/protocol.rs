use crate::common::models::{ConversionType, Device};
use serde::{Deserialize, Serialize};

/// Body of `POST /convert/md-to-note`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkdownToNoteRequest {
    pub input_path: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    /// Realtime handwriting recognition; `None` lets the service read frontmatter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    /// Write the generated link back into the markdown frontmatter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_markdown: Option<bool>,
}

impl MarkdownToNoteRequest {
    pub fn new(input_path: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            ..Default::default()
        }
    }
}

/// Body of `POST /convert/note-to-md`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteToMarkdownRequest {
    pub input_path: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<String>,
}

impl NoteToMarkdownRequest {
    pub fn new(input_path: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            image_dir: None,
        }
    }
}

/// Body of `POST /convert/pdf-to-note`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfToNoteRequest {
    pub input_path: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
}

/// Body of `POST /convert/png-to-note`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PngToNoteRequest {
    pub input_path: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
}

/// Body of `POST /convert/batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConvertRequest {
    pub input_paths: Vec<String>,
    pub output_dir: String,
    pub conversion_type: ConversionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
}

/// Body of `POST /workflows/{id}/run`. Every field is optional; an empty
/// request runs the workflow over its configured sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogMode {
    #[default]
    File,
    Directory,
}

/// Body of `POST /file-dialog`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDialogRequest {
    pub mode: DialogMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_dir: Option<String>,
    /// `(name, pattern)` pairs, e.g. `("Markdown", "*.md")`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_types: Option<Vec<(String, String)>>,
}
