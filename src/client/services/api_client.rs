use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::common::models::{
    BatchResult, BrowseResponse, Dependencies, DriveInfo, FileDialogResponse, HealthResponse, OperationResult,
    StatusResponse, Workflow, WorkflowRunResult,
};
use crate::common::protocol::{
    BatchConvertRequest, FileDialogRequest, MarkdownToNoteRequest, NoteToMarkdownRequest, PdfToNoteRequest,
    PngToNoteRequest, WorkflowRunRequest,
};

pub const GENERIC_FAILURE: &str = "Request failed";

/// Single error shape for every request/response failure. Transport
/// problems and service-reported failures only differ in `status`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    status: Option<u16>,
    message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Non-2xx response: `detail` field, then raw text, then a generic message.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::new(Some(status), failure_message(body))
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::new(None, format!("{}: {}", GENERIC_FAILURE, err))
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }
}

pub fn failure_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => return detail.clone(),
            Some(serde_json::Value::Null) | Some(serde_json::Value::String(_)) | None => {}
            Some(other) => return other.to_string(),
        }
    }
    let text = body.trim();
    if text.is_empty() {
        GENERIC_FAILURE.to_string()
    } else {
        text.to_string()
    }
}

/// Cheapest read-only reachability check, used by the health tracker.
#[async_trait]
pub trait StatusProbe: Send + Sync + 'static {
    async fn probe(&self) -> Result<(), ApiError>;
}

/// Request/response client for the conversion service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::new(None, format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), ApiError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(())
    }

    /// Answers "can I talk to it", never "what went wrong".
    pub async fn check_connection(&self) -> bool {
        match self.get_status().await {
            Ok(_) => true,
            Err(e) => {
                debug!("[API] Connection check failed: {}", e);
                false
            }
        }
    }

    pub async fn get_status(&self) -> Result<StatusResponse, ApiError> {
        self.get(&["status"]).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.get(&["health"]).await
    }

    pub async fn get_dependencies(&self) -> Result<Dependencies, ApiError> {
        self.get(&["status", "dependencies"]).await
    }

    pub async fn convert_markdown_to_note(&self, request: &MarkdownToNoteRequest) -> Result<OperationResult, ApiError> {
        self.post(&["convert", "md-to-note"], request).await
    }

    pub async fn convert_note_to_markdown(&self, request: &NoteToMarkdownRequest) -> Result<OperationResult, ApiError> {
        self.post(&["convert", "note-to-md"], request).await
    }

    pub async fn convert_pdf_to_note(&self, request: &PdfToNoteRequest) -> Result<OperationResult, ApiError> {
        self.post(&["convert", "pdf-to-note"], request).await
    }

    pub async fn convert_png_to_note(&self, request: &PngToNoteRequest) -> Result<OperationResult, ApiError> {
        self.post(&["convert", "png-to-note"], request).await
    }

    /// Per-file failures come back inside the result, not as an error.
    pub async fn batch_convert(&self, request: &BatchConvertRequest) -> Result<BatchResult, ApiError> {
        let result: BatchResult = self.post(&["convert", "batch"], request).await?;
        if !result.is_consistent() {
            warn!(
                "[API] Batch result counters disagree: total={} successful={} failed={} results={}",
                result.total,
                result.successful,
                result.failed,
                result.results.len()
            );
        }
        Ok(result)
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, ApiError> {
        self.get(&["workflows"]).await
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, ApiError> {
        self.get(&["workflows", workflow_id]).await
    }

    /// Resolves once the service has run every step over every matched file.
    pub async fn run_workflow(&self, workflow_id: &str, request: &WorkflowRunRequest) -> Result<WorkflowRunResult, ApiError> {
        let result: WorkflowRunResult = self.post(&["workflows", workflow_id, "run"], request).await?;
        if !result.is_consistent() {
            warn!(
                "[API] Workflow {} result counters disagree: processed={} succeeded={} failed={} success={}",
                result.workflow_id, result.files_processed, result.files_succeeded, result.files_failed, result.success
            );
        }
        Ok(result)
    }

    pub async fn browse_files(&self, path: Option<&str>, filter_ext: Option<&str>) -> Result<BrowseResponse, ApiError> {
        let mut url = self.endpoint(&["browse"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(path) = path.filter(|p| !p.is_empty()) {
                query.append_pair("path", path);
            }
            if let Some(ext) = filter_ext.filter(|e| !e.is_empty()) {
                query.append_pair("filter_ext", ext);
            }
        }
        // an empty query leaves a dangling '?'
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.send(self.http.get(url)).await
    }

    pub async fn list_drives(&self) -> Result<Vec<DriveInfo>, ApiError> {
        self.get(&["drives"]).await
    }

    pub async fn open_file_dialog(&self, request: &FileDialogRequest) -> Result<FileDialogResponse, ApiError> {
        self.post(&["file-dialog"], request).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::new(None, format!("Invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        self.send(self.http.request(Method::GET, url)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        self.send(self.http.request(Method::POST, url).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await.map_err(|e| {
            warn!("[API] Transport error: {}", e);
            ApiError::transport(e)
        })?;
        let status = response.status();
        let url = response.url().clone();
        let body = response.text().await.map_err(ApiError::transport)?;

        if !status.is_success() {
            let err = ApiError::from_response(status.as_u16(), &body);
            warn!("[API] {} {} -> {}", status.as_u16(), url.path(), err);
            return Err(err);
        }
        debug!("[API] {} {}", status.as_u16(), url.path());
        serde_json::from_str(&body)
            .map_err(|e| ApiError::new(Some(status.as_u16()), format!("Invalid response from {}: {}", url.path(), e)))
    }
}

#[async_trait]
impl StatusProbe for ApiClient {
    async fn probe(&self) -> Result<(), ApiError> {
        self.get_status().await.map(|_| ())
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ApiError::new(None, format!("Invalid base URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::new(None, format!("Invalid base URL '{}': expected http(s)", raw)));
    }
    Ok(url)
}
