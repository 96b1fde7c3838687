//! Request and response types for the plain resource endpoints.
//!
//! Response types keep the fields the client relies on and collect the rest
//! into `extra`, so printing a response loses nothing the server sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::streaming::StreamedJob;
use crate::error::{PowerdrillError, Result};

/// Agent every session is created for.
pub const DATA_ANALYSIS_AGENT: &str = "DATA_ANALYSIS_AGENT";

// ── Paging ─────────────────────────────────────────────────────────

/// Paging and search parameters for list endpoints.
#[derive(Debug, Clone)]
pub struct PageQuery {
    /// 1-based. Default: 1.
    pub page_number: u32,
    /// Default: 10.
    pub page_size: u32,
    pub search: Option<String>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 10,
            search: None,
        }
    }
}

impl PageQuery {
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("page_number", self.page_number.to_string()),
            ("page_size", self.page_size.to_string()),
        ];
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            query.push(("search", search.to_string()));
        }
        query
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
}

// ── Datasets ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetOverview {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub exploration_questions: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response to a create call that only needs to report the new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Data sources ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a new data source's file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceInput {
    /// Publicly reachable file URL.
    Url(String),
    /// Key returned by [`upload_file`](crate::upload::upload_file).
    FileObjectKey(String),
}

impl DataSourceInput {
    /// Pick one of two optional inputs; the URL wins when both are given.
    pub fn from_options(url: Option<String>, file_object_key: Option<String>) -> Result<Self> {
        match (url, file_object_key) {
            (Some(url), _) if !url.is_empty() => Ok(Self::Url(url)),
            (_, Some(key)) if !key.is_empty() => Ok(Self::FileObjectKey(key)),
            _ => Err(PowerdrillError::Validation(
                "either url or file_object_key must be provided".into(),
            )),
        }
    }

    pub(crate) fn field(&self) -> (&'static str, &str) {
        match self {
            Self::Url(url) => ("url", url),
            Self::FileObjectKey(key) => ("file_object_key", key),
        }
    }
}

// ── Sessions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Default: `"AUTO"`.
    pub output_language: String,
    /// Default: `"AUTO"`.
    pub job_mode: String,
    /// Earlier jobs kept as context. Default: 10.
    pub max_contextual_job_history: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            output_language: "AUTO".to_string(),
            job_mode: "AUTO".to_string(),
            max_contextual_job_history: 10,
        }
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// An analysis question.
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub session_id: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub datasource_ids: Vec<String>,
    pub stream: bool,
    pub output_language: String,
    pub job_mode: String,
}

impl JobRequest {
    pub fn new(session_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            question: question.into(),
            dataset_id: None,
            datasource_ids: Vec::new(),
            stream: false,
            output_language: "AUTO".to_string(),
            job_mode: "AUTO".to_string(),
        }
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    pub fn with_datasources(mut self, ids: Vec<String>) -> Self {
        self.datasource_ids = ids;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_output_language(mut self, language: impl Into<String>) -> Self {
        self.output_language = language.into();
        self
    }
}

/// Result of a blocking job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub blocks: Vec<JobBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// What a job call produced, depending on whether streaming was requested.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Structured(JobResult),
    Streamed(StreamedJob),
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Structured(r) => &r.job_id,
            Self::Streamed(s) => &s.job_id,
        }
    }
}

// ── Cleanup ────────────────────────────────────────────────────────

/// Outcome of a best-effort cleanup. `None` means nothing was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub session_deleted: Option<bool>,
    pub dataset_deleted: Option<bool>,
}

/// Reject ids that cannot be used as a single path segment.
pub(crate) fn path_segment<'a>(kind: &str, id: &'a str) -> Result<&'a str> {
    if id.is_empty() || id.contains(['/', '?', '#']) {
        return Err(PowerdrillError::Validation(format!(
            "invalid {kind} id '{id}'"
        )));
    }
    Ok(id)
}
