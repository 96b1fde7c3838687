//! Async client for the [Powerdrill](https://powerdrill.ai/) data-analysis API (v2).
//!
//! `powerdrill-rs` wraps the JSON-over-HTTP API behind a single
//! [`PowerdrillClient`]. Most methods are one request each. Three are real
//! orchestration:
//!
//! - [`upload_file`](PowerdrillClient::upload_file) drives the multipart
//!   upload protocol (initiate, PUT each part to its pre-signed URL, complete)
//!   and returns the storage key a data source is created from.
//! - [`wait_for_sync`](PowerdrillClient::wait_for_sync) polls a dataset until
//!   its data sources are usable, failing fast on invalid sources.
//! - [`create_job`](PowerdrillClient::create_job) with streaming enabled folds
//!   the SSE response into text plus structured blocks.
//!
//! # Getting started
//!
//! ```ignore
//! use powerdrill_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PowerdrillError> {
//!     let client = PowerdrillClient::from_env()?;
//!     let cancel = CancellationToken::new();
//!
//!     let dataset = client.create_dataset("Quarterly sales", None).await?;
//!     client
//!         .upload_and_create_data_source(&dataset.id, "sales.csv".as_ref(), &UploadOptions::default())
//!         .await?;
//!     client.wait_for_sync(&dataset.id, &SyncPolicy::default(), &cancel).await?;
//!
//!     let session = client.create_session("sales q&a", &SessionOptions::default()).await?;
//!     let request = JobRequest::new(&session.id, "Which region grew fastest?")
//!         .with_dataset(&dataset.id)
//!         .with_streaming(true);
//!     let outcome = client.create_job(&request, &StreamOptions::default(), &cancel).await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome)?);
//!
//!     client.cleanup(Some(&session.id), Some(&dataset.id)).await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | [`Transport`](api::Transport), retry with backoff, SSE decoding |
//! | [`upload`] | Multipart upload protocol |
//! | [`sync`] | Dataset sync poller |
//! | [`resources`] | Request/response types for datasets, data sources, sessions, jobs |
//! | [`config`] | Credentials and transport configuration |
//! | [`error`] | [`PowerdrillError`] |

pub mod api;
pub mod config;
pub mod error;
pub mod prelude;
pub mod resources;
pub mod sync;
pub mod upload;

use std::path::Path;

use reqwest::Method;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::streaming::{StreamOptions, decode_stream};
use crate::api::Transport;
use crate::config::{ClientConfig, Credentials};
use crate::resources::{
    CleanupReport, Created, DATA_ANALYSIS_AGENT, DataSource, DataSourceInput, DatasetOverview,
    DatasetSummary, JobOutcome, JobRequest, JobResult, Page, PageQuery, SessionOptions,
    SessionSummary, path_segment,
};
use crate::sync::{StatusFuture, StatusSource, SyncPolicy, SyncStatus};
use crate::upload::UploadOptions;

pub use crate::error::{PowerdrillError, Result};

const DATASETS_PATH: &str = "/v2/team/datasets";
const SESSIONS_PATH: &str = "/v2/team/sessions";
const JOBS_PATH: &str = "/v2/team/jobs";

// ── Client ─────────────────────────────────────────────────────────

/// Client for the Powerdrill team API.
///
/// Cheap to clone; clones share the underlying [`Transport`] connection pool.
#[derive(Debug, Clone)]
pub struct PowerdrillClient {
    transport: Transport,
}

impl PowerdrillClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Build a client from `POWERDRILL_USER_ID`, `POWERDRILL_PROJECT_API_KEY`
    /// and (optionally) `POWERDRILL_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let transport = Transport::new(Credentials::from_env()?, ClientConfig::from_env())?;
        Ok(Self::new(transport))
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ── Datasets ───────────────────────────────────────────────────

    pub async fn list_datasets(&self, page: &PageQuery) -> Result<Page<DatasetSummary>> {
        self.transport
            .call(Method::GET, DATASETS_PATH, &page.to_query(), None)
            .await
    }

    pub async fn create_dataset(&self, name: &str, description: Option<&str>) -> Result<Created> {
        let mut body = json!({ "name": name });
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            body["description"] = json!(description);
        }
        self.transport
            .call(Method::POST, DATASETS_PATH, &[], Some(body))
            .await
    }

    pub async fn dataset_overview(&self, dataset_id: &str) -> Result<DatasetOverview> {
        let id = path_segment("dataset", dataset_id)?;
        self.transport
            .call(Method::GET, &format!("{DATASETS_PATH}/{id}/overview"), &[], None)
            .await
    }

    /// Current sync counters for a dataset's data sources.
    pub async fn dataset_status(&self, dataset_id: &str) -> Result<SyncStatus> {
        let id = path_segment("dataset", dataset_id)?;
        self.transport
            .call(Method::GET, &format!("{DATASETS_PATH}/{id}/status"), &[], None)
            .await
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<Value> {
        let id = path_segment("dataset", dataset_id)?;
        self.transport
            .call(
                Method::DELETE,
                &format!("{DATASETS_PATH}/{id}"),
                &[],
                Some(json!({})),
            )
            .await
    }

    // ── Data sources ───────────────────────────────────────────────

    pub async fn list_data_sources(
        &self,
        dataset_id: &str,
        page: &PageQuery,
        status: Option<&str>,
    ) -> Result<Page<DataSource>> {
        let id = path_segment("dataset", dataset_id)?;
        let mut query = page.to_query();
        if let Some(status) = status.filter(|s| !s.is_empty()) {
            query.push(("status", status.to_string()));
        }
        self.transport
            .call(
                Method::GET,
                &format!("{DATASETS_PATH}/{id}/datasources"),
                &query,
                None,
            )
            .await
    }

    pub async fn create_data_source(
        &self,
        dataset_id: &str,
        name: &str,
        input: &DataSourceInput,
    ) -> Result<DataSource> {
        let id = path_segment("dataset", dataset_id)?;
        let (field, value) = input.field();
        let mut body = json!({ "name": name, "type": "FILE" });
        body[field] = json!(value);
        self.transport
            .call(
                Method::POST,
                &format!("{DATASETS_PATH}/{id}/datasources"),
                &[],
                Some(body),
            )
            .await
    }

    /// Upload a local file; returns the `file_object_key`.
    pub async fn upload_file(&self, path: &Path, options: &UploadOptions) -> Result<String> {
        upload::upload_file(&self.transport, path, options).await
    }

    /// Upload a local file and register it as a data source named after the file.
    pub async fn upload_and_create_data_source(
        &self,
        dataset_id: &str,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<DataSource> {
        path_segment("dataset", dataset_id)?;
        let key = self.upload_file(path, options).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.clone());
        self.create_data_source(dataset_id, &name, &DataSourceInput::FileObjectKey(key))
            .await
    }

    /// Block until every data source of `dataset_id` is synced.
    pub async fn wait_for_sync(
        &self,
        dataset_id: &str,
        policy: &SyncPolicy,
        cancel: &CancellationToken,
    ) -> Result<SyncStatus> {
        sync::wait_for_sync(self, dataset_id, policy, cancel).await
    }

    // ── Sessions ───────────────────────────────────────────────────

    pub async fn list_sessions(&self, page: &PageQuery) -> Result<Page<SessionSummary>> {
        self.transport
            .call(Method::GET, SESSIONS_PATH, &page.to_query(), None)
            .await
    }

    pub async fn create_session(&self, name: &str, options: &SessionOptions) -> Result<Created> {
        let body = json!({
            "name": name,
            "output_language": options.output_language,
            "job_mode": options.job_mode,
            "max_contextual_job_history": options.max_contextual_job_history,
            "agent_id": DATA_ANALYSIS_AGENT,
        });
        self.transport
            .call(Method::POST, SESSIONS_PATH, &[], Some(body))
            .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<Value> {
        let id = path_segment("session", session_id)?;
        self.transport
            .call(
                Method::DELETE,
                &format!("{SESSIONS_PATH}/{id}"),
                &[],
                Some(json!({})),
            )
            .await
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Submit a question.
    ///
    /// With `request.stream` unset this is a single blocking call returning
    /// [`JobOutcome::Structured`]. With it set, the SSE response is decoded as
    /// it arrives and [`JobOutcome::Streamed`] is returned; `stream_options`
    /// and `cancel` only apply to that case.
    pub async fn create_job(
        &self,
        request: &JobRequest,
        stream_options: &StreamOptions,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome> {
        let body = serde_json::to_value(request)?;
        if !request.stream {
            let result: JobResult = self
                .transport
                .call(Method::POST, JOBS_PATH, &[], Some(body))
                .await?;
            return Ok(JobOutcome::Structured(result));
        }

        let lines = self.transport.open_stream(JOBS_PATH, body).await?;
        let job = decode_stream(lines, stream_options, cancel).await?;
        Ok(JobOutcome::Streamed(job))
    }

    /// Ask one question about a dataset within a session.
    pub async fn analyze(
        &self,
        session_id: &str,
        dataset_id: &str,
        question: &str,
        stream: bool,
    ) -> Result<JobOutcome> {
        let request = JobRequest::new(session_id, question)
            .with_dataset(dataset_id)
            .with_streaming(stream);
        self.create_job(&request, &StreamOptions::default(), &CancellationToken::new())
            .await
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Best-effort delete of a session and/or dataset. Failures are logged,
    /// never returned.
    pub async fn cleanup(
        &self,
        session_id: Option<&str>,
        dataset_id: Option<&str>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();
        if let Some(id) = session_id {
            report.session_deleted = Some(match self.delete_session(id).await {
                Ok(_) => {
                    info!("Session {id} deleted.");
                    true
                }
                Err(e) => {
                    warn!("Could not delete session {id}: {e}");
                    false
                }
            });
        }
        if let Some(id) = dataset_id {
            report.dataset_deleted = Some(match self.delete_dataset(id).await {
                Ok(_) => {
                    info!("Dataset {id} deleted.");
                    true
                }
                Err(e) => {
                    warn!("Could not delete dataset {id}: {e}");
                    false
                }
            });
        }
        report
    }
}

impl StatusSource for PowerdrillClient {
    fn fetch_status<'a>(&'a self, dataset_id: &'a str) -> StatusFuture<'a> {
        Box::pin(self.dataset_status(dataset_id))
    }
}
