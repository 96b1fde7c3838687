//! In-process mock of the Powerdrill API for integration tests.
//!
//! Each test spawns its own axum server on port 0 and configures it through
//! [`MockState`]. Handlers record what they saw so tests can assert on the
//! exact request sequence.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use powerdrill_rs::PowerdrillClient;
use powerdrill_rs::api::{RetryConfig, Transport};
use powerdrill_rs::config::{ClientConfig, Credentials};
use serde_json::{Value, json};

pub const USER_ID: &str = "user-1";
pub const API_KEY: &str = "key-1";

/// One request as seen by the mock.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub api_key: Option<String>,
    pub body: Value,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub base: String,

    /// Part sizes handed out by the initiate call.
    pub plan_sizes: Vec<u64>,
    /// List plan parts in descending number order.
    pub reverse_plan: bool,
    /// Part number whose PUT answers HTTP 500.
    pub fail_part: Option<u32>,
    /// Received part bodies, in arrival order.
    pub parts: Vec<(u32, Vec<u8>)>,

    /// Statuses replayed by the status endpoint; the last one repeats.
    pub status_script: Vec<Value>,
    pub status_polls: usize,

    /// GET /datasets answers 503 this many times before succeeding.
    pub transient_failures: u32,
    /// POST /datasets answers with this HTTP status when set.
    pub fail_post_status: Option<u16>,

    /// Raw SSE body for streaming jobs.
    pub sse_body: String,
    /// Split the SSE body into chunks of this many bytes.
    pub sse_chunk: Option<usize>,
    /// Streaming job answers with this HTTP status when set.
    pub fail_stream_status: Option<u16>,

    /// Every API request, in order.
    pub requests: Vec<Recorded>,
    /// Coarse event log: `init`, `part:N`, `complete`, ...
    pub log: Vec<String>,
}

pub type Shared = Arc<Mutex<MockState>>;

impl MockState {
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }
}

/// Start a mock server and return its shared state and base URL.
pub async fn spawn(state: MockState) -> (Shared, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shared = Arc::new(Mutex::new(MockState {
        base: base.clone(),
        ..state
    }));
    let app = router(shared.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (shared, base)
}

/// Client pointed at the mock, with fast retries.
pub fn client(base: &str) -> PowerdrillClient {
    let config = ClientConfig::default()
        .with_base_url(format!("{base}/api"))
        .with_retry(RetryConfig {
            initial_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        });
    let transport = Transport::new(Credentials::new(USER_ID, API_KEY), config).unwrap();
    PowerdrillClient::new(transport)
}

fn router(state: Shared) -> Router {
    Router::new()
        .route(
            "/api/v2/team/datasets",
            get(list_datasets).post(create_dataset),
        )
        .route("/api/v2/team/datasets/{id}", delete(delete_resource))
        .route("/api/v2/team/datasets/{id}/status", get(dataset_status))
        .route("/api/v2/team/datasets/{id}/overview", get(dataset_overview))
        .route(
            "/api/v2/team/datasets/{id}/datasources",
            get(list_page).post(create_data_source),
        )
        .route("/api/v2/team/file/init-multipart-upload", post(init_upload))
        .route(
            "/api/v2/team/file/complete-multipart-upload",
            post(complete_upload),
        )
        .route(
            "/api/v2/team/sessions",
            get(list_page).post(create_session),
        )
        .route("/api/v2/team/sessions/{id}", delete(delete_resource))
        .route("/api/v2/team/jobs", post(create_job))
        .route("/storage/part/{n}", put(upload_part))
        .with_state(state)
}

fn ok(data: Value) -> Response {
    Json(json!({"code": 0, "message": "ok", "data": data})).into_response()
}

fn record(state: &Shared, method: &str, uri: &Uri, headers: &HeaderMap, body: Value) {
    let api_key = headers
        .get("x-pd-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.lock().unwrap().requests.push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        api_key,
        body,
    });
}

async fn list_datasets(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, "GET", &uri, &headers, Value::Null);
    let mut s = state.lock().unwrap();
    if s.transient_failures > 0 {
        s.transient_failures -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
    }
    ok(json!({
        "page_number": 1,
        "page_size": 10,
        "total_items": 1,
        "records": [{"id": "ds-1", "name": "Sales", "description": "FY25"}],
    }))
}

async fn create_dataset(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers, body.clone());
    if let Some(status) = state.lock().unwrap().fail_post_status {
        return (StatusCode::from_u16(status).unwrap(), "unavailable").into_response();
    }
    if body["name"] == "dup" {
        return Json(json!({"code": 40001, "message": "dataset name already exists"}))
            .into_response();
    }
    ok(json!({"id": "ds-new"}))
}

async fn delete_resource(
    State(state): State<Shared>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "DELETE", &uri, &headers, body);
    if id.starts_with("missing") {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    ok(Value::Null)
}

async fn dataset_status(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, "GET", &uri, &headers, Value::Null);
    let mut s = state.lock().unwrap();
    let idx = s.status_polls.min(s.status_script.len().saturating_sub(1));
    s.status_polls += 1;
    let status = s.status_script.get(idx).cloned().unwrap_or(Value::Null);
    if status.get("code").is_some() {
        return Json(status).into_response();
    }
    ok(status)
}

async fn dataset_overview(
    State(state): State<Shared>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, "GET", &uri, &headers, Value::Null);
    ok(json!({
        "id": id,
        "name": "Sales",
        "summary": "Quarterly sales by region",
        "exploration_questions": ["Which region grew fastest?"],
        "keywords": ["sales", "region"],
    }))
}

/// Generic one-record page for list endpoints without special behavior.
async fn list_page(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, "GET", &uri, &headers, Value::Null);
    ok(json!({
        "page_number": 2,
        "page_size": 5,
        "total_items": 6,
        "records": [{"id": "rec-6", "name": "sixth", "status": "synched"}],
    }))
}

async fn create_data_source(
    State(state): State<Shared>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers, body.clone());
    ok(json!({
        "id": "src-1",
        "name": body["name"],
        "type": body["type"],
        "status": "synching",
        "dataset_id": id,
    }))
}

async fn init_upload(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers, body);
    let mut s = state.lock().unwrap();
    s.log.push("init".into());
    let mut items: Vec<Value> = s
        .plan_sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            let n = i + 1;
            json!({
                "number": n,
                "size": size,
                "upload_url": format!("{}/storage/part/{n}", s.base),
            })
        })
        .collect();
    if s.reverse_plan {
        items.reverse();
    }
    ok(json!({
        "upload_id": "up-1",
        "file_object_key": "uploads/user-1/sales.csv",
        "part_items": items,
    }))
}

async fn upload_part(
    State(state): State<Shared>,
    Path(n): Path<u32>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Give concurrent uploads a chance to overlap.
    tokio::time::sleep(Duration::from_millis(5 * u64::from(4 - n.min(4)))).await;
    let mut s = state.lock().unwrap();
    assert!(
        headers.get("x-pd-api-key").is_none(),
        "API key leaked to storage"
    );
    if s.fail_part == Some(n) {
        s.log.push(format!("fail:{n}"));
        return (StatusCode::INTERNAL_SERVER_ERROR, "storage error").into_response();
    }
    s.log.push(format!("part:{n}"));
    s.parts.push((n, body.to_vec()));
    ([(header::ETAG, format!("\"etag-{n}\""))], "").into_response()
}

async fn complete_upload(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers, body);
    state.lock().unwrap().log.push("complete".into());
    ok(json!({"file_object_key": "uploads/user-1/sales.csv"}))
}

async fn create_session(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers, body);
    ok(json!({"id": "sess-1"}))
}

async fn create_job(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers, body.clone());
    let s = state.lock().unwrap();

    if body["stream"] != true {
        return ok(json!({
            "job_id": "job-blocking",
            "blocks": [
                {"type": "MESSAGE", "content": "Revenue grew 12%.", "stage": "Answer", "group_name": "Conclusion"},
                {"type": "TABLE", "content": {"url": "https://x/t.csv", "name": "t.csv"}, "stage": "Answer"},
            ],
        }));
    }

    if let Some(status) = s.fail_stream_status {
        return (StatusCode::from_u16(status).unwrap(), "stream failed").into_response();
    }

    let bytes = s.sse_body.clone().into_bytes();
    let body = match s.sse_chunk {
        Some(size) => {
            let chunks: Vec<Result<Bytes, std::io::Error>> = bytes
                .chunks(size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Body::from_stream(futures::stream::iter(chunks))
        }
        None => Body::from(bytes),
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
