//! Convenience re-exports for common `powerdrill-rs` types.
//!
//! ```ignore
//! use powerdrill_rs::prelude::*;
//! ```
//!
//! Covers the client, its option types and the result shapes. Lower-level
//! pieces (the SSE fold, plan validation, retry helpers) stay in their
//! modules.

// ── Client ──────────────────────────────────────────────────────────
pub use crate::PowerdrillClient;
pub use crate::api::{RetryConfig, Transport};
pub use crate::config::{ClientConfig, Credentials};
pub use crate::error::{PowerdrillError, Result};

// ── Options ─────────────────────────────────────────────────────────
pub use crate::api::StreamOptions;
pub use crate::resources::{DataSourceInput, JobRequest, PageQuery, SessionOptions};
pub use crate::sync::SyncPolicy;
pub use crate::upload::UploadOptions;

// ── Results ─────────────────────────────────────────────────────────
pub use crate::api::{Block, BlockKind, StreamedJob};
pub use crate::resources::{CleanupReport, JobOutcome, JobResult};
pub use crate::sync::SyncStatus;

pub use tokio_util::sync::CancellationToken;
