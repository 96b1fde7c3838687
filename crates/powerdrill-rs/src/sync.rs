//! Waiting for a dataset's data sources to finish syncing.
//!
//! After a data source is created the service ingests it asynchronously.
//! [`wait_for_sync`] polls the dataset status until every source is synced,
//! fails fast as soon as any source is reported invalid (invalid sources
//! never recover), and gives up after a fixed number of attempts.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{PowerdrillError, Result};

/// Snapshot of a dataset's data-source states. Fetched fresh on every poll.
///
/// All three counters are required: a payload missing one is a decode error,
/// never an implicit zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub synched_count: u64,
    pub invalid_count: u64,
    pub synching_count: u64,
}

/// Poller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Polling,
    Synced,
    Invalid,
    TimedOut,
}

impl SyncStatus {
    /// Invalid sources take precedence over everything else.
    pub fn phase(&self) -> SyncPhase {
        if self.invalid_count > 0 {
            SyncPhase::Invalid
        } else if self.synching_count == 0 {
            SyncPhase::Synced
        } else {
            SyncPhase::Polling
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Total polls, the first one included. Default: 30.
    pub max_attempts: u32,
    /// Constant pause between polls. Default: 3 s.
    pub delay: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(3),
        }
    }
}

/// Boxed future returned by [`StatusSource::fetch_status`].
pub type StatusFuture<'a> = Pin<Box<dyn Future<Output = Result<SyncStatus>> + Send + 'a>>;

/// Anything that can report a dataset's sync status.
///
/// Implemented by [`PowerdrillClient`](crate::PowerdrillClient); tests plug in
/// scripted sources.
pub trait StatusSource: Send + Sync {
    fn fetch_status<'a>(&'a self, dataset_id: &'a str) -> StatusFuture<'a>;
}

/// Poll until the dataset is synced.
///
/// Fetch errors propagate unchanged. Cancelling `cancel` ends the wait with
/// [`PowerdrillError::Cancelled`], whether it fires during a fetch or a pause.
pub async fn wait_for_sync<S>(
    source: &S,
    dataset_id: &str,
    policy: &SyncPolicy,
    cancel: &CancellationToken,
) -> Result<SyncStatus>
where
    S: StatusSource + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PowerdrillError::Cancelled),
            status = source.fetch_status(dataset_id) => status?,
        };

        match status.phase() {
            SyncPhase::Invalid => {
                return Err(PowerdrillError::SyncInvalid {
                    dataset_id: dataset_id.to_string(),
                    invalid: status.invalid_count,
                });
            }
            SyncPhase::Synced => {
                info!("All {} data source(s) synced.", status.synched_count);
                return Ok(status);
            }
            SyncPhase::Polling | SyncPhase::TimedOut => {}
        }

        info!(
            "[{attempt}/{}] {} source(s) still syncing, {} synced.",
            policy.max_attempts, status.synching_count, status.synched_count
        );

        if attempt == policy.max_attempts {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PowerdrillError::Cancelled),
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }

    Err(PowerdrillError::SyncTimeout {
        dataset_id: dataset_id.to_string(),
        attempts: policy.max_attempts,
    })
}
