//! Multipart upload of local files.
//!
//! The service decides how a file is partitioned. [`upload_file`] asks for a
//! plan, streams each part's byte range to its pre-signed URL, and completes
//! the upload with the collected entity tags. The returned `file_object_key`
//! is what [`create_data_source`](crate::PowerdrillClient::create_data_source)
//! expects.
//!
//! Any failure aborts the whole upload. Nothing is resumed and partially
//! initiated uploads are not cleaned up; callers retry from scratch.

use std::collections::BTreeSet;
use std::path::Path;

use futures::{Stream, TryStreamExt, stream};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::api::Transport;
use crate::error::{PowerdrillError, Result};

const INIT_PATH: &str = "/v2/team/file/init-multipart-upload";
const COMPLETE_PATH: &str = "/v2/team/file/complete-multipart-upload";

/// Partition returned by the initiate call.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPlan {
    pub upload_id: String,
    pub file_object_key: String,
    #[serde(default)]
    pub part_items: Vec<PartSpec>,
}

/// One part of an [`UploadPlan`].
#[derive(Debug, Clone, Deserialize)]
pub struct PartSpec {
    /// 1-based position in the file.
    pub number: u32,
    pub size: u64,
    /// Pre-signed, single-use target.
    pub upload_url: String,
}

/// Acknowledgment of one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartResult {
    pub number: u32,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Part uploads in flight at once. File reads stay sequential.
    /// Default: 1.
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl UploadOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }
}

impl UploadPlan {
    /// Parts in ascending `number` order, after checking that they tile a
    /// file of `file_size` bytes.
    pub fn ordered_parts(&self, file_size: u64) -> Result<Vec<PartSpec>> {
        let mut parts = self.part_items.clone();
        parts.sort_by_key(|p| p.number);

        let mut seen = BTreeSet::new();
        for part in &parts {
            if part.number == 0 {
                return Err(PowerdrillError::Protocol(
                    "part numbers must start at 1".into(),
                ));
            }
            if !seen.insert(part.number) {
                return Err(PowerdrillError::Protocol(format!(
                    "part {} listed twice",
                    part.number
                )));
            }
            if part.size == 0 {
                return Err(PowerdrillError::Protocol(format!(
                    "part {} has zero size",
                    part.number
                )));
            }
        }

        let total: u64 = parts.iter().map(|p| p.size).sum();
        if total != file_size {
            return Err(PowerdrillError::Protocol(format!(
                "plan covers {total} bytes but the file has {file_size}"
            )));
        }
        Ok(parts)
    }
}

/// Fail unless every planned part has exactly one result.
pub fn check_results(parts: &[PartSpec], results: &[PartResult]) -> Result<()> {
    if parts.len() != results.len() {
        return Err(PowerdrillError::Protocol(format!(
            "{} part(s) planned but {} uploaded",
            parts.len(),
            results.len()
        )));
    }
    let planned: BTreeSet<u32> = parts.iter().map(|p| p.number).collect();
    let uploaded: BTreeSet<u32> = results.iter().map(|r| r.number).collect();
    if uploaded.len() != results.len() {
        return Err(PowerdrillError::Protocol(
            "duplicate part results".into(),
        ));
    }
    if planned != uploaded {
        return Err(PowerdrillError::Protocol(format!(
            "uploaded parts {uploaded:?} do not match planned parts {planned:?}"
        )));
    }
    Ok(())
}

/// Read each part's bytes from a sequential cursor.
///
/// Parts must already be in file order. A reader that ends early is a
/// protocol failure: the plan promised more bytes than exist.
pub fn read_parts<R>(
    reader: R,
    parts: Vec<PartSpec>,
) -> impl Stream<Item = Result<(PartSpec, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    stream::try_unfold(
        (reader, parts.into_iter()),
        |(mut reader, mut parts)| async move {
            let Some(part) = parts.next() else {
                return Ok::<_, PowerdrillError>(None);
            };
            let len = usize::try_from(part.size).map_err(|_| {
                PowerdrillError::Protocol(format!("part {} is too large", part.number))
            })?;
            let mut chunk = vec![0u8; len];
            reader.read_exact(&mut chunk).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    PowerdrillError::Protocol(format!(
                        "file ended before part {} was complete",
                        part.number
                    ))
                } else {
                    PowerdrillError::Io(e)
                }
            })?;
            Ok(Some(((part, chunk), (reader, parts))))
        },
    )
}

/// Upload a local file and return its `file_object_key`.
pub async fn upload_file(
    transport: &Transport,
    path: &Path,
    options: &UploadOptions,
) -> Result<String> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        _ => return Err(PowerdrillError::NotFound(path.to_path_buf())),
    };
    let file_size = metadata.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PowerdrillError::NotFound(path.to_path_buf()))?;

    let plan: UploadPlan = transport
        .call(
            Method::POST,
            INIT_PATH,
            &[],
            Some(json!({"file_name": file_name, "file_size": file_size})),
        )
        .await?;
    let parts = plan.ordered_parts(file_size)?;
    info!(
        "Uploading {file_name} ({file_size} bytes) in {} part(s)",
        parts.len()
    );

    let results = transfer_parts(transport, path, parts.clone(), options.concurrency).await?;
    check_results(&parts, &results)?;

    let _: Value = transport
        .call(
            Method::POST,
            COMPLETE_PATH,
            &[],
            Some(json!({
                "file_object_key": plan.file_object_key,
                "upload_id": plan.upload_id,
                "part_etags": results,
            })),
        )
        .await?;
    info!("Upload of {file_name} complete: {}", plan.file_object_key);

    Ok(plan.file_object_key)
}

/// PUT every part, at most `concurrency` at a time.
///
/// Results come back in part order. The first failure drops the parts still
/// in flight and is returned.
async fn transfer_parts(
    transport: &Transport,
    path: &Path,
    parts: Vec<PartSpec>,
    concurrency: usize,
) -> Result<Vec<PartResult>> {
    let file = tokio::fs::File::open(path).await?;
    let total = parts.len();

    read_parts(file, parts)
        .map_ok(|(part, chunk)| async move {
            let etag = transport.put_part(&part.upload_url, chunk).await?;
            debug!("Part {}/{total} uploaded ({} bytes)", part.number, part.size);
            Ok::<_, PowerdrillError>(PartResult {
                number: part.number,
                etag,
            })
        })
        .try_buffered(concurrency.max(1))
        .try_collect()
        .await
}
