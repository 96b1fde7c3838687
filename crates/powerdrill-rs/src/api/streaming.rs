//! Server-Sent Events (SSE) decoding for streamed analysis jobs.
//!
//! A streamed job answers with `event:` and `data:` lines. Each `data:` line
//! is a JSON chunk whose first choice carries a delta: either a text fragment
//! or a structured object (a table or image reference). [`StreamState`] folds
//! those lines one at a time into a [`StreamedJob`].
//!
//! The fold step is shared by a synchronous entry point ([`decode_lines`],
//! any iterator of lines) and an async one ([`decode_stream`], a live
//! response with idle timeout and cancellation). Decoding stops at the first
//! of: an `END_MARK` event, a `[DONE]` data line, or the end of the input.
//! All three return what was accumulated so far.

use std::ops::ControlFlow;
use std::time::Duration;

use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{PowerdrillError, Result};

/// Event name that ends a stream.
pub const END_MARK: &str = "END_MARK";
/// Data payload that ends a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Classification of a non-text delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockKind {
    Table,
    Image,
    Unknown,
}

/// A structured piece of a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub group_name: String,
    pub stage: String,
    pub content: Value,
}

/// The folded result of a streamed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamedJob {
    pub job_id: String,
    /// All text fragments joined in arrival order, no separators.
    pub text: String,
    pub blocks: Vec<Block>,
}

/// Why decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    EndMark,
    DoneSentinel,
    SourceExhausted,
}

/// Options for [`decode_stream`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Give up when no line arrives within this window. `None` waits forever.
    /// Default: 120 s.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Mutable decode state, owned by a single decode pass.
#[derive(Debug, Default)]
pub struct StreamState {
    job_id: String,
    text: Vec<String>,
    blocks: Vec<Block>,
    current_event: Option<String>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Breaks when the line terminates the stream.
    pub fn feed(&mut self, line: &str) -> ControlFlow<Termination> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line.starts_with(':') {
            return ControlFlow::Continue(());
        }

        if let Some(name) = line.strip_prefix("event:") {
            let name = name.trim();
            if name == END_MARK {
                return ControlFlow::Break(Termination::EndMark);
            }
            self.current_event = Some(name.to_string());
            return ControlFlow::Continue(());
        }

        if let Some(raw) = line.strip_prefix("data:") {
            let raw = raw.trim();
            if raw == DONE_SENTINEL {
                return ControlFlow::Break(Termination::DoneSentinel);
            }
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(event)) => self.apply(event),
                Ok(other) => trace!(
                    "Skipping non-object SSE data (event={:?}): {other}",
                    self.current_event
                ),
                Err(e) => trace!(
                    "Skipping malformed SSE data (event={:?}): {e}",
                    self.current_event
                ),
            }
        }

        ControlFlow::Continue(())
    }

    /// Fold one parsed event. Fields are read leniently: a field of an
    /// unexpected type is treated as absent without discarding the rest.
    fn apply(&mut self, mut event: Map<String, Value>) {
        if self.job_id.is_empty()
            && let Some(id) = event.get("id").and_then(Value::as_str)
            && !id.is_empty()
        {
            self.job_id = id.to_string();
        }

        let Some(content) = event
            .get_mut("choices")
            .and_then(|choices| choices.get_mut(0))
            .and_then(|choice| choice.get_mut("delta"))
            .and_then(|delta| delta.get_mut("content"))
            .map(Value::take)
        else {
            return;
        };

        match content {
            Value::String(fragment) => self.text.push(fragment),
            Value::Object(map) => self.blocks.push(Block {
                kind: classify_block(&map),
                group_name: text_field(&event, "group_name"),
                stage: text_field(&event, "stage"),
                content: Value::Object(map),
            }),
            _ => {}
        }
    }

    /// Name of the most recent non-terminal `event:` line.
    pub fn current_event(&self) -> Option<&str> {
        self.current_event.as_deref()
    }

    /// Freeze the accumulated state.
    pub fn finish(self) -> StreamedJob {
        StreamedJob {
            job_id: self.job_id,
            text: self.text.concat(),
            blocks: self.blocks,
        }
    }
}

fn text_field(event: &Map<String, Value>, key: &str) -> String {
    event
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Classify a structured delta.
///
/// Content with both `url` and `name` is a file reference: `.csv` names are
/// tables, everything else is an image. Anything else is unknown.
pub fn classify_block(content: &Map<String, Value>) -> BlockKind {
    if !(content.contains_key("url") && content.contains_key("name")) {
        return BlockKind::Unknown;
    }
    let name = content.get("name").and_then(Value::as_str).unwrap_or_default();
    let ext = name.rsplit('.').next().unwrap_or_default();
    if ext.eq_ignore_ascii_case("csv") {
        BlockKind::Table
    } else {
        BlockKind::Image
    }
}

/// Fold an iterator of lines, reporting why decoding stopped.
///
/// No line after a terminator is pulled from the iterator.
pub fn fold_lines<I, S>(lines: I) -> (StreamedJob, Termination)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut state = StreamState::new();
    let termination = match lines
        .into_iter()
        .try_for_each(|line| state.feed(line.as_ref()))
    {
        ControlFlow::Break(t) => t,
        ControlFlow::Continue(()) => Termination::SourceExhausted,
    };
    (state.finish(), termination)
}

/// Decode a finite sequence of SSE lines.
pub fn decode_lines<I, S>(lines: I) -> StreamedJob
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fold_lines(lines).0
}

/// Decode a live line stream.
///
/// A read error from `lines` is returned as-is. Cancellation returns
/// [`PowerdrillError::Cancelled`]; an idle window with no line returns
/// [`PowerdrillError::StreamIdle`].
pub async fn decode_stream<S>(
    mut lines: S,
    options: &StreamOptions,
    cancel: &CancellationToken,
) -> Result<StreamedJob>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    let mut state = StreamState::new();
    let mut count = 0usize;

    let termination = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PowerdrillError::Cancelled),
            next = next_line(&mut lines, options.idle_timeout) => next?,
        };
        let Some(line) = next else {
            break Termination::SourceExhausted;
        };
        count += 1;
        if let ControlFlow::Break(t) = state.feed(&line) {
            break t;
        }
    };

    let job = state.finish();
    debug!(
        "Stream ended ({termination:?}) after {count} lines: job_id={}, {} chars text, {} block(s)",
        job.job_id,
        job.text.len(),
        job.blocks.len()
    );
    Ok(job)
}

async fn next_line<S>(lines: &mut S, idle_timeout: Option<Duration>) -> Result<Option<String>>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, lines.next()).await {
            Ok(item) => item.transpose(),
            Err(_) => Err(PowerdrillError::StreamIdle(limit)),
        },
        None => lines.next().await.transpose(),
    }
}

/// Split a response body into lines as chunks arrive.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// chunks decode correctly. A trailing line without a newline is still
/// yielded when the body ends.
pub fn response_lines(resp: reqwest::Response) -> impl Stream<Item = Result<String>> + Send {
    stream::unfold(LineReader::new(resp), |mut reader| async move {
        match reader.next_line().await {
            Ok(Some(line)) => Some((Ok(line), reader)),
            Ok(None) => None,
            Err(e) => Some((Err(e), reader)),
        }
    })
}

struct LineReader {
    resp: Option<reqwest::Response>,
    buffer: Vec<u8>,
}

impl LineReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            resp: Some(resp),
            buffer: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(raw) = take_line(&mut self.buffer, self.resp.is_none()) {
                return Ok(Some(decode_line(&raw)));
            }
            let Some(resp) = self.resp.as_mut() else {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let raw = std::mem::take(&mut self.buffer);
                return Ok(Some(decode_line(&raw)));
            };
            match resp.chunk().await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.resp = None,
                Err(e) => {
                    // Poison the reader so the stream ends after the error.
                    self.resp = None;
                    self.buffer.clear();
                    return Err(e.into());
                }
            }
        }
    }
}

/// Remove the first complete line from `buffer`, terminator included.
///
/// Lines end in `\n`, `\r\n` or a lone `\r`. A `\r` at the very end of the
/// buffer is ambiguous until the next byte arrives, so it only counts as a
/// terminator once the body has ended.
fn take_line(buffer: &mut Vec<u8>, at_eof: bool) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|&b| b == b'\n' || b == b'\r')?;
    let end = if buffer.get(pos) == Some(&b'\r') {
        match buffer.get(pos + 1) {
            Some(b'\n') => pos + 2,
            Some(_) => pos + 1,
            None if at_eof => pos + 1,
            None => return None,
        }
    } else {
        pos + 1
    };
    Some(buffer.drain(..end).collect())
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
