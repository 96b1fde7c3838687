//! API interaction layer: transport, retry, and SSE decoding.
//!
//! - [`transport`]: authenticated JSON calls with the envelope check, plus
//!   the streaming call and raw part uploads. One [`Transport`] per process,
//!   cloned into every caller.
//! - [`retry`]: exponential backoff for idempotent calls on 502/503/504 and
//!   connect/timeout failures. Never retries POSTs.
//! - [`streaming`]: SSE line fold producing a
//!   [`StreamedJob`](streaming::StreamedJob).

pub mod retry;
pub mod streaming;
pub mod transport;

pub use retry::RetryConfig;
pub use streaming::{Block, BlockKind, StreamOptions, StreamedJob, decode_lines, decode_stream};
pub use transport::{LineStream, Transport};
