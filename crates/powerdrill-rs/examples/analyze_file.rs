//! End-to-end walk through the API: upload a local file, wait for it to
//! sync, ask a streamed question, then clean up.
//!
//! # Usage
//!
//! ```bash
//! POWERDRILL_USER_ID=... POWERDRILL_PROJECT_API_KEY=... \
//!     cargo run --example analyze_file -- ./sales.csv "Which region grew fastest?"
//! ```

use std::path::PathBuf;

use powerdrill_rs::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(file), Some(question)) = (args.next(), args.next()) else {
        return Err(PowerdrillError::Validation(
            "usage: analyze_file <path> <question>".into(),
        ));
    };
    let file = PathBuf::from(file);

    let client = PowerdrillClient::from_env()?;
    let cancel = CancellationToken::new();

    let dataset = client
        .create_dataset("analyze_file example", Some("created by the analyze_file example"))
        .await?;
    let session = client
        .create_session("analyze_file", &SessionOptions::default())
        .await?;

    let outcome = async {
        client
            .upload_and_create_data_source(&dataset.id, &file, &UploadOptions::with_concurrency(4))
            .await?;
        client
            .wait_for_sync(&dataset.id, &SyncPolicy::default(), &cancel)
            .await?;

        let request = JobRequest::new(&session.id, question)
            .with_dataset(&dataset.id)
            .with_streaming(true);
        client
            .create_job(&request, &StreamOptions::default(), &cancel)
            .await
    }
    .await;

    client.cleanup(Some(&session.id), Some(&dataset.id)).await;

    match outcome? {
        JobOutcome::Streamed(job) => {
            println!("{}", job.text);
            for block in &job.blocks {
                println!("[{:?}] {}", block.kind, block.content);
            }
        }
        JobOutcome::Structured(result) => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}
