//! Command-line access to the Powerdrill data-analysis API.
//!
//! Reads credentials from `POWERDRILL_USER_ID` and
//! `POWERDRILL_PROJECT_API_KEY`. Results are printed to stdout as JSON; logs
//! go to stderr (`RUST_LOG` or `-v` to change verbosity).
//!
//! # Examples
//!
//! ```sh
//! powerdrill create-dataset "Quarterly sales" --description "FY25 exports"
//! powerdrill upload-file ds-123 ./sales.csv
//! powerdrill wait-sync ds-123
//! powerdrill create-session "sales q&a"
//! powerdrill create-job sess-456 "Which region grew fastest?" --dataset-id ds-123 --stream
//! powerdrill cleanup --session-id sess-456 --dataset-id ds-123
//! ```

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use powerdrill_rs::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command-line client for the Powerdrill data-analysis API.
#[derive(Parser)]
#[command(name = "powerdrill", version)]
struct Cli {
    /// Log debug output (per-request timing, retries) to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // ── Datasets ───────────────────────────────────────────────
    /// List datasets
    ListDatasets {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page_number: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Create a dataset
    CreateDataset {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show a dataset's overview (summary, keywords, suggested questions)
    GetDatasetOverview { dataset_id: String },
    /// Delete a dataset
    DeleteDataset { dataset_id: String },

    // ── Data sources ───────────────────────────────────────────
    /// List the data sources in a dataset
    ListDataSources {
        dataset_id: String,
        /// Filter by status (e.g. synched, invalid, synching)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 1)]
        page_number: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Create a data source from a public URL or an uploaded file key
    CreateDataSource {
        dataset_id: String,
        name: String,
        #[arg(long, conflicts_with = "file_object_key")]
        url: Option<String>,
        #[arg(long)]
        file_object_key: Option<String>,
    },
    /// Upload a local file and register it as a data source
    UploadFile {
        dataset_id: String,
        file_path: PathBuf,
        /// Part uploads in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Wait until every data source in a dataset is synced
    WaitSync {
        dataset_id: String,
        #[arg(long, default_value_t = 30)]
        max_attempts: u32,
        /// Seconds between polls
        #[arg(long, default_value_t = 3.0)]
        delay: f64,
    },

    // ── Sessions ───────────────────────────────────────────────
    /// Create a session
    CreateSession {
        name: String,
        #[arg(long, default_value = "AUTO")]
        output_language: String,
        #[arg(long, default_value = "AUTO")]
        job_mode: String,
        /// Earlier jobs kept as context
        #[arg(long, default_value_t = 10)]
        max_history: u32,
    },
    /// List sessions
    ListSessions {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page_number: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Delete a session
    DeleteSession { session_id: String },

    // ── Jobs ───────────────────────────────────────────────────
    /// Ask a question within a session
    CreateJob {
        session_id: String,
        question: String,
        #[arg(long)]
        dataset_id: Option<String>,
        /// Restrict the job to these data sources (repeatable)
        #[arg(long = "datasource-id")]
        datasource_ids: Vec<String>,
        /// Stream the answer and print the folded result
        #[arg(long)]
        stream: bool,
        #[arg(long, default_value = "AUTO")]
        output_language: String,
        #[arg(long, default_value = "AUTO")]
        job_mode: String,
    },

    // ── Cleanup ────────────────────────────────────────────────
    /// Delete a session and/or dataset, ignoring failures
    Cleanup {
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        dataset_id: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "powerdrill=debug,powerdrill_rs=debug"
    } else {
        "powerdrill=info,powerdrill_rs=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn page(search: Option<String>, page_number: u32, page_size: u32) -> PageQuery {
    PageQuery {
        page_number,
        page_size,
        search,
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling...");
            token.cancel();
        }
    });
}

async fn run(command: Command) -> Result<Option<String>> {
    let client = PowerdrillClient::from_env()?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let output = match command {
        Command::ListDatasets {
            search,
            page_number,
            page_size,
        } => to_json(
            &client
                .list_datasets(&page(search, page_number, page_size))
                .await?,
        )?,
        Command::CreateDataset { name, description } => {
            to_json(&client.create_dataset(&name, Some(&description)).await?)?
        }
        Command::GetDatasetOverview { dataset_id } => {
            to_json(&client.dataset_overview(&dataset_id).await?)?
        }
        Command::DeleteDataset { dataset_id } => to_json(&client.delete_dataset(&dataset_id).await?)?,
        Command::ListDataSources {
            dataset_id,
            status,
            page_number,
            page_size,
        } => to_json(
            &client
                .list_data_sources(
                    &dataset_id,
                    &page(None, page_number, page_size),
                    status.as_deref(),
                )
                .await?,
        )?,
        Command::CreateDataSource {
            dataset_id,
            name,
            url,
            file_object_key,
        } => {
            let input = DataSourceInput::from_options(url, file_object_key)?;
            to_json(&client.create_data_source(&dataset_id, &name, &input).await?)?
        }
        Command::UploadFile {
            dataset_id,
            file_path,
            concurrency,
        } => to_json(
            &client
                .upload_and_create_data_source(
                    &dataset_id,
                    &file_path,
                    &UploadOptions::with_concurrency(concurrency),
                )
                .await?,
        )?,
        Command::WaitSync {
            dataset_id,
            max_attempts,
            delay,
        } => {
            let delay = Duration::try_from_secs_f64(delay).map_err(|_| {
                PowerdrillError::Validation(format!("invalid delay '{delay}'"))
            })?;
            let policy = SyncPolicy {
                max_attempts,
                delay,
            };
            to_json(&client.wait_for_sync(&dataset_id, &policy, &cancel).await?)?
        }
        Command::CreateSession {
            name,
            output_language,
            job_mode,
            max_history,
        } => {
            let options = SessionOptions {
                output_language,
                job_mode,
                max_contextual_job_history: max_history,
            };
            to_json(&client.create_session(&name, &options).await?)?
        }
        Command::ListSessions {
            search,
            page_number,
            page_size,
        } => to_json(
            &client
                .list_sessions(&page(search, page_number, page_size))
                .await?,
        )?,
        Command::DeleteSession { session_id } => {
            to_json(&client.delete_session(&session_id).await?)?
        }
        Command::CreateJob {
            session_id,
            question,
            dataset_id,
            datasource_ids,
            stream,
            output_language,
            job_mode,
        } => {
            let mut request = JobRequest::new(session_id, question)
                .with_datasources(datasource_ids)
                .with_streaming(stream)
                .with_output_language(output_language);
            request.job_mode = job_mode;
            if let Some(id) = dataset_id {
                request = request.with_dataset(id);
            }
            to_json(
                &client
                    .create_job(&request, &StreamOptions::default(), &cancel)
                    .await?,
            )?
        }
        Command::Cleanup {
            session_id,
            dataset_id,
        } => {
            client
                .cleanup(session_id.as_deref(), dataset_id.as_deref())
                .await;
            return Ok(None);
        }
    };

    Ok(Some(output))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(Some(output)) => println!("{output}"),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
