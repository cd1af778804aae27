//! # Listing Harvest
//!
//! Collects yesterday's classified-ad listings from q84sale category pages,
//! saves one spreadsheet per category, and uploads them into a dated folder
//! on Google Drive.
//!
//! ## Usage
//!
//! ```sh
//! FF_GCLOUD_KEY_JSON="$(cat key.json)" listing_harvest --profile fashion-and-family
//! ```
//!
//! ## Architecture
//!
//! The run is a pipeline driven by [`scheduler::Harvester`]:
//! 1. **Scraping**: categories are processed in chunks; within a chunk, at most
//!    `max_concurrency` categories fetch pages at once
//! 2. **Filtering**: only listings published yesterday are kept
//! 3. **Saving**: each non-empty category becomes `<category>.xlsx`
//! 4. **Uploading**: each chunk's files go into the `YYYY-MM-DD` folder, with
//!    retries and re-authentication, then the local copies are deleted
//!
//! A profile (see [`config::DomainProfile`]) supplies the categories, the
//! Drive parent folder and the credential variable; the engine is the same
//! for every profile.

use clap::Parser;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod config;
mod filter;
mod models;
mod outputs;
mod scheduler;
mod scrapers;
mod setup;
mod storage;
#[cfg(test)]
mod testing;
mod upload;
mod utils;

use cli::Cli;
use config::DomainProfile;
use scheduler::{HarvestError, Harvester};
use scrapers::q84sale::HttpPageFetcher;
use storage::local::LocalStore;
use upload::UploadPipeline;

/// Stdout logging, plus an appended plain-text copy in `log_file` if given.
fn init_tracing(log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    init_tracing(args.log_file().map(|p| p.as_path()))?;

    let start_time = std::time::Instant::now();
    info!("listing_harvest starting up");

    let profile = DomainProfile::resolve(&args.profile)?;
    info!(
        profile = %profile.name,
        categories = profile.categories.len(),
        parent = %profile.parent_folder_id,
        "Loaded profile"
    );

    let config = args.engine_config();
    setup::prepare_artifact_dir(&config.artifact_dir).await?;

    let store = match &args.local_store {
        Some(root) => {
            info!(root = %root.display(), "Using local directory store");
            setup::connect(LocalStore::new(root, &profile.parent_folder_id)).await?
        }
        None => setup::connect_drive(&profile).await?,
    };

    let fetcher = HttpPageFetcher::new()?;
    let uploads = UploadPipeline::new(store, &config);
    let harvester = Harvester::new(fetcher, uploads, config);

    let result = harvester.run(&profile.categories).await;
    let elapsed = start_time.elapsed();

    match result {
        Ok(report) => {
            let summary = serde_json::to_string(&report).unwrap_or_default();
            if report.is_complete() {
                info!(?elapsed, report = %summary, "Harvest complete");
            } else {
                warn!(?elapsed, report = %summary, "Harvest finished with skipped work");
            }
            Ok(())
        }
        Err(HarvestError::FolderResolution { source, report }) => {
            let summary = serde_json::to_string(&report).unwrap_or_default();
            error!(?elapsed, error = %source, report = %summary, "Harvest stopped");
            Err(HarvestError::FolderResolution { source, report }.into())
        }
    }
}
