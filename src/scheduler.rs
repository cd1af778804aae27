//! Chunked, permit-bounded harvest of every category in a profile.
//!
//! # Pipeline
//!
//! 1. Split the categories into chunks of `chunk_size`, keeping their order
//! 2. For each chunk, spawn one scrape task per category, `task_stagger`
//!    apart. Each task waits for a permit from a pool of `max_concurrency`
//!    before fetching anything
//! 3. Await every task; write a spreadsheet for each category that kept
//!    listings
//! 4. Upload the chunk's spreadsheets as one batch and delete the ones that
//!    made it
//! 5. Wait `chunk_delay`, then move on to the next chunk
//!
//! A failing page, category, spreadsheet or file never stops the run. Only
//! failing to resolve the remote date folder does.

use crate::config::EngineConfig;
use crate::models::{Artifact, Category, CategoryResult, RunReport};
use crate::outputs::xlsx::{artifact_path, write_category};
use crate::scrapers::PageFetcher;
use crate::scrapers::category::scrape_category;
use crate::storage::StoreError;
use crate::upload::{UploadPipeline, UploadSession};
use crate::utils::yesterday;
use futures::future::join_all;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum HarvestError {
    /// The date folder could not be found or created. `report` covers the
    /// work done before the run stopped.
    #[error("failed to resolve remote folder: {source}")]
    FolderResolution {
        #[source]
        source: StoreError,
        report: RunReport,
    },
}

/// Split `categories` into consecutive chunks of at most `size` (minimum 1).
pub fn chunks(categories: &[Category], size: usize) -> std::slice::Chunks<'_, Category> {
    categories.chunks(size.max(1))
}

pub struct Harvester<F> {
    fetcher: Arc<F>,
    uploads: UploadPipeline,
    config: EngineConfig,
}

impl<F: PageFetcher> Harvester<F> {
    pub fn new(fetcher: F, uploads: UploadPipeline, config: EngineConfig) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            uploads,
            config,
        }
    }

    /// Harvest every category and upload the results.
    #[instrument(level = "info", skip_all, fields(categories = categories.len()))]
    pub async fn run(&self, categories: &[Category]) -> Result<RunReport, HarvestError> {
        let t0 = Instant::now();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut session = UploadSession::new(yesterday());
        let mut claimed = HashSet::new();
        let mut report = RunReport {
            categories: categories.len(),
            ..RunReport::default()
        };

        let total = chunks(categories, self.config.chunk_size).len();
        for (index, chunk) in chunks(categories, self.config.chunk_size).enumerate() {
            info!(chunk = index + 1, total, size = chunk.len(), "Processing chunk");
            report.chunks += 1;

            let artifacts = self
                .scrape_chunk(chunk, &permits, &mut claimed, &mut report)
                .await;
            if !artifacts.is_empty() {
                if let Err(source) = self.upload_chunk(&mut session, &artifacts, &mut report).await {
                    return Err(HarvestError::FolderResolution { source, report });
                }
            }

            if index + 1 < total {
                info!(delay = ?self.config.chunk_delay, "Waiting before next chunk");
                sleep(self.config.chunk_delay).await;
            }
        }

        info!(elapsed_ms = t0.elapsed().as_millis(), ?report, "Harvest finished");
        Ok(report)
    }

    /// Scrape one chunk and write its spreadsheets.
    async fn scrape_chunk(
        &self,
        chunk: &[Category],
        permits: &Arc<Semaphore>,
        claimed: &mut HashSet<PathBuf>,
        report: &mut RunReport,
    ) -> Vec<Artifact> {
        let mut names = Vec::with_capacity(chunk.len());
        let mut tasks: Vec<JoinHandle<CategoryResult>> = Vec::with_capacity(chunk.len());
        for (i, category) in chunk.iter().enumerate() {
            if i > 0 {
                sleep(self.config.task_stagger).await;
            }
            let fetcher = Arc::clone(&self.fetcher);
            let permits = Arc::clone(permits);
            let page_delay = self.config.page_delay;
            let owned = category.clone();
            let handle = tokio::spawn(async move {
                scrape_category(&*fetcher, &owned, &permits, page_delay).await
            });
            names.push(category.name.as_str());
            tasks.push(handle);
        }

        let mut artifacts = Vec::new();
        for (name, joined) in names.into_iter().zip(join_all(tasks).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(category = %name, error = %e, "Category task failed");
                    report.categories_failed += 1;
                    continue;
                }
            };

            report.pages_fetched += result.pages_fetched;
            report.pages_failed += result.pages_failed;
            if result.listings.is_empty() {
                info!(category = %name, "No listings from yesterday; nothing to save");
                report.categories_empty += 1;
                continue;
            }
            report.listings_kept += result.listings.len();

            // One spreadsheet per file name per run; a later category must
            // not overwrite an earlier one.
            let path = artifact_path(&self.config.artifact_dir, name);
            if !claimed.insert(path.clone()) {
                error!(category = %name, path = %path.display(), "Spreadsheet name already used by another category; not saving");
                report.artifacts_failed += 1;
                continue;
            }

            match write_category(&self.config.artifact_dir, &result).await {
                Ok(Some(artifact)) => {
                    report.artifacts_written += 1;
                    report.rows_written.insert(name.to_string(), artifact.rows);
                    artifacts.push(artifact);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(category = %name, error = %e, "Failed to save spreadsheet");
                    report.artifacts_failed += 1;
                }
            }
        }
        artifacts
    }

    /// Upload a chunk's spreadsheets and delete the ones that were uploaded.
    async fn upload_chunk(
        &self,
        session: &mut UploadSession,
        artifacts: &[Artifact],
        report: &mut RunReport,
    ) -> Result<(), StoreError> {
        let outcome = self.uploads.upload(session, artifacts).await?;
        report.files_uploaded += outcome.uploaded.len();
        report.files_failed += outcome.failed.len();
        report.files_missing += outcome.missing.len();
        report.reauthentications += outcome.reauthentications;

        for artifact in &outcome.uploaded {
            match fs::remove_file(&artifact.path).await {
                Ok(()) => {
                    info!(file = %artifact, "Cleaned up local file");
                    report.files_removed += 1;
                }
                Err(e) => {
                    warn!(file = %artifact, error = %e, "Failed to clean up local file");
                    report.cleanup_failures += 1;
                }
            }
        }
        for artifact in &outcome.failed {
            warn!(file = %artifact, "Keeping local file after failed upload");
        }
        Ok(())
    }
}
