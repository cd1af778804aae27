//! Command-line interface definitions for the listing harvester.
//!
//! Every option can also be set through a `HARVEST_*` environment variable.

use crate::config::{EngineConfig, FolderPolicy};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for one harvest run.
///
/// # Examples
///
/// ```sh
/// # Harvest the gifts categories into Google Drive
/// GIFTS_GCLOUD_KEY_JSON="$(cat key.json)" listing_harvest --profile gifts
///
/// # Dry run into a local directory, no delays between chunks
/// listing_harvest --profile fashion-and-family --local-store ./out --chunk-delay-secs 0
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Built-in profile name (fashion-and-family, gifts) or path to a profile YAML
    #[arg(short, long, env = "HARVEST_PROFILE")]
    pub profile: String,

    /// Directory spreadsheets are written to before upload
    #[arg(short, long, env = "HARVEST_ARTIFACT_DIR", default_value = "temp_files")]
    pub artifact_dir: PathBuf,

    /// Categories per chunk
    #[arg(long, env = "HARVEST_CHUNK_SIZE", default_value_t = 2)]
    pub chunk_size: usize,

    /// Categories scraped at the same time
    #[arg(long, env = "HARVEST_MAX_CONCURRENCY", default_value_t = 2)]
    pub max_concurrency: usize,

    /// Seconds to wait after each page
    #[arg(long, env = "HARVEST_PAGE_DELAY_SECS", default_value_t = 3)]
    pub page_delay_secs: u64,

    /// Seconds between launching category tasks within a chunk
    #[arg(long, env = "HARVEST_TASK_STAGGER_SECS", default_value_t = 2)]
    pub task_stagger_secs: u64,

    /// Seconds to wait between chunks
    #[arg(long, env = "HARVEST_CHUNK_DELAY_SECS", default_value_t = 10)]
    pub chunk_delay_secs: u64,

    /// Upload attempts per file
    #[arg(long, env = "HARVEST_UPLOAD_RETRIES", default_value_t = 3)]
    pub upload_retries: u32,

    /// Seconds to wait before retrying an upload
    #[arg(long, env = "HARVEST_UPLOAD_RETRY_DELAY_SECS", default_value_t = 15)]
    pub upload_retry_delay_secs: u64,

    /// File that log lines are appended to
    #[arg(long, env = "HARVEST_LOG_FILE", default_value = "scraper.log")]
    pub log_file: PathBuf,

    /// Log to stdout only
    #[arg(long, env = "HARVEST_NO_LOG_FILE")]
    pub no_log_file: bool,

    /// Copy spreadsheets into this directory instead of uploading to Google Drive
    #[arg(long, env = "HARVEST_LOCAL_STORE")]
    pub local_store: Option<PathBuf>,

    /// Hold an exclusive lock file while finding or creating the date folder
    #[arg(long, env = "HARVEST_LOCK_FOLDER_CREATION")]
    pub lock_folder_creation: bool,

    /// Lock file used with --lock-folder-creation
    #[arg(long, env = "HARVEST_FOLDER_LOCK_PATH", default_value = "folder.lock")]
    pub folder_lock_path: PathBuf,
}

impl Cli {
    /// Log file path, unless file logging is disabled.
    pub fn log_file(&self) -> Option<&PathBuf> {
        (!self.no_log_file).then_some(&self.log_file)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let folder_policy = if self.lock_folder_creation {
            FolderPolicy::LockedCreate {
                lock_path: self.folder_lock_path.clone(),
            }
        } else {
            FolderPolicy::LookupThenCreate
        };
        EngineConfig {
            chunk_size: self.chunk_size,
            max_concurrency: self.max_concurrency,
            page_delay: Duration::from_secs(self.page_delay_secs),
            task_stagger: Duration::from_secs(self.task_stagger_secs),
            chunk_delay: Duration::from_secs(self.chunk_delay_secs),
            upload_attempts: self.upload_retries,
            upload_retry_delay: Duration::from_secs(self.upload_retry_delay_secs),
            artifact_dir: self.artifact_dir.clone(),
            folder_policy,
        }
    }
}
