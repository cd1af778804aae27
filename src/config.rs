//! Run configuration: engine tuning and domain profiles.
//!
//! An [`EngineConfig`] holds every limit and delay the scheduler and upload
//! pipeline use. A [`DomainProfile`] says *what* to harvest: the category
//! table, the remote parent folder, and which environment variable carries
//! the store credentials. The same engine runs every profile.
//!
//! Profiles are YAML:
//!
//! ```yaml
//! name: gifts
//! parent_folder_id: 1IYdBh7-Rdd1aWSH8p_2Go8LkFk84xkLB
//! credential_env_var: GIFTS_GCLOUD_KEY_JSON
//! categories:
//!   - name: "ساعات"
//!     sources:
//!       - url: "https://www.q84sale.com/ar/gifts/watches/{}"
//!         pages: 3
//! ```

use crate::models::Category;
use crate::utils::sanitize_file_stem;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const FASHION_AND_FAMILY: &str = include_str!("../profiles/fashion_and_family.yaml");
const GIFTS: &str = include_str!("../profiles/gifts.yaml");

/// Names accepted by [`DomainProfile::builtin`].
pub const BUILTIN_PROFILES: &[&str] = &["fashion-and-family", "gifts"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid profile YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// How the date folder is looked up and created.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FolderPolicy {
    /// Look the folder up and create it if absent. Two runs racing on the
    /// same date can both create it.
    #[default]
    LookupThenCreate,
    /// Same as `LookupThenCreate`, but the whole step runs while holding an
    /// exclusive lock file at `lock_path`.
    LockedCreate { lock_path: PathBuf },
}

/// Limits and delays for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Categories per chunk.
    pub chunk_size: usize,
    /// Permits in the scrape pool; at most this many categories fetch at once.
    pub max_concurrency: usize,
    /// Pause after every page of a category.
    pub page_delay: Duration,
    /// Pause between launching category tasks within a chunk.
    pub task_stagger: Duration,
    /// Pause between chunks.
    pub chunk_delay: Duration,
    /// Upload attempts per file, including the first.
    pub upload_attempts: u32,
    /// Pause before each upload retry.
    pub upload_retry_delay: Duration,
    /// Where spreadsheets are written before upload.
    pub artifact_dir: PathBuf,
    pub folder_policy: FolderPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2,
            max_concurrency: 2,
            page_delay: Duration::from_secs(3),
            task_stagger: Duration::from_secs(2),
            chunk_delay: Duration::from_secs(10),
            upload_attempts: 3,
            upload_retry_delay: Duration::from_secs(15),
            artifact_dir: PathBuf::from("temp_files"),
            folder_policy: FolderPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Config with every delay set to zero. Handy for tests and dry runs.
    pub fn without_delays() -> Self {
        Self {
            page_delay: Duration::ZERO,
            task_stagger: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            upload_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// What to harvest and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainProfile {
    pub name: String,
    pub parent_folder_id: String,
    pub credential_env_var: String,
    pub categories: Vec<Category>,
}

impl DomainProfile {
    /// Parse and validate a profile from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let profile: DomainProfile = serde_yaml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Load a profile from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// One of the profiles compiled into the binary.
    pub fn builtin(name: &str) -> Option<Result<Self, ConfigError>> {
        let text = match name {
            "fashion-and-family" => FASHION_AND_FAMILY,
            "gifts" => GIFTS,
            _ => return None,
        };
        Some(Self::from_yaml(text))
    }

    /// Resolve `--profile`: a built-in name first, otherwise a file path.
    pub fn resolve(name_or_path: &str) -> Result<Self, ConfigError> {
        match Self::builtin(name_or_path) {
            Some(profile) => profile,
            None => Self::load(Path::new(name_or_path)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parent_folder_id.trim().is_empty() {
            return Err(ConfigError::Invalid("parent_folder_id is empty".into()));
        }
        if self.credential_env_var.trim().is_empty() {
            return Err(ConfigError::Invalid("credential_env_var is empty".into()));
        }
        let mut seen = HashSet::new();
        let mut stems = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate category name {:?}",
                    category.name
                )));
            }
            // Each category owns one spreadsheet, so names must stay distinct
            // after path separators are replaced.
            if !stems.insert(sanitize_file_stem(&category.name)) {
                return Err(ConfigError::Invalid(format!(
                    "category {:?} maps to the same file name as an earlier category",
                    category.name
                )));
            }
            if category.sources.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "category {:?} has no sources",
                    category.name
                )));
            }
            for source in &category.sources {
                if source.url.matches("{}").count() != 1 {
                    return Err(ConfigError::Invalid(format!(
                        "url {:?} in category {:?} must contain exactly one {{}} placeholder",
                        source.url, category.name
                    )));
                }
                if source.pages == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "url {:?} in category {:?} has a page count of 0",
                        source.url, category.name
                    )));
                }
            }
        }
        Ok(())
    }
}
