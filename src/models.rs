//! Data models shared across the harvest pipeline.
//!
//! - [`Listing`]: one classified ad as returned by a page fetcher
//! - [`Category`] / [`PageSource`]: what to scrape, loaded from a profile
//! - [`CategoryResult`]: a category's listings that survived the date filter
//! - [`Artifact`]: a spreadsheet written for one category
//! - [`RunReport`]: per-run counters returned by the scheduler

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Name of the field every listing is expected to carry.
pub const DATE_PUBLISHED: &str = "date_published";

/// A single listing record.
///
/// Fields are free-form; the only one the pipeline looks at is
/// [`DATE_PUBLISHED`]. Duplicates across pages are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Listing(Map<String, Value>);

impl Listing {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a listing from `(field, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Raw text of the publish date, if present and a string.
    pub fn date_published(&self) -> Option<&str> {
        self.0.get(DATE_PUBLISHED).and_then(Value::as_str)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// One paginated listing URL inside a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSource {
    /// URL with a single `{}` placeholder for the 1-based page number.
    pub url: String,
    /// Number of pages to visit, starting from page 1.
    pub pages: u32,
}

impl PageSource {
    pub fn new(url: impl Into<String>, pages: u32) -> Self {
        Self {
            url: url.into(),
            pages,
        }
    }

    /// URL for the given 1-based page index.
    pub fn page_url(&self, page: u32) -> String {
        self.url.replacen("{}", &page.to_string(), 1)
    }
}

/// A named group of listing pages. The name is unique within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub sources: Vec<PageSource>,
}

impl Category {
    pub fn new(name: impl Into<String>, sources: Vec<PageSource>) -> Self {
        Self {
            name: name.into(),
            sources,
        }
    }

    pub fn page_count(&self) -> u32 {
        self.sources.iter().map(|s| s.pages).sum()
    }
}

/// Listings for one category that passed the date filter.
#[derive(Debug, Clone, Default)]
pub struct CategoryResult {
    pub category: String,
    pub listings: Vec<Listing>,
    pub pages_fetched: u32,
    pub pages_failed: u32,
}

impl CategoryResult {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }
}

/// A spreadsheet on local disk holding one category's listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub category: String,
    pub path: PathBuf,
    pub rows: usize,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Counters describing what a run actually did.
///
/// A run that finishes is not necessarily complete: pages, categories and
/// files can all be skipped along the way. This report is how callers find
/// out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub chunks: usize,
    pub categories: usize,
    pub categories_empty: usize,
    pub categories_failed: usize,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub listings_kept: usize,
    pub artifacts_written: usize,
    /// Data rows in each written spreadsheet, keyed by category name.
    pub rows_written: BTreeMap<String, usize>,
    pub artifacts_failed: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub files_missing: usize,
    pub reauthentications: usize,
    pub files_removed: usize,
    pub cleanup_failures: usize,
}

impl RunReport {
    /// True when nothing was skipped anywhere in the run.
    pub fn is_complete(&self) -> bool {
        self.categories_failed == 0
            && self.pages_failed == 0
            && self.artifacts_failed == 0
            && self.files_failed == 0
            && self.files_missing == 0
    }
}
