//! Utility functions for dates, file names, logging and the file system.
//!
//! - Run-date helpers (`yesterday`, `folder_name_for`)
//! - File name sanitization for category names
//! - String truncation for log lines
//! - Writable-directory probing for the artifact directory

use chrono::{Duration, Local, NaiveDate};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// The day before today, on the local clock.
pub fn yesterday() -> NaiveDate {
    day_before(Local::now().date_naive())
}

pub fn day_before(day: NaiveDate) -> NaiveDate {
    day - Duration::days(1)
}

/// Remote folder name for a run date, `YYYY-MM-DD`.
pub fn folder_name_for(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Make a category name usable as a file stem.
///
/// Path separators are replaced with `_`; everything else (including
/// non-Latin scripts and spaces) is kept.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(sanitize_file_stem("Bags/Shoes"), "Bags_Shoes");
/// ```
pub fn sanitize_file_stem(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a char boundary at or below `max` bytes and get
/// `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    fs::File::create(&probe_path).await?;
    let _ = fs::remove_file(&probe_path).await;
    info!("Artifact directory is writable");
    Ok(())
}
