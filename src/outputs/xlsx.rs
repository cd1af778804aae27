//! Spreadsheet output for a category's listings.
//!
//! One header row with the union of all field names (first-seen order),
//! then one row per listing. Missing fields are left blank; numbers and
//! booleans keep their cell types; nested values are written as JSON text.

use crate::models::{Artifact, CategoryResult, Listing};
use crate::utils::sanitize_file_stem;
use itertools::Itertools;
use rust_xlsxwriter::{Workbook, XlsxError};
use serde_json::Value;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task;
use tracing::{info, instrument, warn};

pub const EXTENSION: &str = "xlsx";

/// Longest text a single xlsx cell can hold, in characters.
pub const MAX_CELL_CHARS: usize = 32_767;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("spreadsheet write failed: {0}")]
    Xlsx(#[from] XlsxError),
    #[error("too many rows or columns for one sheet")]
    TooLarge,
    #[error("writer task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Column headers: every field name, in the order first seen.
pub fn columns(listings: &[Listing]) -> Vec<String> {
    listings
        .iter()
        .flat_map(Listing::field_names)
        .unique()
        .map(str::to_string)
        .collect()
}

/// Path of the artifact for `category` inside `dir`.
pub fn artifact_path(dir: &Path, category: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_file_stem(category), EXTENSION))
}

/// Write a category's listings to a spreadsheet in `dir`.
///
/// # Arguments
///
/// * `dir` - Artifact directory; must already exist
/// * `result` - The category's filtered listings
///
/// # Returns
///
/// The written [`Artifact`], or `Ok(None)` without touching the disk when
/// there are no listings. An existing file at the same path is replaced.
#[instrument(level = "info", skip_all, fields(category = %result.category, rows = result.listings.len()))]
pub async fn write_category(
    dir: &Path,
    result: &CategoryResult,
) -> Result<Option<Artifact>, ArtifactError> {
    if result.listings.is_empty() {
        info!("No listings to save; skipping spreadsheet");
        return Ok(None);
    }

    let path = artifact_path(dir, &result.category);
    let listings = result.listings.clone();
    let target = path.clone();
    let rows = task::spawn_blocking(move || write_workbook(&target, &listings)).await??;

    info!(path = %path.display(), rows, "Saved spreadsheet");
    Ok(Some(Artifact {
        category: result.category.clone(),
        path,
        rows,
    }))
}

/// Cut `text` down to [`MAX_CELL_CHARS`] so one long field cannot fail the
/// whole sheet.
fn cell_text<'a>(text: &'a str, field: &str, row: u32) -> Cow<'a, str> {
    match text.char_indices().nth(MAX_CELL_CHARS) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => {
            warn!(field, row, chars = text.chars().count(), "Cell text too long; truncating");
            Cow::Owned(text[..cut].to_string())
        }
    }
}

fn write_workbook(path: &Path, listings: &[Listing]) -> Result<usize, ArtifactError> {
    let headers = columns(listings);
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, name) in headers.iter().enumerate() {
        let col = u16::try_from(col).map_err(|_| ArtifactError::TooLarge)?;
        sheet.write_string(0, col, name.as_str())?;
    }

    for (i, listing) in listings.iter().enumerate() {
        let row = u32::try_from(i + 1).map_err(|_| ArtifactError::TooLarge)?;
        for (col, name) in headers.iter().enumerate() {
            let col = col as u16;
            match listing.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => {
                    sheet.write_string(row, col, cell_text(s, name, row))?;
                }
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => {
                        sheet.write_number(row, col, f)?;
                    }
                    None => {
                        sheet.write_string(row, col, n.to_string().as_str())?;
                    }
                },
                Some(Value::Bool(b)) => {
                    sheet.write_boolean(row, col, *b)?;
                }
                Some(other) => {
                    let text = other.to_string();
                    sheet.write_string(row, col, cell_text(&text, name, row))?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(listings.len())
}
