//! Publish-date filtering.
//!
//! A listing is kept when the date part of its `date_published` field equals
//! the target day. Time of day is ignored, so both `2025-07-15` and
//! `2025-07-15 22:41` match `2025-07-15`.

use crate::models::Listing;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static DATE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{4}-\d{2}-\d{2})(?:$|[\sT])").expect("static regex"));

/// Extract the calendar date from a publish-date string.
///
/// Accepts `YYYY-MM-DD` optionally followed by whitespace or `T` and a time.
///
/// # Arguments
///
/// * `raw` - The publish-date text as scraped
///
/// # Returns
///
/// The date, or `None` when the text does not start with a valid
/// `YYYY-MM-DD` date.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(date_part("2025-07-15 10:30"), NaiveDate::from_ymd_opt(2025, 7, 15));
/// assert_eq!(date_part("15/07/2025"), None);
/// ```
pub fn date_part(raw: &str) -> Option<NaiveDate> {
    let caps = DATE_PART.captures(raw)?;
    NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()
}

/// Whether `listing` was published on `day`. Missing or malformed dates never match.
pub fn published_on(listing: &Listing, day: NaiveDate) -> bool {
    listing
        .date_published()
        .and_then(date_part)
        .is_some_and(|d| d == day)
}

/// Keep only the listings published on `day`, preserving order.
pub fn keep_published_on(listings: impl IntoIterator<Item = Listing>, day: NaiveDate) -> Vec<Listing> {
    listings
        .into_iter()
        .filter(|l| published_on(l, day))
        .collect()
}
