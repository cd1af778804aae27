//! Listing-page fetching and per-category scraping.
//!
//! Scraping is split in two layers:
//!
//! 1. **Page fetching**: a [`PageFetcher`] turns one listing-page URL into
//!    the listings found on it. [`q84sale::HttpPageFetcher`] is the HTTP
//!    implementation; tests plug in scripted fakes.
//! 2. **Category scraping**: [`category::scrape_category`] walks every page
//!    of a category under a scheduling permit, keeps yesterday's listings,
//!    and isolates failures to the page that produced them.

use crate::models::Listing;
use std::error::Error;
use std::future::Future;

pub mod category;
pub mod q84sale;

/// Opaque failure from a page fetch.
pub type FetchError = Box<dyn Error + Send + Sync>;

/// Fetches the listings shown on a single page.
pub trait PageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<Listing>, FetchError>> + Send;
}
