//! Scrape every page of one category.

use super::PageFetcher;
use crate::filter::keep_published_on;
use crate::models::{Category, CategoryResult};
use crate::utils::{truncate_for_log, yesterday};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

/// Scrape all pages of `category`, keeping listings published yesterday.
///
/// Holds one permit from `permits` for the whole category. Pages are fetched
/// one after another with `page_delay` after each; a failed page is logged
/// and skipped, never retried. "Yesterday" is fixed when the permit is
/// acquired.
#[instrument(level = "info", skip_all, fields(category = %category.name))]
pub async fn scrape_category<F: PageFetcher>(
    fetcher: &F,
    category: &Category,
    permits: &Semaphore,
    page_delay: Duration,
) -> CategoryResult {
    let mut result = CategoryResult::new(&category.name);

    let _permit = match permits.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            error!(error = %e, "Scrape permit pool closed; skipping category");
            return result;
        }
    };

    let target_day = yesterday();
    info!(pages = category.page_count(), %target_day, "Starting category scrape");

    for source in &category.sources {
        for page in 1..=source.pages {
            let url = source.page_url(page);
            match fetcher.fetch(&url).await {
                Ok(listings) => {
                    let seen = listings.len();
                    let kept = keep_published_on(listings, target_day);
                    debug!(%url, seen, kept = kept.len(), "Fetched page");
                    result.pages_fetched += 1;
                    result.listings.extend(kept);
                }
                Err(e) => {
                    error!(%url, error = %truncate_for_log(&e.to_string(), 300), "Page fetch failed; skipping page");
                    result.pages_failed += 1;
                }
            }
            sleep(page_delay).await;
        }
    }

    info!(
        kept = result.listings.len(),
        pages_fetched = result.pages_fetched,
        pages_failed = result.pages_failed,
        "Finished category scrape"
    );
    result
}
