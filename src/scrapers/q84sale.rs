//! HTTP page fetcher for Q84Sale-style listing pages.
//!
//! Listing pages are server-rendered Next.js. The listing cards are read from
//! the embedded `__NEXT_DATA__` JSON when present: any JSON object carrying a
//! title and a publish timestamp is treated as a listing, and its scalar
//! fields become the listing's fields. Pages without that payload fall back
//! to `article` card markup.
//!
//! Whatever the source, the publish timestamp ends up under
//! `date_published` so the date filter can find it.

use super::{FetchError, PageFetcher};
use crate::models::{DATE_PUBLISHED, Listing};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

static NEXT_DATA: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script#__NEXT_DATA__").expect("static selector"));
static CARD: Lazy<Selector> = Lazy::new(|| Selector::parse("article").expect("static selector"));
static CARD_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static CARD_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2, h3, [class*=title]").expect("static selector"));
static CARD_PRICE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class*=price]").expect("static selector"));
static CARD_TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time").expect("static selector"));

/// Keys that may hold a listing's publish timestamp, most specific first.
const DATE_KEYS: &[&str] = &[
    DATE_PUBLISHED,
    "published_at",
    "date_created",
    "created_at",
    "date",
];

const TITLE_KEYS: &[&str] = &["title", "name"];

/// Fetches listing pages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("listing_harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpPageFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<Listing>, FetchError> {
        let base = Url::parse(url)?;
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let listings = parse_listings(&body, &base);
        info!(count = listings.len(), bytes = body.len(), "Parsed listing page");
        Ok(listings)
    }
}

/// Extract listings from a listing-page HTML document.
pub fn parse_listings(html: &str, base: &Url) -> Vec<Listing> {
    let document = Html::parse_document(html);

    if let Some(script) = document.select(&NEXT_DATA).next() {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<Value>(&raw) {
            Ok(data) => {
                let mut listings = Vec::new();
                collect_json_listings(&data, &mut listings);
                return listings;
            }
            Err(e) => debug!(error = %e, "Embedded page data is not JSON; falling back to markup"),
        }
    }

    document
        .select(&CARD)
        .filter_map(|card| card_listing(card, base))
        .collect()
}

fn first_key<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|v| !v.trim().is_empty())
}

/// Walk the page data and collect every object that looks like a listing.
fn collect_json_listings(value: &Value, out: &mut Vec<Listing>) {
    match value {
        Value::Object(obj) => {
            let title = first_key(obj, TITLE_KEYS);
            let date = first_key(obj, DATE_KEYS);
            if let (Some(_), Some(date)) = (title, date) {
                let mut listing = Listing::new();
                for (k, v) in obj {
                    if matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                        listing.insert(k.clone(), v.clone());
                    }
                }
                listing.insert(DATE_PUBLISHED, date);
                out.push(listing);
                return;
            }
            for v in obj.values() {
                collect_json_listings(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_json_listings(v, out);
            }
        }
        _ => {}
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn card_listing(card: ElementRef<'_>, base: &Url) -> Option<Listing> {
    let time = card.select(&CARD_TIME).next()?;
    let date = time
        .value()
        .attr("datetime")
        .map(str::to_string)
        .unwrap_or_else(|| element_text(time));

    let mut listing = Listing::new();
    if let Some(title) = card.select(&CARD_TITLE).next() {
        listing.insert("title", element_text(title));
    }
    if let Some(href) = card
        .select(&CARD_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
    {
        if let Ok(resolved) = base.join(href) {
            listing.insert("link", resolved.to_string());
        }
    }
    if let Some(price) = card.select(&CARD_PRICE).next() {
        listing.insert("price", element_text(price));
    }
    listing.insert(DATE_PUBLISHED, date);
    Some(listing)
}
