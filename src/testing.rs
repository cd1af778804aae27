//! Scripted fakes for the page fetcher and the remote store.

use crate::models::{DATE_PUBLISHED, Listing};
use crate::scrapers::{FetchError, PageFetcher};
use crate::storage::{RemoteStore, StoreError};
use crate::utils::yesterday;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub fn listing_on(id: &str, day: NaiveDate) -> Listing {
    Listing::from_pairs([
        ("id", id.to_string()),
        ("title", format!("listing {id}")),
        (DATE_PUBLISHED, format!("{} 10:30:00", day.format("%Y-%m-%d"))),
    ])
}

pub fn yesterday_listing(id: &str) -> Listing {
    listing_on(id, yesterday())
}

#[derive(Debug, Clone)]
enum Page {
    Listings(Vec<Listing>),
    Fail,
    Panic,
}

#[derive(Debug, Default)]
pub struct FakeFetcher {
    pages: HashMap<String, Page>,
    default_page: Vec<Listing>,
    latency: Duration,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn with_page(mut self, url: &str, listings: Vec<Listing>) -> Self {
        self.pages.insert(url.to_string(), Page::Listings(listings));
        self
    }

    pub fn with_failure(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), Page::Fail);
        self
    }

    pub fn with_panic(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), Page::Panic);
        self
    }

    /// Listings returned for every URL without its own script.
    pub fn with_default_page(mut self, listings: Vec<Listing>) -> Self {
        self.default_page = listings;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// When the first fetch of `url` started.
    pub fn started_at(&self, url: &str) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, at)| *at)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<Listing>, FetchError> {
        self.calls.lock().unwrap().push((url.to_string(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.pages.get(url) {
            Some(Page::Listings(listings)) => Ok(listings.clone()),
            Some(Page::Fail) => Err(format!("scripted failure for {url}").into()),
            Some(Page::Panic) => panic!("scripted panic for {url}"),
            None => Ok(self.default_page.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeStoreState {
    pub log: Vec<String>,
    pub authentications: usize,
    pub probes: usize,
    pub folder_lookups: usize,
    pub folders_created: usize,
    pub folders: HashMap<String, String>,
    pub upload_attempts: usize,
    /// Successful uploads as `(file name, folder id)`.
    pub uploads: Vec<(String, String)>,
    fail_next_uploads: usize,
    fail_file: HashMap<String, usize>,
    fail_folder_lookup: bool,
    fail_auth: bool,
    fail_probe: bool,
}

/// In-memory store whose state stays inspectable after it moves into the
/// store task.
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeStoreState>>,
}

impl FakeStore {
    pub fn state(&self) -> Arc<Mutex<FakeStoreState>> {
        Arc::clone(&self.state)
    }

    /// Fail the next `n` uploads, whatever the file.
    pub fn failing_uploads(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_next_uploads = n;
        self
    }

    /// Fail the next `n` uploads of the file named `name`.
    pub fn failing_file(self, name: &str, n: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_file
            .insert(name.to_string(), n);
        self
    }

    pub fn failing_folder_lookup(self) -> Self {
        self.state.lock().unwrap().fail_folder_lookup = true;
        self
    }

    pub fn failing_auth(self) -> Self {
        self.state.lock().unwrap().fail_auth = true;
        self
    }

    pub fn failing_probe(self) -> Self {
        self.state.lock().unwrap().fail_probe = true;
        self
    }

    pub fn with_folder(self, name: &str, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .folders
            .insert(name.to_string(), id.to_string());
        self
    }
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Api {
        status: 503,
        body: format!("scripted {what} failure"),
    }
}

impl RemoteStore for FakeStore {
    async fn authenticate(&mut self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("authenticate".into());
        state.authentications += 1;
        if state.fail_auth {
            return Err(StoreError::Auth("scripted".into()));
        }
        Ok(())
    }

    async fn probe_parent(&mut self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.probes += 1;
        if state.fail_probe {
            return Err(unavailable("probe"));
        }
        Ok(())
    }

    async fn find_folder(&mut self, name: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.folder_lookups += 1;
        if state.fail_folder_lookup {
            return Err(StoreError::Api {
                status: 500,
                body: "scripted lookup failure".into(),
            });
        }
        Ok(state.folders.get(name).cloned())
    }

    async fn create_folder(&mut self, name: &str) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        let id = format!("folder-{name}");
        state.folders.insert(name.to_string(), id.clone());
        state.folders_created += 1;
        Ok(id)
    }

    async fn upload(&mut self, path: &Path, folder_id: &str) -> Result<String, StoreError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("upload {name}"));
        state.upload_attempts += 1;

        if state.fail_next_uploads > 0 {
            state.fail_next_uploads -= 1;
            return Err(unavailable("upload"));
        }
        if let Some(left) = state.fail_file.get_mut(&name) {
            if *left > 0 {
                *left -= 1;
                return Err(unavailable("upload"));
            }
        }

        state.uploads.push((name.clone(), folder_id.to_string()));
        Ok(format!("file-{}", state.uploads.len()))
    }
}
