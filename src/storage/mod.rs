//! Remote storage for finished artifacts.
//!
//! # Architecture
//!
//! - [`RemoteStore`]: the primitives a backend provides (authenticate, find
//!   and create folders, upload files)
//! - [`actor::StoreHandle`]: the only way the rest of the crate talks to a
//!   store. One task owns the store and runs requests one at a time, so a
//!   re-authentication can never overlap an upload using the old session.
//! - [`drive::DriveStore`]: Google Drive v3 with a service account
//! - [`local::LocalStore`]: a directory on disk laid out like the remote
//!
//! # Remote layout
//!
//! ```text
//! <parent folder>/
//! ├── 2025-07-14/
//! │   ├── ساعات.xlsx
//! │   └── عطور.xlsx
//! └── 2025-07-15/
//! ```

use std::future::Future;
use std::path::Path;
use thiserror::Error;

pub mod actor;
pub mod drive;
pub mod local;
pub mod lock;

pub use actor::StoreHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("failed to sign token request: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote response had no {0} id")]
    MissingId(&'static str),
    #[error("could not acquire folder lock {0}")]
    Lock(String),
    #[error("store task is no longer running")]
    Closed,
}

/// Backend primitives. Implementations are owned by a single actor task, so
/// methods take `&mut self` and never run concurrently.
pub trait RemoteStore: Send + 'static {
    /// (Re-)establish a session. Called once at startup and again before
    /// every upload retry.
    fn authenticate(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Check that the parent folder is reachable with the current session.
    fn probe_parent(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Id of the folder named `name` under the parent, if any.
    fn find_folder(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Create a folder named `name` under the parent and return its id.
    fn create_folder(&mut self, name: &str) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Upload the local file at `path` into `folder_id` and return the new file's id.
    fn upload(
        &mut self,
        path: &Path,
        folder_id: &str,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;
}
