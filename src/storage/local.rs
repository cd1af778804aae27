//! Directory-backed store for dry runs.
//!
//! Mirrors the remote layout under `<root>/<parent_folder_id>/`. Folder and
//! file ids are paths relative to `root`.

use super::{RemoteStore, StoreError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    parent_folder_id: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, parent_folder_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            parent_folder_id: parent_folder_id.into(),
        }
    }

    fn parent(&self) -> PathBuf {
        self.root.join(&self.parent_folder_id)
    }

    fn folder_id(&self, name: &str) -> String {
        format!("{}/{}", self.parent_folder_id, name)
    }
}

impl RemoteStore for LocalStore {
    async fn authenticate(&mut self) -> Result<(), StoreError> {
        fs::create_dir_all(self.parent()).await?;
        debug!(root = %self.root.display(), "Local store ready");
        Ok(())
    }

    async fn probe_parent(&mut self) -> Result<(), StoreError> {
        if fs::metadata(self.parent()).await?.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Api {
                status: 404,
                body: format!("{} is not a directory", self.parent().display()),
            })
        }
    }

    async fn find_folder(&mut self, name: &str) -> Result<Option<String>, StoreError> {
        match fs::metadata(self.parent().join(name)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(self.folder_id(name))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&mut self, name: &str) -> Result<String, StoreError> {
        fs::create_dir_all(self.parent().join(name)).await?;
        Ok(self.folder_id(name))
    }

    async fn upload(&mut self, path: &Path, folder_id: &str) -> Result<String, StoreError> {
        let name = path
            .file_name()
            .ok_or_else(|| StoreError::Io(std::io::Error::other("upload path has no file name")))?;
        let id = Path::new(folder_id).join(name);
        fs::copy(path, self.root.join(&id)).await?;
        info!(id = %id.display(), "Copied file into local store");
        Ok(id.to_string_lossy().into_owned())
    }
}
