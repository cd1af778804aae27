//! Serialized access to a [`RemoteStore`].
//!
//! [`StoreHandle::spawn`] moves the store into its own task. Handles are
//! cheap to clone; each call sends a command over an `mpsc` channel and
//! waits for the answer on a `oneshot`. The task exits once every handle is
//! dropped.

use super::{RemoteStore, StoreError};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// A resolved date folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    /// Whether this call created the folder.
    pub created: bool,
}

enum Command {
    Authenticate(Reply<()>),
    ProbeParent(Reply<()>),
    EnsureFolder {
        name: String,
        reply: Reply<FolderRef>,
    },
    Upload {
        path: PathBuf,
        folder_id: String,
        reply: Reply<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Command>,
}

impl StoreHandle {
    /// Start the store task. Must be called inside a tokio runtime.
    pub fn spawn<S: RemoteStore>(store: S) -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run(store, rx));
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn authenticate(&self) -> Result<(), StoreError> {
        self.request(Command::Authenticate).await
    }

    pub async fn probe_parent(&self) -> Result<(), StoreError> {
        self.request(Command::ProbeParent).await
    }

    /// Find the folder named `name`, creating it when absent. Lookup and
    /// creation run back to back inside the store task.
    pub async fn ensure_folder(&self, name: &str) -> Result<FolderRef, StoreError> {
        let name = name.to_string();
        self.request(|reply| Command::EnsureFolder { name, reply })
            .await
    }

    pub async fn upload(&self, path: &Path, folder_id: &str) -> Result<String, StoreError> {
        let path = path.to_path_buf();
        let folder_id = folder_id.to_string();
        self.request(|reply| Command::Upload {
            path,
            folder_id,
            reply,
        })
        .await
    }
}

#[instrument(level = "debug", skip_all)]
async fn run<S: RemoteStore>(mut store: S, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Authenticate(reply) => {
                let _ = reply.send(store.authenticate().await);
            }
            Command::ProbeParent(reply) => {
                let _ = reply.send(store.probe_parent().await);
            }
            Command::EnsureFolder { name, reply } => {
                let _ = reply.send(ensure_folder(&mut store, &name).await);
            }
            Command::Upload {
                path,
                folder_id,
                reply,
            } => {
                let _ = reply.send(store.upload(&path, &folder_id).await);
            }
        }
    }
    debug!("All store handles dropped; store task exiting");
}

async fn ensure_folder<S: RemoteStore>(store: &mut S, name: &str) -> Result<FolderRef, StoreError> {
    if let Some(id) = store.find_folder(name).await? {
        info!(folder = %name, %id, "Found remote folder");
        return Ok(FolderRef { id, created: false });
    }
    info!(folder = %name, "Remote folder does not exist; creating it");
    let id = store.create_folder(name).await?;
    info!(folder = %name, %id, "Created remote folder");
    Ok(FolderRef { id, created: true })
}
