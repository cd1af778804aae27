//! Startup checks. Everything here is fatal: a run that cannot write its
//! spreadsheets or reach its parent folder stops before scraping.

use crate::config::DomainProfile;
use crate::storage::drive::{DriveStore, ServiceAccountKey};
use crate::storage::{RemoteStore, StoreError, StoreHandle};
use crate::utils::ensure_writable_dir;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, instrument};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("credential environment variable {0} is not set")]
    MissingCredentials(String),
    #[error("credentials in {var} are not a service-account key: {source}")]
    BadCredentials {
        var: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to build store client: {0}")]
    Client(#[source] StoreError),
    #[error("authentication failed: {0}")]
    Authentication(#[source] StoreError),
    #[error("parent folder is not accessible: {0}")]
    ParentFolder(#[source] StoreError),
    #[error("artifact directory {path} is not writable: {source}")]
    ArtifactDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Make sure spreadsheets can be written to `dir`.
pub async fn prepare_artifact_dir(dir: &Path) -> Result<(), SetupError> {
    ensure_writable_dir(dir).await.map_err(|source| {
        error!(path = %dir.display(), error = %source, "Artifact directory is not writable");
        SetupError::ArtifactDir {
            path: dir.to_path_buf(),
            source,
        }
    })
}

/// Start the store actor, authenticate, and check the parent folder.
#[instrument(level = "info", skip_all)]
pub async fn connect<S: RemoteStore>(store: S) -> Result<StoreHandle, SetupError> {
    let handle = StoreHandle::spawn(store);
    handle
        .authenticate()
        .await
        .map_err(SetupError::Authentication)?;
    handle
        .probe_parent()
        .await
        .map_err(SetupError::ParentFolder)?;
    info!("Remote store ready");
    Ok(handle)
}

/// Service-account key for `profile`, read through `lookup` (normally the
/// process environment).
pub fn read_credentials(
    profile: &DomainProfile,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServiceAccountKey, SetupError> {
    let var = &profile.credential_env_var;
    let raw = lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SetupError::MissingCredentials(var.clone()))?;
    ServiceAccountKey::from_json(&raw).map_err(|source| SetupError::BadCredentials {
        var: var.clone(),
        source,
    })
}

/// Connect to Google Drive with the credentials named by `profile`.
pub async fn connect_drive(profile: &DomainProfile) -> Result<StoreHandle, SetupError> {
    let key = read_credentials(profile, |var| std::env::var(var).ok())?;
    info!(account = %key.client_email, parent = %profile.parent_folder_id, "Connecting to Google Drive");
    let store = DriveStore::new(key, &profile.parent_folder_id).map_err(SetupError::Client)?;
    connect(store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;

    fn profile() -> DomainProfile {
        DomainProfile::resolve("gifts").unwrap()
    }

    #[tokio::test]
    async fn test_connect_authenticates_then_probes() {
        let store = FakeStore::default();
        let state = store.state();
        connect(store).await.unwrap();
        let state = state.lock().unwrap();
        assert_eq!(state.authentications, 1);
        assert_eq!(state.probes, 1);
    }

    #[tokio::test]
    async fn test_connect_fails_on_auth() {
        let store = FakeStore::default().failing_auth();
        let state = store.state();
        let err = connect(store).await.unwrap_err();
        assert!(matches!(err, SetupError::Authentication(_)));
        assert_eq!(state.lock().unwrap().probes, 0);
    }

    #[tokio::test]
    async fn test_connect_fails_on_parent_folder() {
        let err = connect(FakeStore::default().failing_probe()).await.unwrap_err();
        assert!(matches!(err, SetupError::ParentFolder(_)));
    }

    #[test]
    fn test_missing_credentials() {
        let err = read_credentials(&profile(), |_| None).unwrap_err();
        assert!(matches!(err, SetupError::MissingCredentials(ref v) if v == "GIFTS_GCLOUD_KEY_JSON"));

        let err = read_credentials(&profile(), |_| Some("  ".into())).unwrap_err();
        assert!(matches!(err, SetupError::MissingCredentials(_)));
    }

    #[test]
    fn test_bad_credentials() {
        let err = read_credentials(&profile(), |_| Some("{not json".into())).unwrap_err();
        assert!(matches!(err, SetupError::BadCredentials { .. }));
    }

    #[test]
    fn test_reads_credentials_from_profile_variable() {
        let key = read_credentials(&profile(), |var| {
            (var == "GIFTS_GCLOUD_KEY_JSON")
                .then(|| r#"{"client_email":"bot@x","private_key":"k"}"#.to_string())
        })
        .unwrap();
        assert_eq!(key.client_email, "bot@x");
    }

    #[tokio::test]
    async fn test_artifact_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("temp_files");
        prepare_artifact_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_artifact_dir_under_a_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = prepare_artifact_dir(&file.join("sub")).await.unwrap_err();
        assert!(matches!(err, SetupError::ArtifactDir { .. }));
    }
}
