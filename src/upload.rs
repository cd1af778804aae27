//! Upload pipeline with fixed-delay retries and re-authentication.
//!
//! # Retry Strategy
//!
//! Each file gets up to `attempts` upload tries. After a failed try that
//! still has attempts left, the pipeline waits `retry_delay`, re-authenticates
//! the store (sessions expire on long runs), and tries again. A file that
//! exhausts its attempts is logged and skipped; the batch carries on.
//!
//! If re-authentication itself fails, the file is given up on at once
//! rather than retried on the stale session. Only successful
//! re-authentications are counted.
//!
//! # Folder Resolution
//!
//! The date folder is resolved once per [`UploadSession`] and memoized, so
//! later batches in the same run reuse it instead of looking it up (or
//! creating it) again. A resolution failure is returned to the caller.

use crate::config::{EngineConfig, FolderPolicy};
use crate::models::Artifact;
use crate::storage::lock::FolderLock;
use crate::storage::{StoreError, StoreHandle};
use crate::utils::folder_name_for;
use chrono::NaiveDate;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

const LOCK_POLL: Duration = Duration::from_secs(1);
const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-run upload state: the target date, its folder once known, and every
/// artifact uploaded so far.
#[derive(Debug, Clone)]
pub struct UploadSession {
    target_day: NaiveDate,
    folder_id: Option<String>,
    uploaded: Vec<Artifact>,
}

impl UploadSession {
    pub fn new(target_day: NaiveDate) -> Self {
        Self {
            target_day,
            folder_id: None,
            uploaded: Vec::new(),
        }
    }

    pub fn folder_name(&self) -> String {
        folder_name_for(self.target_day)
    }

    pub fn folder_id(&self) -> Option<&str> {
        self.folder_id.as_deref()
    }

    pub fn uploaded(&self) -> &[Artifact] {
        &self.uploaded
    }
}

/// What happened to one batch.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub uploaded: Vec<Artifact>,
    pub failed: Vec<Artifact>,
    pub missing: Vec<Artifact>,
    pub reauthentications: usize,
}

#[derive(Debug, Clone)]
pub struct UploadPipeline {
    store: StoreHandle,
    attempts: u32,
    retry_delay: Duration,
    folder_policy: FolderPolicy,
}

impl UploadPipeline {
    pub fn new(store: StoreHandle, config: &EngineConfig) -> Self {
        Self {
            store,
            attempts: config.upload_attempts.max(1),
            retry_delay: config.upload_retry_delay,
            folder_policy: config.folder_policy.clone(),
        }
    }

    /// Folder id for the session's date, looking it up or creating it on
    /// first use only.
    #[instrument(level = "info", skip_all, fields(folder = %session.folder_name()))]
    pub async fn resolve_folder(&self, session: &mut UploadSession) -> Result<String, StoreError> {
        if let Some(id) = &session.folder_id {
            return Ok(id.clone());
        }

        let name = session.folder_name();
        let folder = match &self.folder_policy {
            FolderPolicy::LookupThenCreate => self.store.ensure_folder(&name).await?,
            FolderPolicy::LockedCreate { lock_path } => {
                let _lock = FolderLock::acquire(lock_path, LOCK_POLL, LOCK_TIMEOUT).await?;
                self.store.ensure_folder(&name).await?
            }
        };

        info!(id = %folder.id, created = folder.created, "Resolved upload folder");
        session.folder_id = Some(folder.id.clone());
        Ok(folder.id)
    }

    /// Upload a batch of artifacts into the session's date folder.
    ///
    /// Files are uploaded one at a time, in order. A file that fails is
    /// recorded and the batch moves on.
    ///
    /// # Arguments
    ///
    /// * `session` - Run state; its folder id is filled in on first use
    /// * `files` - Spreadsheets written for the current chunk
    ///
    /// # Returns
    ///
    /// The [`UploadOutcome`] for the batch, or the [`StoreError`] from
    /// folder resolution. No other failure ends the batch early.
    #[instrument(level = "info", skip_all, fields(files = files.len()))]
    pub async fn upload(
        &self,
        session: &mut UploadSession,
        files: &[Artifact],
    ) -> Result<UploadOutcome, StoreError> {
        log_local_files(files).await;

        let folder_id = match self.resolve_folder(session).await {
            Ok(id) => id,
            Err(e) => {
                error!(folder = %session.folder_name(), error = %e, "Failed to resolve upload folder");
                return Err(e);
            }
        };

        let mut outcome = UploadOutcome::default();
        for artifact in files {
            self.upload_one(artifact, &folder_id, &mut outcome).await;
        }
        session.uploaded.extend(outcome.uploaded.iter().cloned());

        info!(
            uploaded = outcome.uploaded.len(),
            failed = outcome.failed.len(),
            missing = outcome.missing.len(),
            folder = %session.folder_name(),
            "Upload batch finished"
        );
        Ok(outcome)
    }

    #[instrument(level = "info", skip_all, fields(file = %artifact))]
    async fn upload_one(&self, artifact: &Artifact, folder_id: &str, outcome: &mut UploadOutcome) {
        let t0 = Instant::now();

        for attempt in 1..=self.attempts {
            if !fs::try_exists(&artifact.path).await.unwrap_or(false) {
                error!("File not found for upload");
                outcome.missing.push(artifact.clone());
                return;
            }

            match self.store.upload(&artifact.path, folder_id).await {
                Ok(id) => {
                    info!(%id, attempt, elapsed_ms = t0.elapsed().as_millis(), "Uploaded file");
                    outcome.uploaded.push(artifact.clone());
                    return;
                }
                Err(e) if attempt < self.attempts => {
                    warn!(
                        attempt,
                        max = self.attempts,
                        delay = ?self.retry_delay,
                        error = %e,
                        "Upload attempt failed; retrying after re-authentication"
                    );
                    sleep(self.retry_delay).await;
                    if let Err(e) = self.store.authenticate().await {
                        error!(attempt, error = %e, "Re-authentication failed; giving up on file");
                        outcome.failed.push(artifact.clone());
                        return;
                    }
                    outcome.reauthentications += 1;
                }
                Err(e) => {
                    error!(
                        attempt,
                        max = self.attempts,
                        elapsed_ms = t0.elapsed().as_millis(),
                        error = %e,
                        "Upload failed; giving up on file"
                    );
                    outcome.failed.push(artifact.clone());
                }
            }
        }
    }
}

async fn log_local_files(files: &[Artifact]) {
    for artifact in files {
        match fs::metadata(&artifact.path).await {
            Ok(meta) => info!(file = %artifact, exists = true, size = meta.len(), "Checked local file"),
            Err(_) => warn!(file = %artifact, exists = false, "Checked local file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;
    use std::path::Path;
    use tokio::time::Instant as TokioInstant;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
    }

    fn artifact(dir: &Path, name: &str) -> Artifact {
        let path = dir.join(format!("{name}.xlsx"));
        std::fs::write(&path, b"sheet").unwrap();
        Artifact {
            category: name.to_string(),
            path,
            rows: 1,
        }
    }

    fn pipeline(store: FakeStore, attempts: u32) -> UploadPipeline {
        let config = EngineConfig {
            upload_attempts: attempts,
            upload_retry_delay: Duration::from_secs(15),
            ..EngineConfig::default()
        };
        UploadPipeline::new(StoreHandle::spawn(store), &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploads_every_file_into_date_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default();
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        let files = vec![artifact(tmp.path(), "A"), artifact(tmp.path(), "B")];
        let outcome = uploads.upload(&mut session, &files).await.unwrap();

        assert_eq!(outcome.uploaded, files);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.reauthentications, 0);
        assert_eq!(session.uploaded(), files.as_slice());

        let state = state.lock().unwrap();
        assert_eq!(state.folders.get("2025-07-15"), Some(&"folder-2025-07-15".to_string()));
        assert_eq!(
            state.uploads,
            vec![
                ("A.xlsx".to_string(), "folder-2025-07-15".to_string()),
                ("B.xlsx".to_string(), "folder-2025-07-15".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_reauthenticate_once_per_retry() {
        for k in 0..3 {
            let tmp = tempfile::tempdir().unwrap();
            let store = FakeStore::default().failing_uploads(k);
            let state = store.state();
            let uploads = pipeline(store, 3);
            let mut session = UploadSession::new(day());

            let files = vec![artifact(tmp.path(), "A")];
            let started = TokioInstant::now();
            let outcome = uploads.upload(&mut session, &files).await.unwrap();

            assert_eq!(outcome.uploaded.len(), 1, "k = {k}");
            assert_eq!(outcome.reauthentications, k);
            assert_eq!(state.lock().unwrap().authentications, k);
            assert!(started.elapsed() >= Duration::from_secs(15 * k as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_skip_file_and_continue() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default().failing_file("A.xlsx", 3);
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        let files = vec![artifact(tmp.path(), "A"), artifact(tmp.path(), "B")];
        let outcome = uploads.upload(&mut session, &files).await.unwrap();

        assert_eq!(outcome.failed, vec![files[0].clone()]);
        assert_eq!(outcome.uploaded, vec![files[1].clone()]);
        assert_eq!(outcome.reauthentications, 2);

        let state = state.lock().unwrap();
        assert_eq!(state.upload_attempts, 4);
        assert_eq!(state.authentications, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reauthentication_ends_retries_for_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default().failing_auth().failing_uploads(1);
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        let files = vec![artifact(tmp.path(), "A"), artifact(tmp.path(), "B")];
        let outcome = uploads.upload(&mut session, &files).await.unwrap();

        assert_eq!(outcome.failed, vec![files[0].clone()]);
        assert_eq!(outcome.uploaded, vec![files[1].clone()]);
        assert_eq!(outcome.reauthentications, 0);

        let state = state.lock().unwrap();
        assert_eq!(state.authentications, 1);
        assert_eq!(state.upload_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default();
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        let gone = Artifact {
            category: "gone".into(),
            path: tmp.path().join("gone.xlsx"),
            rows: 1,
        };
        let present = artifact(tmp.path(), "B");
        let outcome = uploads
            .upload(&mut session, &[gone.clone(), present.clone()])
            .await
            .unwrap();

        assert_eq!(outcome.missing, vec![gone]);
        assert_eq!(outcome.uploaded, vec![present]);
        assert_eq!(state.lock().unwrap().upload_attempts, 1);
        assert_eq!(outcome.reauthentications, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_is_resolved_once_per_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default();
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        let first = uploads.resolve_folder(&mut session).await.unwrap();
        let second = uploads.resolve_folder(&mut session).await.unwrap();
        uploads
            .upload(&mut session, &[artifact(tmp.path(), "A")])
            .await
            .unwrap();
        uploads
            .upload(&mut session, &[artifact(tmp.path(), "B")])
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(session.folder_id(), Some(first.as_str()));
        let state = state.lock().unwrap();
        assert_eq!(state.folders_created, 1);
        assert_eq!(state.folder_lookups, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_folder_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default().with_folder("2025-07-15", "existing");
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        uploads
            .upload(&mut session, &[artifact(tmp.path(), "A")])
            .await
            .unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.folders_created, 0);
        assert_eq!(state.uploads[0].1, "existing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_failure_fails_the_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FakeStore::default().failing_folder_lookup();
        let state = store.state();
        let uploads = pipeline(store, 3);
        let mut session = UploadSession::new(day());

        let err = uploads
            .upload(&mut session, &[artifact(tmp.path(), "A")])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Api { .. }));
        assert!(session.folder_id().is_none());
        assert_eq!(state.lock().unwrap().upload_attempts, 0);
    }

    #[tokio::test]
    async fn test_locked_creation_releases_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("folder.lock");
        let store = FakeStore::default();
        let state = store.state();
        let config = EngineConfig {
            folder_policy: FolderPolicy::LockedCreate {
                lock_path: lock_path.clone(),
            },
            ..EngineConfig::without_delays()
        };
        let uploads = UploadPipeline::new(StoreHandle::spawn(store), &config);
        let mut session = UploadSession::new(day());

        uploads.resolve_folder(&mut session).await.unwrap();

        assert!(!lock_path.exists());
        assert_eq!(state.lock().unwrap().folders_created, 1);
    }
}
