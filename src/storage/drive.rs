//! Google Drive v3 backend.
//!
//! Authenticates as a service account: a short-lived RS256 JWT is signed
//! with the account's private key and exchanged at the token endpoint for a
//! bearer token. Folders live under a fixed parent folder.

use super::{RemoteStore, StoreError};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const BOUNDARY: &str = "listing_harvest_upload_boundary";

/// The parts of a service-account key file this backend uses.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug)]
pub struct DriveStore {
    client: Client,
    key: ServiceAccountKey,
    parent_folder_id: String,
    token: Option<String>,
}

impl DriveStore {
    pub fn new(key: ServiceAccountKey, parent_folder_id: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            key,
            parent_folder_id: parent_folder_id.into(),
            token: None,
        })
    }

    fn token(&self) -> Result<&str, StoreError> {
        self.token.as_deref().ok_or(StoreError::NotAuthenticated)
    }

    fn signed_assertion(&self) -> Result<String, StoreError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }
}

/// Turn non-2xx responses into [`StoreError::Api`].
async fn checked(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Quote a value for a Drive `q` expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn folder_query(name: &str, parent: &str) -> String {
    format!(
        "name={} and {} in parents and mimeType='{}' and trashed=false",
        quote(name),
        quote(parent),
        FOLDER_MIME
    )
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xlsx") => XLSX_MIME,
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

/// `multipart/related` body: JSON metadata part followed by the file bytes.
fn multipart_body(metadata: &serde_json::Value, mime: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{BOUNDARY}\r\nContent-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

impl RemoteStore for DriveStore {
    #[instrument(level = "info", skip_all, fields(account = %self.key.client_email))]
    async fn authenticate(&mut self) -> Result<(), StoreError> {
        info!("Authenticating with Google Drive");
        let assertion = self.signed_assertion()?;
        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = match checked(resp).await {
            Ok(resp) => resp.json().await?,
            Err(StoreError::Api { status, body }) => {
                return Err(StoreError::Auth(format!("token endpoint returned {status}: {body}")));
            }
            Err(e) => return Err(e),
        };
        self.token = Some(token.access_token);
        info!("Authentication successful");
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(parent = %self.parent_folder_id))]
    async fn probe_parent(&mut self) -> Result<(), StoreError> {
        let resp = self
            .client
            .get(format!("{FILES_URL}/{}", self.parent_folder_id))
            .bearer_auth(self.token()?)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        checked(resp).await?;
        info!("Parent folder is accessible");
        Ok(())
    }

    #[instrument(level = "info", skip(self))]
    async fn find_folder(&mut self, name: &str) -> Result<Option<String>, StoreError> {
        let q = folder_query(name, &self.parent_folder_id);
        let resp = self
            .client
            .get(FILES_URL)
            .bearer_auth(self.token()?)
            .query(&[
                ("q", q.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id, name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;
        let list: FileList = checked(resp).await?.json().await?;
        Ok(list.files.into_iter().find_map(|f| f.id))
    }

    #[instrument(level = "info", skip(self))]
    async fn create_folder(&mut self, name: &str) -> Result<String, StoreError> {
        let resp = self
            .client
            .post(FILES_URL)
            .bearer_auth(self.token()?)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [self.parent_folder_id],
            }))
            .send()
            .await?;
        let file: DriveFile = checked(resp).await?.json().await?;
        file.id.ok_or(StoreError::MissingId("folder"))
    }

    #[instrument(level = "info", skip(self), fields(path = %path.display()))]
    async fn upload(&mut self, path: &Path, folder_id: &str) -> Result<String, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = json!({ "name": name, "parents": [folder_id] });
        let body = multipart_body(&metadata, mime_for(path), &bytes);

        let resp = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(self.token()?)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(body)
            .send()
            .await?;
        let file: DriveFile = checked(resp).await?.json().await?;
        file.id.ok_or(StoreError::MissingId("file"))
    }
}
