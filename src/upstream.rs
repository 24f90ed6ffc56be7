use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::GatewayError;
use crate::paths;

/// Typed client over the note-plugin REST surface. One instance per
/// process; reqwest's pool handles connection reuse internally.

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_NOTE_BYTES: usize = 50 * 1024 * 1024;

/// Structured note view, negotiated via the plugin's JSON media type.
const NOTE_JSON_MIME: &str = "application/vnd.olrapi.note+json";

#[derive(Clone)]
pub struct VaultApi {
    client: Client,
    base_url: String,
    auth_header: String,
}

/// Stat block for a single note.
#[derive(Debug, Clone)]
pub struct NoteStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub created: Option<DateTime<Utc>>,
}

/// One hit from the plugin's simple search.
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleHit {
    pub path: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileListing {
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NoteJson {
    stat: RawStat,
}

#[derive(Debug, Deserialize)]
struct RawStat {
    ctime: Option<i64>,
    mtime: i64,
    size: u64,
}

impl VaultApi {
    pub fn new(base_url: &str, credential: &str) -> Result<Self, GatewayError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidRequest(format!("bad upstream url: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(GatewayError::InvalidRequest(
                "upstream url must be http(s)".into(),
            ));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(GatewayError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {credential}"),
        })
    }

    fn note_url(&self, path: &str) -> String {
        format!("{}/vault/{}", self.base_url, paths::encode(path))
    }

    fn folder_url(&self, folder: &str) -> String {
        if folder.is_empty() {
            format!("{}/vault/", self.base_url)
        } else {
            format!("{}/vault/{}/", self.base_url, paths::encode(folder))
        }
    }

    async fn fail(&self, context: &str, response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => {
                GatewayError::Auth(format!("{context}: check the upstream credential"))
            }
            StatusCode::NOT_FOUND => GatewayError::NotFound(context.to_string()),
            StatusCode::CONFLICT => GatewayError::Conflict(context.to_string()),
            s if s.is_client_error() => GatewayError::Client {
                status: s.as_u16(),
                message: format!("{context}: {body}"),
            },
            s => GatewayError::Upstream {
                status: Some(s.as_u16()),
                message: format!("{context}: {body}"),
                cause: None,
            },
        }
    }

    /// Raw note body.
    pub async fn get_note(&self, path: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(self.note_url(path))
            .header("Authorization", &self.auth_header)
            .header("Accept", "text/markdown")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail(path, response).await);
        }
        Ok(response.text().await?)
    }

    /// Size and timestamps for a note, via the plugin's structured view.
    pub async fn note_stat(&self, path: &str) -> Result<NoteStat, GatewayError> {
        let response = self
            .client
            .get(self.note_url(path))
            .header("Authorization", &self.auth_header)
            .header("Accept", NOTE_JSON_MIME)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail(path, response).await);
        }

        let note: NoteJson = response.json().await?;
        Ok(NoteStat {
            size: note.stat.size,
            modified: DateTime::from_timestamp_millis(note.stat.mtime).unwrap_or_default(),
            created: note.stat.ctime.and_then(DateTime::from_timestamp_millis),
        })
    }

    /// Create or replace a note. Idempotent overwrite. When
    /// `create_folders` is false the parent folder must already exist.
    pub async fn put_note(
        &self,
        path: &str,
        body: &str,
        create_folders: bool,
    ) -> Result<(), GatewayError> {
        if body.len() > MAX_NOTE_BYTES {
            return Err(GatewayError::InvalidArgs(format!(
                "note body exceeds {} bytes",
                MAX_NOTE_BYTES
            )));
        }

        if !create_folders
            && let Some(parent) = paths::parent_of(path)
        {
            self.list_files(parent).await.map_err(|e| match e {
                GatewayError::NotFound(_) => {
                    GatewayError::NotFound(format!("parent folder {parent} does not exist"))
                }
                other => other,
            })?;
        }

        let response = self
            .client
            .put(self.note_url(path))
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "text/markdown")
            .body(body.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail(path, response).await);
        }
        tracing::debug!("saved note {} ({} bytes)", path, body.len());
        Ok(())
    }

    pub async fn delete_note(&self, path: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.note_url(path))
            .header("Authorization", &self.auth_header)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail(path, response).await);
        }
        tracing::debug!("deleted note {}", path);
        Ok(())
    }

    /// One level of the vault tree. Entries with a trailing `/` are
    /// subfolders; everything else is a file.
    pub async fn list_files(&self, folder: &str) -> Result<Vec<String>, GatewayError> {
        let response = self
            .client
            .get(self.folder_url(folder))
            .header("Authorization", &self.auth_header)
            .send()
            .await?;

        if !response.status().is_success() {
            let context = if folder.is_empty() { "vault root" } else { folder };
            return Err(self.fail(context, response).await);
        }

        let listing: FileListing = response.json().await?;
        Ok(listing.files)
    }

    pub async fn search_simple(
        &self,
        query: &str,
        folder: Option<&str>,
    ) -> Result<Vec<SimpleHit>, GatewayError> {
        let mut body = serde_json::json!({ "query": query });
        if let Some(folder) = folder {
            body["folder"] = serde_json::json!(folder);
        }

        let response = self
            .client
            .post(format!("{}/search/simple/", self.base_url))
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail("search", response).await);
        }
        Ok(response.json().await?)
    }

    /// Run a named command upstream. The result shape is the command's
    /// business, not ours.
    pub async fn execute_command(
        &self,
        name: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut body = serde_json::json!({ "name": name });
        if let Some(params) = params {
            body["params"] = params.clone();
        }

        let response = self
            .client
            .post(format!("{}/command/", self.base_url))
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail(name, response).await);
        }

        if response.content_length() == Some(0) {
            return Ok(serde_json::Value::Null);
        }
        let text = response.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }

    /// Startup connectivity probe.
    pub async fn probe(&self) -> Result<(), GatewayError> {
        self.list_files("").await.map(|_| ())
    }
}
