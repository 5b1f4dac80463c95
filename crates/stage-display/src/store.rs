//! Song data store adapters.  The display only ever asks for the full list
//! and does its own matching.

use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SongRecord {
    /// Primary name, as shown on the setlist.
    #[serde(default)]
    pub name: Option<String>,
    /// Alternate display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Name the stage controller uses for this song.
    #[serde(default, alias = "controllerName")]
    pub controller_name: Option<String>,
    /// Lyric/chord text.
    #[serde(default)]
    pub lyrics: Option<String>,
    /// External chart document.
    #[serde(default, alias = "chartUrl")]
    pub chart_url: Option<String>,
    /// Musical key.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("song data is not a valid record list: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("song request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub trait SongStore {
    fn list_all(&self) -> impl Future<Output = Result<Vec<SongRecord>, StoreError>> + Send;
}

/// Records kept in a local JSON array file.  Re-read on every lookup so edits
/// show up without a restart.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SongStore for JsonFileStore {
    async fn list_all(&self) -> Result<Vec<SongRecord>, StoreError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Records served as a JSON array by the band site's data API.
pub struct HttpStore {
    client: reqwest::Client,
    url: String,
}

impl HttpStore {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl SongStore for HttpStore {
    async fn list_all(&self) -> Result<Vec<SongRecord>, StoreError> {
        let records = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<SongRecord>>()
            .await?;
        Ok(records)
    }
}

/// Store picked at startup from configuration.
pub enum AnyStore {
    File(JsonFileStore),
    Http(HttpStore),
}

impl SongStore for AnyStore {
    async fn list_all(&self) -> Result<Vec<SongRecord>, StoreError> {
        match self {
            AnyStore::File(store) => store.list_all().await,
            AnyStore::Http(store) => store.list_all().await,
        }
    }
}
