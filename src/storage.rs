//! Durable asset storage
//!
//! Completed media lands under `{root}/{category}/{subject}/{fingerprint}.{ext}`.
//! Provider-hosted URLs expire, so remote results are downloaded before a job
//! is allowed to complete. Files are written to a temporary sibling and renamed
//! into place; readers never observe a partial asset.

use crate::cache::CacheKey;
use crate::error::{PipelineError, StorageError};
use crate::provider::RemoteAsset;
use crate::types::Category;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the asset tree
    #[serde(default = "default_asset_root")]
    pub root: PathBuf,
    /// Timeout for downloading a generated asset (seconds)
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Complete with the remote URL when the download fails, instead of
    /// failing the provider attempt
    #[serde(default = "default_true")]
    pub degrade_on_download_failure: bool,
}

fn default_asset_root() -> PathBuf {
    directories::ProjectDirs::from("", "", "atelier")
        .map(|dirs| dirs.data_dir().join("assets"))
        .unwrap_or_else(|| PathBuf::from(".atelier/assets"))
}

fn default_download_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_asset_root(),
            download_timeout_secs: default_download_timeout_secs(),
            degrade_on_download_failure: true,
        }
    }
}

/// Where one job's asset goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTarget {
    pub category: Category,
    pub subject_id: String,
    pub fingerprint: CacheKey,
}

/// Local asset store
pub struct AssetStore {
    root: PathBuf,
    client: Client,
}

impl AssetStore {
    pub fn new(config: &StorageConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create download client: {}", e)))?;
        Ok(Self {
            root: config.root.clone(),
            client,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, target: &AssetTarget) -> PathBuf {
        self.root
            .join(target.category.as_str())
            .join(&target.subject_id)
    }

    pub fn asset_path(&self, target: &AssetTarget, extension: &str) -> PathBuf {
        let stem = &target.fingerprint.as_str()[..16];
        self.target_dir(target).join(format!("{}.{}", stem, extension))
    }

    /// Persist a generated asset, returning its local path.
    pub async fn persist(
        &self,
        asset: &RemoteAsset,
        target: &AssetTarget,
    ) -> Result<PathBuf, PipelineError> {
        match asset {
            RemoteAsset::Bytes { data, extension } => {
                let path = self.asset_path(target, extension);
                self.write_atomic(&path, data).await?;
                Ok(path)
            }
            RemoteAsset::Url(url) => self.download(url, target).await,
            RemoteAsset::Stored(path) => Ok(path.clone()),
        }
    }

    async fn download(&self, url: &str, target: &AssetTarget) -> Result<PathBuf, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::DownloadFailure(format!("GET {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::DownloadFailure(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::DownloadFailure(format!("reading {}: {}", url, e)))?;
        if bytes.is_empty() {
            return Err(PipelineError::DownloadFailure(format!(
                "{} returned an empty body",
                url
            )));
        }

        let extension = infer_extension(url, content_type.as_deref(), target.category);
        let path = self.asset_path(target, &extension);
        self.write_atomic(&path, &bytes)
            .await
            .map_err(|e| PipelineError::DownloadFailure(format!("writing {}: {}", path.display(), e)))?;

        debug!(
            url = %url,
            path = %path.display(),
            bytes = bytes.len(),
            "Downloaded generated asset"
        );
        Ok(path)
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), PipelineError> {
        let parent = path.parent().ok_or_else(|| {
            StorageError::InvalidPath(format!("{} has no parent directory", path.display()))
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(StorageError::from)?;
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(StorageError::from)?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

/// Extension from the URL path, then the content type, then the category.
fn infer_extension(url: &str, content_type: Option<&str>, category: Category) -> String {
    const KNOWN: [&str; 7] = ["png", "jpg", "jpeg", "webp", "gif", "mp4", "webm"];

    let path = url.split(['?', '#']).next().unwrap_or(url);
    if let Some(ext) = path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
    {
        if KNOWN.contains(&ext.as_str()) {
            return ext;
        }
    }

    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim()) {
        Some("image/png") => "png".to_string(),
        Some("image/jpeg") => "jpg".to_string(),
        Some("image/webp") => "webp".to_string(),
        Some("image/gif") => "gif".to_string(),
        Some("video/mp4") => "mp4".to_string(),
        Some("video/webm") => "webm".to_string(),
        _ => category.media_kind().default_extension().to_string(),
    }
}
