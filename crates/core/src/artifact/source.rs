//! # Artifact Sources
//!
//! Retrieval collaborators behind the store. `HttpSource` follows the first
//! artifact-looking link on a page; `LocalSource` copies a file from disk.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::FetchConfig;
use crate::error::RetrievalError;

/// Retrieves a source reference into a directory owned by the caller
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Materialize `source_ref` inside `dest_dir`, returning the file path
    async fn fetch(
        &self,
        source_ref: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<PathBuf, RetrievalError>;
}

/// Downloads over HTTP(S), scanning HTML pages for a matching link
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    extensions: Vec<String>,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            extensions: config.extensions.clone(),
        })
    }

    /// GET `url`, rejecting bodies that announce or turn out to exceed `max_bytes`
    async fn get(&self, url: &Url, max_bytes: u64) -> Result<Response, RetrievalError> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(RetrievalError::TooLarge { limit: max_bytes });
        }
        Ok(response)
    }

    /// Page body, read chunk by chunk and abandoned once past `max_bytes`
    async fn read_page(&self, url: &Url, max_bytes: u64) -> Result<String, RetrievalError> {
        let mut response = self.get(url, max_bytes).await?;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                return Err(RetrievalError::TooLarge { limit: max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Stream `url` into `path`. The connection is dropped as soon as the
    /// running total passes `max_bytes`.
    async fn download(&self, url: &Url, path: &Path, max_bytes: u64) -> Result<(), RetrievalError> {
        let mut response = self.get(url, max_bytes).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(RetrievalError::TooLarge { limit: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    async fn fetch(
        &self,
        source_ref: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<PathBuf, RetrievalError> {
        let url = Url::parse(source_ref)
            .map_err(|_| RetrievalError::InvalidReference(source_ref.to_string()))?;

        let target = if has_accepted_extension(url.path(), &self.extensions) {
            url
        } else {
            let page = self.read_page(&url, max_bytes).await?;
            find_artifact_link(&page, &url, &self.extensions)
                .ok_or_else(|| RetrievalError::NoMatchingContent(source_ref.to_string()))?
        };

        tracing::debug!(url = %target, "Downloading artifact");
        let path = dest_dir.join(file_name_for(target.path()));
        self.download(&target, &path, max_bytes).await?;
        Ok(path)
    }
}

/// Copies a file given as a plain path or `file://` URL
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

#[async_trait]
impl ArtifactSource for LocalSource {
    async fn fetch(
        &self,
        source_ref: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<PathBuf, RetrievalError> {
        let src = PathBuf::from(source_ref.strip_prefix("file://").unwrap_or(source_ref));
        let meta = tokio::fs::metadata(&src).await?;
        if meta.len() > max_bytes {
            return Err(RetrievalError::TooLarge { limit: max_bytes });
        }

        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .map(file_name_for)
            .unwrap_or_else(|| "artifact".to_string());
        let path = dest_dir.join(name);
        tokio::fs::copy(&src, &path).await?;
        Ok(path)
    }
}

/// Dispatches `http(s)://` references to HTTP and everything else to disk.
///
/// Disk references are refused unless `fetch.allow_local_paths` is set.
pub struct SourceRouter {
    http: HttpSource,
    local: Option<LocalSource>,
}

impl SourceRouter {
    pub fn new(config: &FetchConfig) -> Result<Self, RetrievalError> {
        Ok(Self {
            http: HttpSource::new(config)?,
            local: config.allow_local_paths.then_some(LocalSource),
        })
    }
}

#[async_trait]
impl ArtifactSource for SourceRouter {
    async fn fetch(
        &self,
        source_ref: &str,
        dest_dir: &Path,
        max_bytes: u64,
    ) -> Result<PathBuf, RetrievalError> {
        if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            return self.http.fetch(source_ref, dest_dir, max_bytes).await;
        }
        match &self.local {
            Some(local) => local.fetch(source_ref, dest_dir, max_bytes).await,
            None => Err(RetrievalError::InvalidReference(source_ref.to_string())),
        }
    }
}

fn href_pattern() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("href pattern is valid")
    })
}

fn has_accepted_extension(path: &str, extensions: &[String]) -> bool {
    let lower = path.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
}

/// First link on `page` whose path ends in an accepted extension, resolved against `base`
pub fn find_artifact_link(page: &str, base: &Url, extensions: &[String]) -> Option<Url> {
    href_pattern()
        .captures_iter(page)
        .filter_map(|cap| base.join(cap.get(1)?.as_str()).ok())
        .find(|url| has_accepted_extension(url.path(), extensions))
}

/// Last path segment reduced to a safe file name, keeping its extension
fn file_name_for(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "artifact".to_string()
    } else {
        cleaned.to_string()
    }
}
