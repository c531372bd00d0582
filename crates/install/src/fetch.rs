use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::InstallError;

/// Where binary images and archives come from.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Bytes, InstallError>;
}

/// `http(s)://` through reqwest; `file://` URLs and plain paths from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<Bytes, InstallError> {
        let transport = |reason: String| InstallError::Transport {
            url: source.to_string(),
            reason,
        };

        if source.starts_with("http://") || source.starts_with("https://") {
            tracing::debug!("fetching {}", source);
            let response = self
                .client
                .get(source)
                .send()
                .await
                .map_err(|err| transport(err.to_string()))?;
            if !response.status().is_success() {
                return Err(transport(format!("server answered {}", response.status())));
            }
            return response.bytes().await.map_err(|err| transport(err.to_string()));
        }

        let path = source.strip_prefix("file://").unwrap_or(source);
        let data = tokio::fs::read(path)
            .await
            .map_err(|err| transport(err.to_string()))?;
        Ok(Bytes::from(data))
    }
}

/// Serves registered blobs and counts every fetch.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    sources: Mutex<HashMap<String, Bytes>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(source, data);
        self
    }

    pub fn insert(&self, source: impl Into<String>, data: impl Into<Bytes>) {
        self.sources
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(source.into(), data.into());
    }

    pub fn fetch_count(&self, source: &str) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(source)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .values()
            .sum()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, source: &str) -> Result<Bytes, InstallError> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .entry(source.to_string())
            .or_default() += 1;
        self.sources
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(source)
            .cloned()
            .ok_or_else(|| InstallError::Transport {
                url: source.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fetcher_counts_hits_and_misses() {
        let fetcher = MemoryFetcher::new().with("mem://image", &b"img"[..]);
        assert_eq!(fetcher.fetch("mem://image").await.unwrap(), &b"img"[..]);
        assert!(matches!(
            fetcher.fetch("mem://missing").await,
            Err(InstallError::Transport { .. })
        ));
        assert_eq!(fetcher.fetch_count("mem://image"), 1);
        assert_eq!(fetcher.total_fetches(), 2);
    }

    #[tokio::test]
    async fn http_fetcher_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.dat.gz");
        std::fs::write(&path, b"archive").unwrap();
        let fetcher = HttpFetcher::new();

        let plain = fetcher.fetch(path.to_str().unwrap()).await.unwrap();
        let url = format!("file://{}", path.display());
        let via_url = fetcher.fetch(&url).await.unwrap();
        assert_eq!(plain, &b"archive"[..]);
        assert_eq!(via_url, plain);

        let missing = fetcher.fetch("/definitely/not/here").await.unwrap_err();
        assert!(missing.to_string().starts_with("fetching /definitely/not/here failed"));
    }
}
