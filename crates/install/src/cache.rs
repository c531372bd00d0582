use std::sync::Arc;

use bytes::Bytes;
use store::Namespace;
use tokio::sync::OnceCell;

use crate::error::InstallError;
use crate::fetch::Fetcher;
use crate::gzip;

/// The engine binary image, persisted under a fixed key.
///
/// `resolve` is memoized: concurrent callers share one in-flight lookup and
/// at most one download happens per process. A failed resolution is not
/// cached, so the next caller tries again.
pub struct BinaryCache {
    namespace: Namespace,
    name: String,
    source: Option<String>,
    fetcher: Arc<dyn Fetcher>,
    resolved: OnceCell<Bytes>,
}

impl std::fmt::Debug for BinaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryCache")
            .field("namespace", &self.namespace.name())
            .field("name", &self.name)
            .field("source", &self.source)
            .field("resolved", &self.resolved.initialized())
            .finish()
    }
}

impl BinaryCache {
    pub fn new(
        namespace: Namespace,
        name: impl Into<String>,
        source: Option<String>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            namespace,
            name: name.into(),
            source,
            fetcher,
            resolved: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn resolve(&self) -> Result<Bytes, InstallError> {
        self.resolved
            .get_or_try_init(|| self.load_or_fetch())
            .await
            .cloned()
    }

    /// Stored image size, if one is cached.
    pub async fn cached_size(&self) -> Result<Option<u64>, InstallError> {
        let namespace = self.namespace.clone();
        let name = self.name.clone();
        blocking(move || namespace.size_of(&name)).await
    }

    pub async fn clear(&self) -> Result<bool, InstallError> {
        let namespace = self.namespace.clone();
        let name = self.name.clone();
        blocking(move || namespace.delete(&name)).await
    }

    async fn load_or_fetch(&self) -> Result<Bytes, InstallError> {
        let namespace = self.namespace.clone();
        let name = self.name.clone();
        if let Some(image) = blocking(move || namespace.get(&name)).await? {
            tracing::debug!("binary image '{}' served from cache", self.name);
            return Ok(Bytes::from(image));
        }

        let source = self
            .source
            .as_deref()
            .ok_or(InstallError::MissingSource("binary image"))?;
        let fetched = self.fetcher.fetch(source).await?;
        let image = tokio::task::spawn_blocking(move || gzip::maybe_gunzip(fetched.to_vec()))
            .await
            .map_err(|err| InstallError::Task(err.to_string()))?
            .map_err(|err| InstallError::Decompress {
                what: "binary image",
                reason: err.to_string(),
            })?;
        let image = Bytes::from(image);

        let namespace = self.namespace.clone();
        let name = self.name.clone();
        let stored = image.clone();
        blocking(move || namespace.put(&name, &stored)).await?;
        tracing::info!("cached binary image '{}' ({} bytes)", self.name, image.len());
        Ok(image)
    }
}

/// Run a store call off the async threads.
async fn blocking<T, F>(call: F) -> Result<T, InstallError>
where
    T: Send + 'static,
    F: FnOnce() -> store::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| InstallError::Task(err.to_string()))?
        .map_err(InstallError::from)
}
