use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ObjectStore, StorageConfig, StorageError, UploadBody, UrlSigner};

/// Object store on the local filesystem.
///
/// Links point at this service's `/artifacts/` route and carry an expiry and a
/// signature checked by [`FsObjectStore::open_signed`].
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
    signer: UrlSigner,
}

impl FsObjectStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            signer: UrlSigner::new(&config.signing_secret),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path to a file under the root, refusing anything that
    /// could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Verify a signed link and open the object it points to.
    pub async fn open_signed(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
    ) -> Result<(fs::File, u64), StorageError> {
        self.signer
            .verify(path, expires, signature, Utc::now().timestamp())?;

        let file_path = self.resolve(path)?;
        let file = fs::File::open(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::from(e)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    async fn write_body(file: &mut fs::File, mut body: UploadBody) -> Result<u64, StorageError> {
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put_stream(
        &self,
        path: &str,
        content_type: &str,
        body: UploadBody,
    ) -> Result<u64, StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let mut file = fs::File::create(&partial).await?;
        let result = Self::write_body(&mut file, body).await;
        drop(file);

        match result {
            Ok(written) => {
                fs::rename(&partial, &target).await?;
                debug!(path = %path, content_type, bytes = written, "Stored object");
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial object");
                }
                Err(e)
            }
        }
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        self.resolve(path)?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        let signature = self.signer.sign(path, expires);
        Ok(format!(
            "{}/artifacts/{}?expires={}&signature={}",
            self.public_base_url, path, expires, signature
        ))
    }
}
