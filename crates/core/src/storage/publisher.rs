use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ArchiveArtifact, ObjectStore, StorageError, UploadBody};
use crate::archive::archive_stem;
use crate::audit::{AuditEvent, AuditHandle};

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Streams archives into an [`ObjectStore`] under unique names.
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    url_ttl: Duration,
    audit: Option<AuditHandle>,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, url_ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            url_ttl,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    fn storage_path(&self, filename: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}.zip", filename)
        } else {
            format!("{}/{}.zip", self.prefix, filename)
        }
    }

    /// Upload `body` as a new archive named after `name_hint` and return a
    /// signed link to it.
    ///
    /// The archive record is written to the audit log afterwards; a failure
    /// there is logged and does not affect the result.
    pub async fn publish(
        &self,
        body: UploadBody,
        name_hint: &str,
    ) -> Result<ArchiveArtifact, StorageError> {
        let filename = format!("{}_{}", archive_stem(name_hint), Uuid::new_v4());
        let storage_path = self.storage_path(&filename);

        let size_bytes = self
            .store
            .put_stream(&storage_path, ARCHIVE_CONTENT_TYPE, body)
            .await?;
        let public_url = self.store.signed_url(&storage_path, self.url_ttl).await?;

        let artifact = ArchiveArtifact {
            filename,
            storage_path,
            public_url,
            created_at: Utc::now(),
            size_bytes,
        };
        info!(
            store = self.store.name(),
            path = %artifact.storage_path,
            bytes = artifact.size_bytes,
            "Archive published"
        );

        if let Some(ref audit) = self.audit {
            let recorded = audit.try_emit(AuditEvent::ArchivePublished {
                filename: artifact.filename.clone(),
                storage_path: artifact.storage_path.clone(),
                public_url: artifact.public_url.clone(),
                created_at: artifact.created_at,
                size_bytes: artifact.size_bytes,
            });
            if !recorded {
                warn!(path = %artifact.storage_path, "Archive record was not written to the audit log");
            }
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{create_audit_system, AuditFilter, AuditStore, SqliteAuditStore};
    use crate::testing::MockObjectStore;
    use bytes::Bytes;
    use futures::StreamExt;

    fn body(data: &'static [u8]) -> UploadBody {
        futures::stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
    }

    #[tokio::test]
    async fn test_publish_allocates_unique_paths() {
        let store = Arc::new(MockObjectStore::new());
        let publisher = ArtifactPublisher::new(store.clone(), "zips", Duration::from_secs(172_800));

        let a = publisher.publish(body(b"one"), "sunset,beach").await.unwrap();
        let b = publisher.publish(body(b"two"), "sunset,beach").await.unwrap();

        assert!(a.filename.starts_with("sunset_beach_"));
        assert_eq!(a.storage_path, format!("zips/{}.zip", a.filename));
        assert_ne!(a.storage_path, b.storage_path);
        assert_eq!(a.size_bytes, 3);
        assert!(a.public_url.contains(&a.storage_path));

        assert_eq!(store.object(&a.storage_path).await, Some(b"one".to_vec()));
        assert_eq!(
            store.content_type(&a.storage_path).await.as_deref(),
            Some("application/zip")
        );
        assert_eq!(store.signed_ttls().await, vec![Duration::from_secs(172_800); 2]);
    }

    #[tokio::test]
    async fn test_publish_propagates_write_failure() {
        let store = Arc::new(MockObjectStore::new());
        store
            .set_next_error(StorageError::WriteFailed("bucket gone".to_string()))
            .await;
        let publisher = ArtifactPublisher::new(store.clone(), "zips", Duration::from_secs(60));

        let result = publisher.publish(body(b"x"), "cats").await;
        assert!(matches!(result, Err(StorageError::WriteFailed(_))));
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_records_archive_in_audit_log() {
        let store = Arc::new(MockObjectStore::new());
        let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(audit_store.clone(), 8);
        let writer_handle = tokio::spawn(writer.run());

        let publisher = ArtifactPublisher::new(store, "zips", Duration::from_secs(60)).with_audit(handle);
        let artifact = publisher.publish(body(b"zip"), "cats").await.unwrap();
        drop(publisher);
        writer_handle.await.unwrap();

        let records = audit_store
            .query(&AuditFilter::new().with_event_type("archive_published"))
            .unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].data {
            AuditEvent::ArchivePublished { storage_path, .. } => {
                assert_eq!(storage_path, &artifact.storage_path)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_publish() {
        let store = Arc::new(MockObjectStore::new());
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);

        let publisher = ArtifactPublisher::new(store, "zips", Duration::from_secs(60))
            .with_audit(AuditHandle::new(tx));
        assert!(publisher.publish(body(b"zip"), "cats").await.is_ok());
    }
}
