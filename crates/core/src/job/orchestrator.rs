use std::sync::{Arc, OnceLock};
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use super::{JobError, JobRequest, JobsConfig, NO_MATCHES};
use crate::archive::{entry_name, ArchiveBuilder, ArchiveEntrySpec, ArchiveError, ArchiveSummary};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;
use crate::source::{fetch_capped, ImageSource};
use crate::status::{JobOutcome, JobStatusStore};
use crate::storage::{ArtifactPublisher, StorageError, UploadBody};

/// Runs jobs end to end: search, archive, publish, record.
pub struct JobOrchestrator {
    config: JobsConfig,
    source: Arc<dyn ImageSource>,
    archive: ArchiveBuilder,
    publisher: ArtifactPublisher,
    status: Arc<JobStatusStore>,
    audit: Option<AuditHandle>,
}

impl JobOrchestrator {
    pub fn new(
        config: JobsConfig,
        source: Arc<dyn ImageSource>,
        archive: ArchiveBuilder,
        publisher: ArtifactPublisher,
        status: Arc<JobStatusStore>,
    ) -> Self {
        Self {
            config,
            source,
            archive,
            publisher,
            status,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn status_store(&self) -> &Arc<JobStatusStore> {
        &self.status
    }

    /// Execute `request` to a terminal outcome, which is always recorded.
    ///
    /// A query with no matches is a graceful failure and returns `Ok`; an
    /// error means the job failed in a way worth retrying.
    pub async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError> {
        let started = Instant::now();
        let tags = request.tags.as_str();
        info!(tags = %tags, message_id = ?request.message_id, "Job started");
        self.emit(AuditEvent::JobStarted {
            tags: tags.to_string(),
            message_id: request.message_id.clone(),
        })
        .await;

        let records = match fetch_capped(self.source.as_ref(), tags, self.config.max_images).await {
            Ok(records) => records,
            Err(e) => return Err(self.fail(tags, e.into(), started).await),
        };

        if records.is_empty() {
            info!(tags = %tags, "No photos found for tags");
            let outcome = JobOutcome::failed(NO_MATCHES);
            self.status.record(tags, outcome.clone()).await;
            self.finish_metrics("no_matches", started);
            self.emit(AuditEvent::JobFailed {
                tags: tags.to_string(),
                reason: NO_MATCHES.to_string(),
                retryable: false,
            })
            .await;
            return Ok(outcome);
        }

        let entries: Vec<ArchiveEntrySpec> = records
            .iter()
            .map(|record| ArchiveEntrySpec {
                name: entry_name(
                    record.index,
                    &record.title,
                    self.config.max_name_len,
                    &self.config.entry_extension,
                ),
                source_url: record.source_url.clone(),
            })
            .collect();
        let photo_count = entries.len() as u32;

        let (body, progress) = self.archive.build(entries);
        let (upload, archive_failure) = upload_body(body);

        let artifact = match self.publisher.publish(upload, tags).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let error = upload_error(&archive_failure, e);
                return Err(self.fail(tags, error, started).await);
            }
        };

        let summary = progress.finish().await.unwrap_or_else(|e| {
            warn!(tags = %tags, error = %e, "Archive summary unavailable");
            ArchiveSummary {
                scheduled: photo_count as usize,
                ..ArchiveSummary::default()
            }
        });

        let outcome = JobOutcome::success(artifact.public_url.clone(), photo_count);
        self.status.record(tags, outcome.clone()).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            tags = %tags,
            path = %artifact.storage_path,
            photo_count,
            embedded = summary.embedded,
            skipped = summary.skipped.len(),
            duration_ms,
            "Job completed"
        );
        self.finish_metrics("success", started);
        self.emit(AuditEvent::JobCompleted {
            tags: tags.to_string(),
            url: artifact.public_url,
            photo_count,
            embedded: summary.embedded as u32,
            skipped: summary.skipped.len() as u32,
            duration_ms,
        })
        .await;

        Ok(outcome)
    }

    async fn fail(&self, tags: &str, error: JobError, started: Instant) -> JobError {
        let reason = error.to_string();
        warn!(tags = %tags, error = %reason, "Job failed");
        self.status.record(tags, JobOutcome::failed(reason.clone())).await;
        self.finish_metrics("failed", started);
        self.emit(AuditEvent::JobFailed {
            tags: tags.to_string(),
            reason,
            retryable: true,
        })
        .await;
        error
    }

    fn finish_metrics(&self, result: &str, started: Instant) {
        metrics::JOBS_TOTAL.with_label_values(&[result]).inc();
        metrics::JOB_DURATION
            .with_label_values(&[result])
            .observe(started.elapsed().as_secs_f64());
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

/// Adapt an archive stream for upload. The first archive error is kept so a
/// failed upload can be attributed to the archive rather than the store.
fn upload_body<S>(archive: S) -> (UploadBody, Arc<OnceLock<ArchiveError>>)
where
    S: Stream<Item = Result<Bytes, ArchiveError>> + Send + 'static,
{
    let failure = Arc::new(OnceLock::new());
    let seen = Arc::clone(&failure);
    let body = archive
        .map(move |chunk| {
            chunk.map_err(|e| {
                let _ = seen.set(e.clone());
                std::io::Error::other(e)
            })
        })
        .boxed();
    (body, failure)
}

fn upload_error(archive_failure: &OnceLock<ArchiveError>, error: StorageError) -> JobError {
    match archive_failure.get() {
        Some(archive_error) => JobError::Archive(archive_error.clone()),
        None => JobError::Storage(error),
    }
}
