pub mod admission;
pub mod archive;
pub mod audit;
pub mod config;
pub mod fetcher;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod source;
pub mod status;
pub mod storage;
pub mod testing;

pub use admission::{
    client_identity, AdmissionController, AdmissionOutcome, MemoryRateLimitStore,
    RateLimitBackend, RateLimitConfig, RateLimitStore, SqliteRateLimitStore,
};
pub use archive::{ArchiveBuilder, ArchiveOptions, ArchiveSummary};
pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use fetcher::{HttpImageFetcher, ImageFetcher};
pub use job::{JobError, JobOrchestrator, JobRequest};
pub use queue::{
    publish_zip_request, MemoryQueue, MessageDispatcher, PubSubClient, Publisher, QueueBackend,
    Subscription,
};
pub use source::{FlickrFeedSource, ImageRecord, ImageSource};
pub use status::{JobOutcome, JobStatusStore};
pub use storage::{ArchiveArtifact, ArtifactPublisher, FsObjectStore, ObjectStore, UrlSigner};
