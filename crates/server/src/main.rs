use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photozip_core::{
    create_audit_system, load_config, validate_config, AdmissionController, ArchiveBuilder,
    ArchiveOptions, ArtifactPublisher, AuditEvent, AuditHandle, AuditStore, Config,
    FlickrFeedSource, FsObjectStore, HttpImageFetcher, ImageSource, JobOrchestrator,
    JobStatusStore, MemoryQueue, MemoryRateLimitStore, MessageDispatcher, ObjectStore,
    PubSubClient, Publisher, QueueBackend, RateLimitBackend, RateLimitStore, SqliteAuditStore,
    SqliteRateLimitStore, Subscription,
};
use photozip_core::source::SourceBackend;
use photozip_core::storage::StorageBackend;

use photozip_server::api::create_router;
use photozip_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// Longest wait for queued audit events at shutdown
const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("PHOTOZIP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Create SQLite audit store
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    // Archive storage
    let (artifacts, object_store) = match config.storage.backend {
        StorageBackend::Filesystem => {
            info!("Storing archives under {:?}", config.storage.root);
            let store = Arc::new(FsObjectStore::new(&config.storage));
            (Some(Arc::clone(&store)), store)
        }
    };
    let status = Arc::new(JobStatusStore::new());

    // Queue
    let (publisher, subscription): (Arc<dyn Publisher>, Arc<dyn Subscription>) =
        match config.queue.backend {
            QueueBackend::Memory => {
                info!("Using in-memory queue (topic: {})", config.queue.topic);
                let queue = Arc::new(MemoryQueue::new(config.queue.topic.clone()));
                (
                    queue.clone() as Arc<dyn Publisher>,
                    queue as Arc<dyn Subscription>,
                )
            }
            QueueBackend::PubSub => {
                let pubsub_config = config
                    .queue
                    .pubsub
                    .clone()
                    .ok_or_else(|| anyhow!("pubsub queue selected but no [queue.pubsub] config"))?;
                info!(
                    "Using Pub/Sub project {} (topic: {}, subscription: {})",
                    pubsub_config.project_id, config.queue.topic, config.queue.subscription
                );
                let client = Arc::new(
                    PubSubClient::new(
                        pubsub_config,
                        config.queue.topic.clone(),
                        config.queue.subscription.clone(),
                    )
                    .context("Failed to create Pub/Sub client")?,
                );
                match client.topic_exists().await {
                    Ok(true) => {}
                    Ok(false) => warn!("Topic {} does not exist", config.queue.topic),
                    Err(e) => warn!("Could not check topic {}: {}", config.queue.topic, e),
                }
                (
                    client.clone() as Arc<dyn Publisher>,
                    client as Arc<dyn Subscription>,
                )
            }
        };

    // Admission control
    let rate_limit_store: Arc<dyn RateLimitStore> = match config.rate_limit.backend {
        RateLimitBackend::Sqlite => Arc::new(
            SqliteRateLimitStore::new(&config.database.path)
                .context("Failed to create rate limit store")?,
        ),
        RateLimitBackend::Memory => Arc::new(MemoryRateLimitStore::new()),
    };
    let admission = Arc::new(
        AdmissionController::new(&config.rate_limit, rate_limit_store)
            .with_audit(audit_handle.clone()),
    );
    info!(
        "Admission control using {} store ({} requests per window)",
        admission.store_name(),
        admission.limit()
    );

    let purge_task = {
        let admission = Arc::clone(&admission);
        let period = Duration::from_secs(config.rate_limit.purge_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let purged = admission.purge_expired();
                if purged > 0 {
                    info!("Purged {} expired rate limit buckets", purged);
                }
            }
        })
    };

    // Dispatcher
    let dispatcher = if config.dispatcher.enabled {
        let orchestrator = Arc::new(build_orchestrator(
            &config,
            object_store,
            Arc::clone(&status),
            audit_handle.clone(),
        )?);
        let dispatcher = Arc::new(
            MessageDispatcher::new(config.dispatcher.clone(), subscription, orchestrator)
                .with_audit(audit_handle.clone()),
        );
        dispatcher.start().await;
        info!("Message dispatcher started");
        Some(dispatcher)
    } else {
        info!("Message dispatcher disabled in config");
        None
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        audit_handle.clone(),
        audit_store,
        status,
        publisher,
        Arc::clone(&admission),
        artifacts,
        dispatcher.clone(),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Client addresses feed admission control
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Some(ref dispatcher) = dispatcher {
        info!("Stopping message dispatcher...");
        dispatcher.stop().await;
        info!("Message dispatcher stopped");
    }

    purge_task.abort();
    let _ = purge_task.await;

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone.
    drop(dispatcher);
    drop(admission);
    drop(audit_handle);

    match tokio::time::timeout(AUDIT_FLUSH_TIMEOUT, writer_handle).await {
        Ok(_) => info!("Audit writer stopped"),
        Err(_) => warn!("Audit writer still running after {:?}, exiting", AUDIT_FLUSH_TIMEOUT),
    }

    Ok(())
}

/// The job pipeline: image search, archive building and publishing.
///
/// Every component keeps an audit handle, so the orchestrator must be
/// dropped before the audit writer can finish.
fn build_orchestrator(
    config: &Config,
    object_store: Arc<dyn ObjectStore>,
    status: Arc<JobStatusStore>,
    audit: AuditHandle,
) -> Result<JobOrchestrator> {
    let source: Arc<dyn ImageSource> = match config.source.backend {
        SourceBackend::Flickr => {
            info!("Using Flickr feed at {}", config.source.flickr.feed_url);
            Arc::new(
                FlickrFeedSource::new(config.source.flickr.clone())
                    .context("Failed to create Flickr source")?,
            )
        }
    };

    let fetcher = Arc::new(
        HttpImageFetcher::new(&config.fetcher).context("Failed to create image fetcher")?,
    );
    let archive = ArchiveBuilder::with_options(
        fetcher,
        ArchiveOptions {
            buffer_limit: config.jobs.entry_buffer_bytes,
            ..ArchiveOptions::default()
        },
    );

    let artifact_publisher = ArtifactPublisher::new(
        object_store,
        config.storage.prefix.clone(),
        Duration::from_secs(config.storage.url_ttl_secs),
    )
    .with_audit(audit.clone());

    Ok(JobOrchestrator::new(
        config.jobs.clone(),
        source,
        archive,
        artifact_publisher,
        status,
    )
    .with_audit(audit))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
