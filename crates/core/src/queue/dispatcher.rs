//! Pull loop turning queued zip requests into jobs.
//!
//! Each pulled delivery ends in exactly one of:
//! - ack after decode failure (dropped, never retried)
//! - ack after the job reached an outcome, including "no matches"
//! - nack after a job error, so the queue redelivers it
//!
//! While a job runs, its message's ack deadline is renewed so the queue
//! does not hand the same request to another worker.
//!
//! Jobs run concurrently up to `max_concurrent_jobs`. Nothing is pulled
//! while every slot is taken, so a burst stays in the queue instead of in
//! memory.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{decode_request, Delivery, DispatcherConfig, Subscription};
use crate::audit::{AuditEvent, AuditHandle};
use crate::job::JobOrchestrator;
use crate::metrics;

/// Consumes a subscription and drives the orchestrator.
pub struct MessageDispatcher {
    config: DispatcherConfig,
    subscription: Arc<dyn Subscription>,
    orchestrator: Arc<JobOrchestrator>,
    audit: Option<AuditHandle>,

    // Runtime state
    permits: Arc<Semaphore>,
    received: Arc<AtomicU64>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MessageDispatcher {
    pub fn new(
        config: DispatcherConfig,
        subscription: Arc<dyn Subscription>,
        orchestrator: Arc<JobOrchestrator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        Self {
            config,
            subscription,
            orchestrator,
            audit: None,
            permits,
            received: Arc::new(AtomicU64::new(0)),
            running: AtomicBool::new(false),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Spawn the pull loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Message dispatcher already running");
            return;
        }

        info!(
            subscription = self.subscription.name(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting message dispatcher"
        );

        let worker = Arc::new(DispatchLoop {
            subscription: Arc::clone(&self.subscription),
            orchestrator: Arc::clone(&self.orchestrator),
            audit: self.audit.clone(),
            permits: Arc::clone(&self.permits),
            received: Arc::clone(&self.received),
            error_backoff: Duration::from_millis(self.config.error_backoff_ms),
            idle_poll: Duration::from_millis(self.config.idle_poll_ms),
            ack_extension: Duration::from_millis(self.config.ack_extension_ms),
        });
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(worker.run(shutdown_rx));
        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stop pulling and wait for in-flight jobs to settle their messages.
    ///
    /// Safe to call repeatedly and before `start`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Message dispatcher not running");
            return;
        }

        info!("Stopping message dispatcher");
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher loop ended abnormally: {}", e);
            }
        }

        // Every job holds a permit until its message is acked or nacked
        let slots = self.config.max_concurrent_jobs.max(1) as u32;
        match self.permits.acquire_many(slots).await {
            Ok(all) => drop(all),
            Err(e) => error!("Failed to drain in-flight jobs: {}", e),
        }

        info!(
            messages_received = self.messages_received(),
            "Message dispatcher stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliveries seen since construction, malformed ones included.
    pub fn messages_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Background deadline renewal for one delivery; stops when dropped.
struct Lease(JoinHandle<()>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct DispatchLoop {
    subscription: Arc<dyn Subscription>,
    orchestrator: Arc<JobOrchestrator>,
    audit: Option<AuditHandle>,
    permits: Arc<Semaphore>,
    received: Arc<AtomicU64>,
    error_backoff: Duration,
    idle_poll: Duration,
    ack_extension: Duration,
}

impl DispatchLoop {
    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let max = self.permits.available_permits() + 1;
            let pull_started = Instant::now();
            let pulled = tokio::select! {
                _ = shutdown_rx.recv() => break,
                pulled = self.subscription.pull(max) => pulled,
            };

            let deliveries = match pulled {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    drop(permit);
                    warn!(
                        subscription = self.subscription.name(),
                        error = %e,
                        "Subscription error, backing off"
                    );
                    metrics::SUBSCRIPTION_ERRORS.inc();
                    if self.pause(self.error_backoff, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };

            if deliveries.is_empty() {
                drop(permit);
                let remaining = self.idle_poll.saturating_sub(pull_started.elapsed());
                if self.pause(remaining, &mut shutdown_rx).await {
                    break;
                }
                continue;
            }

            let mut first = Some(permit);
            for delivery in deliveries {
                let permit = match first.take() {
                    Some(permit) => permit,
                    None => match Arc::clone(&self.permits).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                self.dispatch(delivery, permit).await;
            }
        }

        debug!("Dispatcher loop received shutdown signal");
    }

    /// Sleep for `duration`; true when shutdown arrived first.
    async fn pause(&self, duration: Duration, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        if duration.is_zero() {
            return false;
        }
        tokio::select! {
            _ = shutdown_rx.recv() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn dispatch(self: &Arc<Self>, delivery: Delivery, permit: OwnedSemaphorePermit) {
        self.received.fetch_add(1, Ordering::Relaxed);

        let request = match decode_request(&delivery) {
            Ok(request) => request,
            Err(reason) => {
                warn!(
                    message_id = %delivery.message_id,
                    error = %reason,
                    "Dropping malformed message"
                );
                self.settle(&delivery, true, "dropped").await;
                if let Some(ref audit) = self.audit {
                    audit
                        .emit(AuditEvent::MessageDropped {
                            message_id: delivery.message_id.clone(),
                            reason: reason.to_string(),
                        })
                        .await;
                }
                drop(permit);
                return;
            }
        };

        debug!(
            message_id = %delivery.message_id,
            tags = %request.tags,
            attempt = delivery.delivery_attempt,
            "Dispatching job"
        );

        let lease = self.hold_lease(&delivery);
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            metrics::JOBS_IN_FLIGHT.inc();
            let result = worker.orchestrator.run(&request).await;
            metrics::JOBS_IN_FLIGHT.dec();
            drop(lease);

            match result {
                Ok(_) => worker.settle(&delivery, true, "acked").await,
                Err(e) => {
                    debug!(
                        message_id = %delivery.message_id,
                        error = %e,
                        "Job failed, message will be redelivered"
                    );
                    worker.settle(&delivery, false, "nacked").await;
                }
            }
        });
    }

    /// Renew the ack deadline of `delivery` until the lease is dropped.
    fn hold_lease(&self, delivery: &Delivery) -> Option<Lease> {
        if self.ack_extension.is_zero() {
            return None;
        }

        let subscription = Arc::clone(&self.subscription);
        let ack_ids = vec![delivery.ack_id.clone()];
        let message_id = delivery.message_id.clone();
        let extension = self.ack_extension;
        Some(Lease(tokio::spawn(async move {
            let mut renew = tokio::time::interval(extension / 2);
            loop {
                renew.tick().await;
                match subscription.extend_deadline(&ack_ids, extension).await {
                    Ok(()) => debug!(message_id = %message_id, "Extended ack deadline"),
                    Err(e) => warn!(
                        message_id = %message_id,
                        error = %e,
                        "Failed to extend ack deadline"
                    ),
                }
            }
        })))
    }

    async fn settle(&self, delivery: &Delivery, ack: bool, outcome: &str) {
        let ack_ids = [delivery.ack_id.clone()];
        let result = if ack {
            self.subscription.ack(&ack_ids).await
        } else {
            self.subscription.nack(&ack_ids).await
        };

        match result {
            Ok(()) => metrics::QUEUE_MESSAGES.with_label_values(&[outcome]).inc(),
            Err(e) => warn!(
                message_id = %delivery.message_id,
                ack,
                error = %e,
                "Failed to settle message"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::job::JobsConfig;
    use crate::queue::{publish_zip_request, MemoryQueue, OutgoingMessage, Publisher, QueueError};
    use crate::source::SourceError;
    use crate::status::JobStatusStore;
    use crate::storage::ArtifactPublisher;
    use crate::testing::{fixtures, MockImageFetcher, MockImageSource, MockObjectStore};

    struct Harness {
        queue: Arc<MemoryQueue>,
        source: Arc<MockImageSource>,
        fetcher: Arc<MockImageFetcher>,
        status: Arc<JobStatusStore>,
        dispatcher: MessageDispatcher,
    }

    fn orchestrator(
        source: Arc<MockImageSource>,
        fetcher: Arc<MockImageFetcher>,
        status: Arc<JobStatusStore>,
    ) -> Arc<JobOrchestrator> {
        Arc::new(JobOrchestrator::new(
            JobsConfig::default(),
            source,
            ArchiveBuilder::new(fetcher),
            ArtifactPublisher::new(
                Arc::new(MockObjectStore::new()),
                "zips",
                Duration::from_secs(60),
            ),
            status,
        ))
    }

    fn config(max_concurrent_jobs: usize) -> DispatcherConfig {
        DispatcherConfig {
            enabled: true,
            max_concurrent_jobs,
            error_backoff_ms: 10,
            idle_poll_ms: 10,
            ack_extension_ms: 60_000,
        }
    }

    fn harness(max_concurrent_jobs: usize) -> Harness {
        let queue = Arc::new(MemoryQueue::with_poll_timeout(
            "dmii-1",
            Duration::from_millis(20),
        ));
        let source = Arc::new(MockImageSource::new());
        let fetcher = Arc::new(MockImageFetcher::new());
        let status = Arc::new(JobStatusStore::new());
        let dispatcher = MessageDispatcher::new(
            config(max_concurrent_jobs),
            queue.clone(),
            orchestrator(source.clone(), fetcher.clone(), status.clone()),
        );
        Harness {
            queue,
            source,
            fetcher,
            status,
            dispatcher,
        }
    }

    async fn wait_for_acks(queue: &MemoryQueue, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.acked_count() < count {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} acks, have {}",
                count,
                queue.acked_count()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_successful_job_is_acked() {
        let h = harness(2);
        let records = fixtures::image_records(3);
        h.fetcher.serve_records(&records).await;
        h.source.set_results("sunset,beach", records).await;

        h.dispatcher.start().await;
        let id = publish_zip_request(h.queue.as_ref(), "sunset,beach").await.unwrap();
        wait_for_acks(&h.queue, 1).await;
        h.dispatcher.stop().await;

        assert_eq!(h.queue.acked_ids(), vec![id]);
        assert_eq!(h.queue.nacked_count(), 0);
        assert!(h.status.get("sunset,beach").await.unwrap().is_success());
        assert_eq!(h.dispatcher.messages_received(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_is_acked_and_loop_survives() {
        let h = harness(2);
        h.dispatcher.start().await;

        h.queue
            .publish(OutgoingMessage {
                data: b"not json at all".to_vec(),
                attributes: HashMap::new(),
            })
            .await
            .unwrap();
        wait_for_acks(&h.queue, 1).await;
        assert_eq!(h.status.len().await, 0);

        publish_zip_request(h.queue.as_ref(), "cats").await.unwrap();
        wait_for_acks(&h.queue, 2).await;
        h.dispatcher.stop().await;

        assert_eq!(h.queue.nacked_count(), 0);
        assert!(h.status.get("cats").await.is_some());
    }

    #[tokio::test]
    async fn test_no_matches_is_acked_without_retry() {
        let h = harness(1);
        h.dispatcher.start().await;

        publish_zip_request(h.queue.as_ref(), "nothing-here").await.unwrap();
        wait_for_acks(&h.queue, 1).await;
        h.dispatcher.stop().await;

        assert_eq!(h.queue.nacked_count(), 0);
        assert!(!h.status.get("nothing-here").await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_failed_job_is_nacked_and_redelivered() {
        let h = harness(1);
        h.source
            .set_next_error(SourceError::ConnectionFailed("upstream down".to_string()))
            .await;
        h.dispatcher.start().await;

        publish_zip_request(h.queue.as_ref(), "cats").await.unwrap();
        // The redelivery finds no matches and is acked
        wait_for_acks(&h.queue, 1).await;
        h.dispatcher.stop().await;

        assert_eq!(h.queue.nacked_count(), 1);
        assert_eq!(h.source.calls(), 2);
        assert_eq!(h.dispatcher.messages_received(), 2);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let h = harness(1);
        h.dispatcher.stop().await;
        h.dispatcher.stop().await;
        assert!(!h.dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_double_start_keeps_single_loop() {
        let h = harness(1);
        h.dispatcher.start().await;
        h.dispatcher.start().await;
        assert!(h.dispatcher.is_running());

        h.dispatcher.stop().await;
        assert!(!h.dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_jobs() {
        let h = harness(2);
        h.source.set_delay(Duration::from_millis(200)).await;
        h.dispatcher.start().await;

        publish_zip_request(h.queue.as_ref(), "slow").await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while h.source.calls() == 0 {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        h.dispatcher.stop().await;

        assert_eq!(h.queue.acked_ids().len(), 1);
        assert!(h.status.get("slow").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let h = harness(2);
        h.source.set_delay(Duration::from_millis(50)).await;
        h.dispatcher.start().await;

        for i in 0..6 {
            publish_zip_request(h.queue.as_ref(), &format!("tag{}", i))
                .await
                .unwrap();
        }
        wait_for_acks(&h.queue, 6).await;
        h.dispatcher.stop().await;

        assert_eq!(h.source.calls(), 6);
        assert!(h.source.peak_concurrency() <= 2);
        assert_eq!(h.status.len().await, 6);
    }

    /// A queue that redelivers after 100ms and a job that takes 400ms.
    fn slow_job_harness(ack_extension_ms: u64) -> Harness {
        let queue = Arc::new(
            MemoryQueue::with_poll_timeout("dmii-1", Duration::from_millis(20))
                .with_ack_deadline(Duration::from_millis(100)),
        );
        let source = Arc::new(MockImageSource::new());
        let fetcher = Arc::new(MockImageFetcher::new());
        let status = Arc::new(JobStatusStore::new());
        let dispatcher = MessageDispatcher::new(
            DispatcherConfig {
                ack_extension_ms,
                ..config(2)
            },
            queue.clone(),
            orchestrator(source.clone(), fetcher.clone(), status.clone()),
        );
        Harness {
            queue,
            source,
            fetcher,
            status,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_running_job_keeps_its_message_leased() {
        let h = slow_job_harness(100);
        h.source.set_delay(Duration::from_millis(400)).await;
        h.dispatcher.start().await;

        publish_zip_request(h.queue.as_ref(), "slow").await.unwrap();
        wait_for_acks(&h.queue, 1).await;
        h.dispatcher.stop().await;

        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.queue.expired_count(), 0);
        assert_eq!(h.dispatcher.messages_received(), 1);
    }

    #[tokio::test]
    async fn test_unleased_slow_job_is_delivered_twice() {
        let h = slow_job_harness(0);
        h.source.set_delay(Duration::from_millis(400)).await;
        h.dispatcher.start().await;

        publish_zip_request(h.queue.as_ref(), "slow").await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while h.source.calls() < 2 {
            assert!(Instant::now() < deadline, "message was never redelivered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.dispatcher.stop().await;

        assert!(h.queue.expired_count() >= 1);
    }

    /// Fails the first `failures` pulls, then behaves like `inner`.
    struct FlakySubscription {
        inner: Arc<MemoryQueue>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Subscription for FlakySubscription {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn pull(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(QueueError::ConnectionFailed("connection reset".to_string()));
            }
            self.inner.pull(max).await
        }

        async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
            self.inner.ack(ack_ids).await
        }

        async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
            self.inner.nack(ack_ids).await
        }

        async fn extend_deadline(
            &self,
            ack_ids: &[String],
            deadline: Duration,
        ) -> Result<(), QueueError> {
            self.inner.extend_deadline(ack_ids, deadline).await
        }
    }

    #[tokio::test]
    async fn test_subscription_errors_do_not_stop_dispatcher() {
        let queue = Arc::new(MemoryQueue::with_poll_timeout("t", Duration::from_millis(20)));
        let subscription = Arc::new(FlakySubscription {
            inner: queue.clone(),
            failures: AtomicU32::new(3),
        });
        let status = Arc::new(JobStatusStore::new());
        let dispatcher = MessageDispatcher::new(
            config(1),
            subscription.clone(),
            orchestrator(
                Arc::new(MockImageSource::new()),
                Arc::new(MockImageFetcher::new()),
                status.clone(),
            ),
        );

        publish_zip_request(queue.as_ref(), "cats").await.unwrap();
        dispatcher.start().await;
        wait_for_acks(&queue, 1).await;
        dispatcher.stop().await;

        assert_eq!(subscription.failures.load(Ordering::SeqCst), 0);
        assert!(status.get("cats").await.is_some());
    }
}
