use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::{RateLimitConfig, RateLimitStore, TokenBucket};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    Allowed { remaining: u32 },
    Rejected { remaining: u32, retry_after_secs: u64 },
    /// The store could not be consulted; the request is let through unmetered.
    FailedOpen { reason: String },
}

impl AdmissionOutcome {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Remaining whole requests, unknown when the store failed.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Self::Allowed { remaining } | Self::Rejected { remaining, .. } => Some(*remaining),
            Self::FailedOpen { .. } => None,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Rejected {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Allowed { .. } => "allowed",
            Self::Rejected { .. } => "rejected",
            Self::FailedOpen { .. } => "failed_open",
        }
    }
}

/// Gates inbound submissions with a per-client token bucket.
pub struct AdmissionController {
    bucket: TokenBucket,
    ttl: Duration,
    store: Arc<dyn RateLimitStore>,
    audit: Option<AuditHandle>,
}

impl AdmissionController {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            bucket: TokenBucket::from_config(config),
            ttl: Duration::from_secs(config.ttl_secs),
            store,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Value for the `X-RateLimit-Limit` header.
    pub fn limit(&self) -> u32 {
        self.bucket.limit()
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn check(&self, client: &str) -> AdmissionOutcome {
        self.check_at(client, Utc::now().timestamp_millis())
    }

    /// Check `client` as of `now_ms` (unix milliseconds).
    pub fn check_at(&self, client: &str, now_ms: i64) -> AdmissionOutcome {
        let key = format!("ratelimit:{}", client);
        let mut decision = None;

        let result = self.store.update(&key, now_ms, self.ttl, &mut |current| {
            let (next, d) = self.bucket.evaluate(current, now_ms);
            decision = Some(d);
            next
        });

        let outcome = match (result, decision) {
            (Ok(_), Some(d)) if d.allowed => AdmissionOutcome::Allowed {
                remaining: d.remaining,
            },
            (Ok(_), Some(d)) => AdmissionOutcome::Rejected {
                remaining: d.remaining,
                retry_after_secs: d.reset_in_secs.unwrap_or(1),
            },
            (Ok(_), None) => AdmissionOutcome::FailedOpen {
                reason: format!("{} store returned without evaluating", self.store.name()),
            },
            (Err(e), _) => AdmissionOutcome::FailedOpen {
                reason: e.to_string(),
            },
        };

        match &outcome {
            AdmissionOutcome::FailedOpen { reason } => {
                tracing::warn!(
                    client = %client,
                    store = self.store.name(),
                    error = %reason,
                    "Rate limit store unavailable, admitting request"
                );
                if let Some(ref audit) = self.audit {
                    audit.try_emit(AuditEvent::AdmissionFailedOpen {
                        client: client.to_string(),
                        reason: reason.clone(),
                    });
                }
            }
            AdmissionOutcome::Rejected {
                retry_after_secs, ..
            } => {
                tracing::debug!(client = %client, retry_after_secs, "Request rate limited");
            }
            AdmissionOutcome::Allowed { .. } => {}
        }

        metrics::ADMISSION_DECISIONS
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    /// Remove buckets whose TTL elapsed.
    pub fn purge_expired(&self) -> usize {
        match self.store.purge_expired(Utc::now().timestamp_millis()) {
            Ok(purged) => {
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired rate limit buckets");
                }
                purged
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to purge rate limit buckets");
                0
            }
        }
    }
}

/// Client identity for rate limiting: the first `X-Forwarded-For` entry,
/// else the transport peer address, else `"unknown"`.
pub fn client_identity(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> String {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(String::from)
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::MemoryRateLimitStore;
    use crate::audit::{create_audit_system, AuditFilter, AuditStore, SqliteAuditStore};
    use crate::testing::MockRateLimitStore;

    const T0: i64 = 1_700_000_000_000;

    fn controller_with(store: Arc<dyn RateLimitStore>) -> AdmissionController {
        AdmissionController::new(&RateLimitConfig::default(), store)
    }

    #[test]
    fn test_burst_of_five_then_rejected() {
        let controller = controller_with(Arc::new(MemoryRateLimitStore::new()));

        for expected_remaining in (0..5).rev() {
            assert_eq!(
                controller.check_at("1.2.3.4", T0),
                AdmissionOutcome::Allowed {
                    remaining: expected_remaining
                }
            );
        }

        let sixth = controller.check_at("1.2.3.4", T0);
        assert!(!sixth.is_allowed());
        assert_eq!(sixth.retry_after_secs(), Some(3));
        assert_eq!(sixth.remaining(), Some(0));
    }

    #[test]
    fn test_one_more_after_retry_after() {
        let controller = controller_with(Arc::new(MemoryRateLimitStore::new()));
        for _ in 0..6 {
            controller.check_at("c", T0);
        }

        assert!(controller.check_at("c", T0 + 3_000).is_allowed());
        assert!(!controller.check_at("c", T0 + 3_000).is_allowed());
    }

    #[test]
    fn test_clients_are_independent() {
        let controller = controller_with(Arc::new(MemoryRateLimitStore::new()));
        for _ in 0..6 {
            controller.check_at("a", T0);
        }
        assert!(controller.check_at("b", T0).is_allowed());
    }

    #[test]
    fn test_limit_header_value() {
        let controller = controller_with(Arc::new(MemoryRateLimitStore::new()));
        assert_eq!(controller.limit(), 5);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unavailable() {
        let store = Arc::new(MockRateLimitStore::new());
        store.set_unavailable(true);

        let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(audit_store.clone(), 16);
        let writer_handle = tokio::spawn(writer.run());

        let controller = controller_with(store.clone()).with_audit(handle);
        for _ in 0..10 {
            let outcome = controller.check_at("1.2.3.4", T0);
            assert!(outcome.is_allowed());
            assert!(matches!(outcome, AdmissionOutcome::FailedOpen { .. }));
            assert_eq!(outcome.remaining(), None);
        }

        drop(controller);
        writer_handle.await.unwrap();

        let filter = AuditFilter::new().with_event_type("admission_failed_open");
        assert_eq!(audit_store.count(&filter).unwrap(), 10);
    }

    #[tokio::test]
    async fn test_recovers_after_store_returns() {
        let store = Arc::new(MockRateLimitStore::new());
        let controller = controller_with(store.clone());

        store.set_unavailable(true);
        assert!(matches!(
            controller.check_at("c", T0),
            AdmissionOutcome::FailedOpen { .. }
        ));

        store.set_unavailable(false);
        assert_eq!(
            controller.check_at("c", T0),
            AdmissionOutcome::Allowed { remaining: 4 }
        );
    }

    #[test]
    fn test_client_identity() {
        let peer: IpAddr = "10.0.0.9".parse().unwrap();

        assert_eq!(
            client_identity(Some(" 203.0.113.7 , 10.0.0.1"), Some(peer)),
            "203.0.113.7"
        );
        assert_eq!(client_identity(Some(""), Some(peer)), "10.0.0.9");
        assert_eq!(client_identity(None, Some(peer)), "10.0.0.9");
        assert_eq!(client_identity(None, None), "unknown");
    }
}
