use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::AuditEvent;

/// An event stamped with the moment it was emitted, not when it is written.
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl From<AuditEvent> for AuditEventEnvelope {
    fn from(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Cloneable sender side of the audit channel.
///
/// Auditing is best effort: a closed or full channel is logged and the
/// caller carries on.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Queue `event`, waiting while the channel is full.
    pub async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if self.tx.send(event.into()).await.is_err() {
            warn!(event_type, "Audit writer gone, event lost");
        }
    }

    /// Queue `event` from sync code. Returns false if it was dropped.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.try_send(event.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(event_type, "Audit channel full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(event_type, "Audit writer gone, event lost");
                false
            }
        }
    }

    /// True once the writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dropped(message_id: &str) -> AuditEvent {
        AuditEvent::MessageDropped {
            message_id: message_id.to_string(),
            reason: "missing tags".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emit_stamps_envelope() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        let before = Utc::now();
        handle
            .emit(AuditEvent::JobStarted {
                tags: "cats".to_string(),
                message_id: Some("m-1".to_string()),
            })
            .await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert!(envelope.timestamp >= before);
        assert!(matches!(
            envelope.event,
            AuditEvent::JobStarted { ref tags, .. } if tags == "cats"
        ));
    }

    #[test]
    fn test_try_emit_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = AuditHandle::new(tx);

        assert!(handle.try_emit(dropped("m-1")));
        assert!(!handle.try_emit(dropped("m-2")));

        let kept = rx.try_recv().unwrap();
        assert!(matches!(
            kept.event,
            AuditEvent::MessageDropped { ref message_id, .. } if message_id == "m-1"
        ));
    }

    #[tokio::test]
    async fn test_closed_channel_is_not_an_error() {
        let (tx, rx) = mpsc::channel::<AuditEventEnvelope>(10);
        let handle = AuditHandle::new(tx);
        drop(rx);

        assert!(handle.is_closed());
        handle.emit(dropped("m-1")).await;
        assert!(!handle.try_emit(dropped("m-2")));
    }
}
