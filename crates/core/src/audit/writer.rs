use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Most envelopes written in one transaction.
const MAX_BATCH: usize = 64;

/// Drains the audit channel into an [`AuditStore`].
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Write events until every [`AuditHandle`] is dropped and the channel
    /// is empty. Whatever has queued up since the last write goes out as a
    /// single batch.
    pub async fn run(mut self) {
        info!("Audit writer started");

        let mut buffer = Vec::with_capacity(MAX_BATCH);
        let mut written = 0usize;
        while self.rx.recv_many(&mut buffer, MAX_BATCH).await > 0 {
            let records: Vec<AuditRecord> = buffer
                .drain(..)
                .map(|envelope| AuditRecord::new(envelope.timestamp, envelope.event))
                .collect();

            match self.store.insert_batch(&records) {
                Ok(n) => {
                    written += n;
                    debug!(batch = n, "Wrote audit events");
                }
                Err(e) => error!(lost = records.len(), "Failed to write audit events: {}", e),
            }
        }

        info!(written, "Audit writer stopped");
    }
}

/// Create a connected handle and writer with room for `buffer_size` pending
/// events. Run the writer with `tokio::spawn(writer.run())`.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}
