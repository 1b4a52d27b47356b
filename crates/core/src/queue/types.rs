use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Queue API error: {0}")]
    ApiError(String),

    #[error("Queue request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A message handed out by a subscription, pending ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle for acknowledging this particular delivery.
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    pub publish_time: Option<DateTime<Utc>>,
    /// 1 on first delivery.
    pub delivery_attempt: u32,
}

/// A message to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

/// Pull side of a queue.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn name(&self) -> &str;

    /// Receive up to `max` messages. May wait for messages to arrive and
    /// may return an empty batch.
    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, QueueError>;

    /// Remove deliveries from the queue.
    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError>;

    /// Hand deliveries back for redelivery.
    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError>;

    /// Keep deliveries leased for another `deadline`, counted from now.
    async fn extend_deadline(&self, ack_ids: &[String], deadline: Duration) -> Result<(), QueueError>;
}

/// Push side of a queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Publish and return the message id assigned by the queue.
    async fn publish(&self, message: OutgoingMessage) -> Result<String, QueueError>;

    async fn topic_exists(&self) -> Result<bool, QueueError>;
}
