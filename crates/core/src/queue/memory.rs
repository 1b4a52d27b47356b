use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use super::{Delivery, OutgoingMessage, Publisher, QueueError, Subscription};

/// Acked message ids kept for inspection.
const ACKED_HISTORY: usize = 1000;

struct Outstanding {
    delivery: Delivery,
    /// Redelivered once this passes without an ack.
    deadline: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Delivery>,
    outstanding: HashMap<String, Outstanding>,
    recent_acked: VecDeque<String>,
    acked: usize,
    nacked: usize,
    expired: usize,
    next_message_id: u64,
    next_ack_id: u64,
}

impl QueueState {
    fn redeliver(&mut self, mut delivery: Delivery) {
        delivery.delivery_attempt += 1;
        self.pending.push_back(delivery);
    }

    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, entry)| entry.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        for ack_id in expired {
            if let Some(entry) = self.outstanding.remove(&ack_id) {
                self.expired += 1;
                self.redeliver(entry.delivery);
            }
        }
    }
}

/// In-process queue implementing both ends.
///
/// Nacked deliveries go to the back of the queue with their attempt
/// counter bumped. With an ack deadline, deliveries left unsettled past it
/// are redelivered the same way unless the deadline is extended.
pub struct MemoryQueue {
    topic: String,
    poll_timeout: Duration,
    ack_deadline: Option<Duration>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(topic: impl Into<String>) -> Self {
        Self::with_poll_timeout(topic, Duration::from_millis(100))
    }

    /// `poll_timeout` bounds how long an empty `pull` waits.
    pub fn with_poll_timeout(topic: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            topic: topic.into(),
            poll_timeout,
            ack_deadline: None,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Redeliver deliveries not settled within `deadline` of being pulled.
    pub fn with_ack_deadline(mut self, deadline: Duration) -> Self {
        self.ack_deadline = Some(deadline);
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Internal("queue lock poisoned".to_string()))
    }

    /// The most recently acknowledged message ids, oldest first.
    pub fn acked_ids(&self) -> Vec<String> {
        self.state()
            .map(|s| s.recent_acked.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages acknowledged since construction.
    pub fn acked_count(&self) -> usize {
        self.state().map(|s| s.acked).unwrap_or(0)
    }

    pub fn nacked_count(&self) -> usize {
        self.state().map(|s| s.nacked).unwrap_or(0)
    }

    /// Deliveries redelivered because their ack deadline passed.
    pub fn expired_count(&self) -> usize {
        self.state().map(|s| s.expired).unwrap_or(0)
    }

    pub fn pending_len(&self) -> usize {
        self.state().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Delivered but neither acked nor nacked.
    pub fn outstanding_len(&self) -> usize {
        self.state().map(|s| s.outstanding.len()).unwrap_or(0)
    }

    fn take_batch(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let mut state = self.state()?;
        let now = Instant::now();
        state.requeue_expired(now);

        let count = max.min(state.pending.len());
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(mut delivery) = state.pending.pop_front() else {
                break;
            };
            state.next_ack_id += 1;
            delivery.ack_id = format!("ack-{}", state.next_ack_id);
            state.outstanding.insert(
                delivery.ack_id.clone(),
                Outstanding {
                    delivery: delivery.clone(),
                    deadline: self.ack_deadline.map(|deadline| now + deadline),
                },
            );
            batch.push(delivery);
        }
        Ok(batch)
    }
}

#[async_trait]
impl Subscription for MemoryQueue {
    fn name(&self) -> &str {
        &self.topic
    }

    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let batch = self.take_batch(max)?;
        if !batch.is_empty() || max == 0 {
            return Ok(batch);
        }

        if tokio::time::timeout(self.poll_timeout, self.notify.notified())
            .await
            .is_err()
        {
            return Ok(Vec::new());
        }
        self.take_batch(max)
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        let mut state = self.state()?;
        for ack_id in ack_ids {
            if let Some(entry) = state.outstanding.remove(ack_id) {
                state.acked += 1;
                if state.recent_acked.len() == ACKED_HISTORY {
                    state.recent_acked.pop_front();
                }
                state.recent_acked.push_back(entry.delivery.message_id);
            }
        }
        Ok(())
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        {
            let mut state = self.state()?;
            for ack_id in ack_ids {
                if let Some(entry) = state.outstanding.remove(ack_id) {
                    state.redeliver(entry.delivery);
                    state.nacked += 1;
                }
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn extend_deadline(&self, ack_ids: &[String], deadline: Duration) -> Result<(), QueueError> {
        if self.ack_deadline.is_none() {
            return Ok(());
        }
        let mut state = self.state()?;
        let until = Instant::now() + deadline;
        for ack_id in ack_ids {
            if let Some(entry) = state.outstanding.get_mut(ack_id) {
                entry.deadline = Some(until);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<String, QueueError> {
        let message_id = {
            let mut state = self.state()?;
            state.next_message_id += 1;
            let message_id = state.next_message_id.to_string();
            state.pending.push_back(Delivery {
                ack_id: String::new(),
                message_id: message_id.clone(),
                data: message.data,
                attributes: message.attributes,
                publish_time: Some(Utc::now()),
                delivery_attempt: 1,
            });
            message_id
        };
        self.notify.notify_one();
        Ok(message_id)
    }

    async fn topic_exists(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn message(data: &str) -> OutgoingMessage {
        OutgoingMessage {
            data: data.as_bytes().to_vec(),
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_pull_ack() {
        let queue = MemoryQueue::new("t");
        let id = queue.publish(message("a")).await.unwrap();

        let batch = queue.pull(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, id);
        assert_eq!(batch[0].data, b"a");
        assert_eq!(queue.outstanding_len(), 1);

        queue.ack(&[batch[0].ack_id.clone()]).await.unwrap();
        assert_eq!(queue.acked_ids(), vec![id]);
        assert_eq!(queue.outstanding_len(), 0);
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_new_ack_id() {
        let queue = MemoryQueue::new("t");
        queue.publish(message("a")).await.unwrap();

        let first = queue.pull(1).await.unwrap().remove(0);
        queue.nack(&[first.ack_id.clone()]).await.unwrap();

        let second = queue.pull(1).await.unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_ne!(second.ack_id, first.ack_id);
        assert_eq!(second.delivery_attempt, 2);
        assert_eq!(queue.nacked_count(), 1);
    }

    #[tokio::test]
    async fn test_ack_history_is_bounded() {
        let queue = MemoryQueue::new("t");
        let mut last_id = String::new();
        for i in 0..ACKED_HISTORY + 50 {
            last_id = queue.publish(message(&i.to_string())).await.unwrap();
            let delivery = queue.pull(1).await.unwrap().remove(0);
            queue.ack(&[delivery.ack_id]).await.unwrap();
        }

        assert_eq!(queue.acked_count(), ACKED_HISTORY + 50);
        let recent = queue.acked_ids();
        assert_eq!(recent.len(), ACKED_HISTORY);
        assert_eq!(recent[0], "51");
        assert_eq!(recent.last(), Some(&last_id));
    }

    #[tokio::test]
    async fn test_unsettled_delivery_is_redelivered_after_deadline() {
        let queue = MemoryQueue::with_poll_timeout("t", Duration::from_millis(10))
            .with_ack_deadline(Duration::from_millis(30));
        queue.publish(message("slow")).await.unwrap();

        let first = queue.pull(1).await.unwrap().remove(0);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let second = queue.pull(1).await.unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.delivery_attempt, 2);
        assert_eq!(queue.expired_count(), 1);

        // The stale handle no longer settles anything
        queue.ack(&[first.ack_id]).await.unwrap();
        assert_eq!(queue.acked_count(), 0);
        assert_eq!(queue.outstanding_len(), 1);
    }

    #[tokio::test]
    async fn test_extended_deadline_keeps_delivery() {
        let queue = MemoryQueue::with_poll_timeout("t", Duration::from_millis(10))
            .with_ack_deadline(Duration::from_millis(30));
        queue.publish(message("slow")).await.unwrap();

        let delivery = queue.pull(1).await.unwrap().remove(0);
        queue
            .extend_deadline(&[delivery.ack_id.clone()], Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(queue.pull(1).await.unwrap().is_empty());
        assert_eq!(queue.expired_count(), 0);
        queue.ack(&[delivery.ack_id]).await.unwrap();
        assert_eq!(queue.acked_count(), 1);
    }

    #[tokio::test]
    async fn test_pull_respects_max() {
        let queue = MemoryQueue::new("t");
        for i in 0..5 {
            queue.publish(message(&i.to_string())).await.unwrap();
        }

        assert_eq!(queue.pull(2).await.unwrap().len(), 2);
        assert_eq!(queue.pending_len(), 3);
    }

    #[tokio::test]
    async fn test_empty_pull_times_out() {
        let queue = MemoryQueue::with_poll_timeout("t", Duration::from_millis(20));
        assert!(queue.pull(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_wakes_on_publish() {
        let queue = Arc::new(MemoryQueue::with_poll_timeout("t", Duration::from_secs(5)));
        let puller = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pull(1).await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(message("late")).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), puller)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].data, b"late");
    }
}
