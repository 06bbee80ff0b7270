use crate::metrics::BrokerMetrics;
use crate::queue::MessageQueue;
use async_trait::async_trait;
use dashmap::DashMap;
use defer_queue_core::{
    validate_delay, MessageAttributes, QueueError, QueueHandle, QueueService, ReceivedMessage,
    MAX_WAIT_TIME_SECONDS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Most messages a single receive hands out
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Default visibility timeout of a new queue, in seconds
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u32 = 30;

/// Default cap on a message body, in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// In-process implementation of the queue service contract.
pub struct MemoryQueueService {
    queues: DashMap<String, Arc<MessageQueue>>,
    default_visibility_timeout: Duration,
    max_message_size: usize,
    metrics: Option<(Arc<BrokerMetrics>, String)>,
}

impl MemoryQueueService {
    pub fn new() -> Self {
        MemoryQueueService {
            queues: DashMap::new(),
            default_visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS as u64),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            metrics: None,
        }
    }

    pub fn with_limits(mut self, default_visibility_timeout: Duration, max_message_size: usize) -> Self {
        self.default_visibility_timeout = default_visibility_timeout;
        self.max_message_size = max_message_size;
        self
    }

    /// Report to `metrics`, labelling queues with `owner`
    pub fn with_metrics(mut self, metrics: Arc<BrokerMetrics>, owner: impl Into<String>) -> Self {
        self.metrics = Some((metrics, owner.into()));
        self
    }

    /// Existing queue by name
    pub fn queue(&self, name: &str) -> Result<Arc<MessageQueue>, QueueError> {
        self.queues
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.queues.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Delete by receipt handle
    pub fn delete_receipt(&self, queue: &QueueHandle, receipt: &str) -> Result<(), QueueError> {
        let stored = self.queue(&queue.name)?;
        if !stored.delete(receipt) {
            return Err(QueueError::UnknownReceipt(receipt.to_string()));
        }
        if let Some((metrics, _)) = &self.metrics {
            metrics.messages_deleted.inc();
        }
        self.report_depth(&stored);
        Ok(())
    }

    fn report_depth(&self, queue: &MessageQueue) {
        if let Some((metrics, owner)) = &self.metrics {
            metrics.set_depth(owner, queue.name(), queue.len());
        }
    }
}

impl Default for MemoryQueueService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueService for MemoryQueueService {
    async fn get_queue(&self, name: &str) -> Result<Option<QueueHandle>, QueueError> {
        Ok(self.queues.get(name).map(|_| QueueHandle::new(name)))
    }

    async fn create_queue(&self, name: &str) -> Result<QueueHandle, QueueError> {
        let mut created = false;
        self.queues.entry(name.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(MessageQueue::new(name, self.default_visibility_timeout))
        });

        if created {
            debug!(queue = %name, "Created queue");
            if let Some((metrics, _)) = &self.metrics {
                metrics.queues.inc();
            }
        }
        Ok(QueueHandle::new(name))
    }

    async fn send(
        &self,
        queue: &QueueHandle,
        body: String,
        delay_seconds: u32,
        attributes: Option<MessageAttributes>,
    ) -> Result<(), QueueError> {
        validate_delay(delay_seconds)?;
        if body.len() > self.max_message_size {
            return Err(QueueError::MessageTooLarge {
                max: self.max_message_size,
                actual: body.len(),
            });
        }

        let stored = self.queue(&queue.name)?;
        let message_id = stored.push(
            body,
            Duration::from_secs(delay_seconds as u64),
            attributes.unwrap_or_default(),
        );
        debug!(queue = %queue.name, message_id = %message_id, delay_seconds, "Message sent");

        if let Some((metrics, _)) = &self.metrics {
            metrics.messages_sent.inc();
        }
        self.report_depth(&stored);
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let stored = self.queue(&queue.name)?;
        let max_messages = max_messages.clamp(1, MAX_RECEIVE_BATCH);
        let wait_time = wait_time.min(Duration::from_secs(MAX_WAIT_TIME_SECONDS));

        let batch = stored.receive(max_messages, wait_time).await?;
        if let Some((metrics, _)) = &self.metrics {
            metrics.messages_received.inc_by(batch.len() as u64);
        }
        Ok(batch)
    }

    async fn delete(&self, queue: &QueueHandle, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.delete_receipt(queue, &message.receipt)
    }

    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        let (_, stored) = self
            .queues
            .remove(&queue.name)
            .ok_or_else(|| QueueError::QueueNotFound(queue.name.clone()))?;
        stored.close();
        debug!(queue = %queue.name, "Deleted queue");

        if let Some((metrics, owner)) = &self.metrics {
            metrics.queues.dec();
            metrics.forget_queue(owner, &queue.name);
        }
        Ok(())
    }

    async fn set_visibility_timeout(&self, queue: &QueueHandle, seconds: u32) -> Result<(), QueueError> {
        self.queue(&queue.name)?
            .set_visibility_timeout(Duration::from_secs(seconds as u64));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let service = MemoryQueueService::new();
        assert!(service.get_queue("q").await.unwrap().is_none());

        let first = service.create_or_get_queue("q").await.unwrap();
        service
            .send(&first, "body".to_string(), 0, None)
            .await
            .unwrap();
        let second = service.create_queue("q").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.queue("q").unwrap().len(), 1);
        assert_eq!(service.queue_names(), vec!["q".to_string()]);
    }

    #[tokio::test]
    async fn test_send_rejects_long_delay() {
        let service = MemoryQueueService::new();
        let queue = service.create_queue("q").await.unwrap();

        let result = service.send(&queue, "body".to_string(), 901, None).await;
        assert!(matches!(result, Err(QueueError::InvalidDelay(901))));
        assert!(service.queue("q").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_rejects_large_body() {
        let service = MemoryQueueService::new().with_limits(Duration::from_secs(30), 4);
        let queue = service.create_queue("q").await.unwrap();

        let result = service.send(&queue, "too long".to_string(), 0, None).await;
        assert!(matches!(result, Err(QueueError::MessageTooLarge { max: 4, actual: 8 })));
    }

    #[tokio::test]
    async fn test_receive_and_delete() {
        let service = MemoryQueueService::new();
        let queue = service.create_queue("q").await.unwrap();
        let mut attributes = MessageAttributes::new();
        attributes.insert("origin".to_string(), "test".to_string());
        service
            .send(&queue, "body".to_string(), 0, Some(attributes))
            .await
            .unwrap();

        let batch = service
            .receive(&queue, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].attributes.get("origin").map(String::as_str), Some("test"));

        service.delete(&queue, &batch[0]).await.unwrap();
        assert!(service.queue("q").unwrap().is_empty());
        assert!(matches!(
            service.delete(&queue, &batch[0]).await,
            Err(QueueError::UnknownReceipt(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_queue() {
        let service = MemoryQueueService::new();
        let queue = service.create_queue("q").await.unwrap();
        service.delete_queue(&queue).await.unwrap();

        assert!(service.get_queue("q").await.unwrap().is_none());
        assert!(matches!(
            service.send(&queue, "x".to_string(), 0, None).await,
            Err(QueueError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_visibility_timeout_setting() {
        let service = MemoryQueueService::new();
        let queue = service.create_queue("q").await.unwrap();
        service.set_visibility_timeout(&queue, 120).await.unwrap();

        assert_eq!(
            service.queue("q").unwrap().visibility_timeout(),
            Duration::from_secs(120)
        );
    }

    #[tokio::test]
    async fn test_metrics_follow_operations() {
        let metrics = Arc::new(BrokerMetrics::new().unwrap());
        let service = MemoryQueueService::new().with_metrics(metrics.clone(), "");
        let queue = service.create_queue("q").await.unwrap();
        service.send(&queue, "a".to_string(), 0, None).await.unwrap();

        assert_eq!(metrics.queues.get(), 1);
        assert_eq!(metrics.messages_sent.get(), 1);
        assert_eq!(metrics.queue_depth.with_label_values(&["", "q"]).get(), 1);
    }
}
