use crate::error::QueueError;
use crate::MAX_DELAY_SECONDS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Optional string attributes attached to a message.
pub type MessageAttributes = BTreeMap<String, String>;

/// Reference to an existing queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueHandle {
    pub name: String,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>) -> Self {
        QueueHandle { name: name.into() }
    }
}

/// A message handed out by `receive`. It stays invisible to other consumers
/// for the queue's visibility timeout unless deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Receipt handle identifying this delivery, used to delete it
    pub receipt: String,
    pub body: String,
    pub attributes: MessageAttributes,
    /// Number of times the message has been received, this delivery included
    pub receive_count: u32,
}

/// Durable message queue contract.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Look a queue up by name.
    async fn get_queue(&self, name: &str) -> Result<Option<QueueHandle>, QueueError>;

    /// Create a queue, returning the existing one if present.
    async fn create_queue(&self, name: &str) -> Result<QueueHandle, QueueError>;

    /// Send a body, visible after `delay_seconds` (0-900).
    async fn send(
        &self,
        queue: &QueueHandle,
        body: String,
        delay_seconds: u32,
        attributes: Option<MessageAttributes>,
    ) -> Result<(), QueueError>;

    /// Receive up to `max_messages`, blocking up to `wait_time` for the first one.
    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn delete(&self, queue: &QueueHandle, message: &ReceivedMessage) -> Result<(), QueueError>;

    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError>;

    async fn set_visibility_timeout(&self, queue: &QueueHandle, seconds: u32) -> Result<(), QueueError>;

    /// Lookup with create-if-absent.
    async fn create_or_get_queue(&self, name: &str) -> Result<QueueHandle, QueueError> {
        match self.get_queue(name).await? {
            Some(queue) => Ok(queue),
            None => self.create_queue(name).await,
        }
    }
}

/// Reject delays outside of 0-900 seconds.
pub fn validate_delay(delay_seconds: u32) -> Result<(), QueueError> {
    if delay_seconds > MAX_DELAY_SECONDS {
        return Err(QueueError::InvalidDelay(delay_seconds));
    }
    Ok(())
}
