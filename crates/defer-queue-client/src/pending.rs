use crate::{DispatchError, Result};
use defer_queue_core::{
    Codec, EntityResolver, QueueError, QueueNaming, QueueService, ResultEnvelope, ResultOptions,
    Value, MAX_WAIT_TIME_SECONDS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cadence of result queue lookups
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Handle on the outcome of a deferred call.
///
/// The result channel is a queue named after `result_uuid`. The first
/// successful [`wait`](PendingResult::wait) consumes its single message,
/// deletes the queue and caches the value.
pub struct PendingResult {
    result_uuid: Uuid,
    result_options: ResultOptions,
    result: Option<Value>,
    queues: Arc<dyn QueueService>,
    codec: Arc<Codec>,
    resolver: Arc<dyn EntityResolver + Send + Sync>,
}

impl PendingResult {
    pub fn new(
        result_uuid: Uuid,
        result_options: ResultOptions,
        queues: Arc<dyn QueueService>,
        codec: Arc<Codec>,
        resolver: Arc<dyn EntityResolver + Send + Sync>,
    ) -> Self {
        PendingResult {
            result_uuid,
            result_options,
            result: None,
            queues,
            codec,
            resolver,
        }
    }

    pub fn result_uuid(&self) -> Uuid {
        self.result_uuid
    }

    pub fn result_options(&self) -> ResultOptions {
        self.result_options
    }

    pub fn result_queue_name(&self) -> String {
        QueueNaming::result_queue_name(&self.result_uuid)
    }

    /// Value fetched by an earlier `wait`
    pub fn cached(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Wait up to `timeout` (forever with `None`) polling every second.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<Value>> {
        self.wait_with_poll(timeout, DEFAULT_POLL_INTERVAL).await
    }

    /// Wait for the result, looking the result queue up every `poll_interval`.
    ///
    /// Returns `Ok(None)` when the queue does not appear in time or when
    /// the single receive that follows finds no message.
    pub async fn wait_with_poll(
        &mut self,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<Option<Value>> {
        if self.result_options.ignore_result {
            return Err(DispatchError::ResultIgnored(self.result_uuid));
        }
        if let Some(result) = &self.result {
            return Ok(Some(result.clone()));
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let name = self.result_queue_name();

        let queue = loop {
            if let Some(queue) = self.queues.get_queue(&name).await? {
                break queue;
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    debug!(result_uuid = %self.result_uuid, "No result queue before timeout");
                    return Ok(None);
                }
                Some(deadline) => poll_interval.min(deadline - now),
                None => poll_interval,
            };
            tokio::time::sleep(pause).await;
        };

        let longest = Duration::from_secs(MAX_WAIT_TIME_SECONDS);
        let wait_time = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(longest),
            None => longest,
        };

        let messages = match self.queues.receive(&queue, 1, wait_time).await {
            Ok(messages) => messages,
            Err(QueueError::QueueNotFound(_)) => {
                // Collected by another waiter
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(message) = messages.into_iter().next() else {
            debug!(result_uuid = %self.result_uuid, "Result queue exists but holds no message yet");
            return Ok(None);
        };

        match self.queues.delete_queue(&queue).await {
            Ok(()) => {}
            Err(QueueError::QueueNotFound(_)) => {
                warn!(result_uuid = %self.result_uuid, "Result queue already deleted");
            }
            Err(e) => return Err(e.into()),
        }

        let envelope = ResultEnvelope::decode(&message.body, &self.codec, &*self.resolver)?;
        debug!(result_uuid = %self.result_uuid, "Result collected");
        self.result = Some(envelope.result.clone());
        Ok(Some(envelope.result))
    }
}

impl std::fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("result_uuid", &self.result_uuid)
            .field("result_options", &self.result_options)
            .field("result", &self.result)
            .finish()
    }
}
