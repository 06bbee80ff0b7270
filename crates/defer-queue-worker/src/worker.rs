use crate::{config::WorkerConfig, executor::TaskExecutor, executor::TaskOutcome, Result};
use defer_queue_client::RemoteQueueService;
use defer_queue_core::{Codec, Host, QueueError, QueueHandle, QueueService, ReceivedMessage};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Listens on the task queue of one tenant and executes what arrives
pub struct Worker {
    config: WorkerConfig,
    executor: TaskExecutor,
    host: Arc<dyn Host>,
    queues: Arc<dyn QueueService>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        host: Arc<dyn Host>,
        queues: Arc<dyn QueueService>,
        codec: Arc<Codec>,
    ) -> Self {
        let executor = TaskExecutor::new(
            config.database_name.clone(),
            host.clone(),
            queues.clone(),
            codec,
        );

        Worker {
            config,
            executor,
            host,
            queues,
            shutdown: CancellationToken::new(),
        }
    }

    /// Worker talking to the broker named in `config.queue`
    pub fn from_config(config: WorkerConfig, host: Arc<dyn Host>, codec: Arc<Codec>) -> Self {
        let queues = Arc::new(RemoteQueueService::from_config(&config.queue));
        Self::new(config, host, queues, codec)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn task_queue_name(&self) -> String {
        self.config
            .queue
            .naming()
            .task_queue_name(&self.config.database_name)
    }

    /// Token cancelling [`Worker::listen`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn execute_message(&self, body: &str) -> Result<TaskOutcome> {
        self.executor.execute_message(body).await
    }

    /// Receive and execute task messages until shutdown.
    ///
    /// Every message handed to the executor is deleted afterwards,
    /// whatever the outcome. A message for another tenant stops the
    /// loop with [`WorkerError::TenantMismatch`](crate::WorkerError)
    /// and stays on the queue.
    pub async fn listen(&self) -> Result<()> {
        self.host.init_registry(&self.config.database_name).await?;
        info!(
            database = %self.config.database_name,
            queue = %self.task_queue_name(),
            prefetch = self.config.prefetch_messages,
            "Worker listening"
        );

        let mut queue = match self.wait_for_queue().await {
            Some(queue) => queue,
            None => return Ok(()),
        };

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.receive(&queue) => received,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    // A zero wait time returns without suspending
                    tokio::task::yield_now().await;
                }
                Ok(messages) => {
                    debug!(queue = %queue.name, count = messages.len(), "Receive cycle");
                    self.handle_messages(&queue, messages).await?;
                }
                Err(QueueError::QueueNotFound(_)) => {
                    warn!(queue = %queue.name, "Task queue disappeared");
                    queue = match self.wait_for_queue().await {
                        Some(queue) => queue,
                        None => break,
                    };
                }
                Err(e) => {
                    error!(queue = %queue.name, "Receive failed: {}", e);
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }

        info!(database = %self.config.database_name, "Worker stopped");
        Ok(())
    }

    /// One receive cycle on the task queue. Returns how many messages
    /// were handled; zero when the queue does not exist.
    pub async fn run_once(&self) -> Result<usize> {
        let queue = match self.queues.get_queue(&self.task_queue_name()).await? {
            Some(queue) => queue,
            None => return Ok(0),
        };
        let messages = self.receive(&queue).await?;
        self.handle_messages(&queue, messages).await
    }

    async fn receive(&self, queue: &QueueHandle) -> std::result::Result<Vec<ReceivedMessage>, QueueError> {
        self.queues
            .receive(queue, self.config.prefetch_messages.max(1), self.config.wait_time())
            .await
    }

    async fn handle_messages(&self, queue: &QueueHandle, messages: Vec<ReceivedMessage>) -> Result<usize> {
        let mut handled = 0;
        for message in messages {
            let outcome = self.executor.execute_message(&message.body).await?;
            debug!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                completed = outcome.is_completed(),
                "Task message handled"
            );

            if let Err(e) = self.queues.delete(queue, &message).await {
                warn!(message_id = %message.message_id, "Failed to delete task message: {}", e);
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Look the task queue up until it exists. `None` on shutdown.
    async fn wait_for_queue(&self) -> Option<QueueHandle> {
        let name = self.task_queue_name();
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }

            match self.queues.get_queue(&name).await {
                Ok(Some(queue)) => return Some(queue),
                Ok(None) => debug!(queue = %name, "Task queue not created yet"),
                Err(e) => error!(queue = %name, "Queue lookup failed: {}", e),
            }

            if !self.pause().await {
                return None;
            }
        }
    }

    /// Sleep one lookup interval. `false` when shutdown interrupted it.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.queue_lookup_interval()) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryHost, ModelRegistry};
    use defer_queue_broker::MemoryQueueService;
    use std::time::Duration;

    fn worker(queues: Arc<MemoryQueueService>) -> Worker {
        let registry = ModelRegistry::new();
        registry.declare("party.party");
        let host = Arc::new(MemoryHost::new(registry).with_database("shop"));
        let config = WorkerConfig {
            wait_time_seconds: 0,
            queue_lookup_interval_secs: 1,
            ..WorkerConfig::for_database("shop")
        };
        Worker::new(config, host, queues, Arc::new(Codec::standard()))
    }

    #[tokio::test]
    async fn test_run_once_without_queue() {
        let worker = worker(Arc::new(MemoryQueueService::new()));
        assert_eq!(worker.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_listen() {
        let worker = worker(Arc::new(MemoryQueueService::new()));
        worker.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), worker.listen()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_listen_requires_known_database() {
        let queues = Arc::new(MemoryQueueService::new());
        let host = Arc::new(MemoryHost::new(ModelRegistry::new()));
        let worker = Worker::new(
            WorkerConfig::for_database("missing"),
            host,
            queues,
            Arc::new(Codec::standard()),
        );

        assert!(matches!(
            worker.listen().await,
            Err(crate::WorkerError::Host(_))
        ));
    }
}
