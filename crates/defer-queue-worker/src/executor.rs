use crate::{Result, WorkerError};
use defer_queue_core::{
    Codec, Host, QueueService, ResultEnvelope, TaskEnvelope, Transaction, TransactionScope, Value,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What became of one task message
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        result_uuid: Uuid,
        value: Value,
        /// Whether the value went to the result queue
        published: bool,
    },
    /// Rolled back; nothing published
    Failed { error: String },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}

/// Runs task envelopes for one tenant against a [`Host`]
pub struct TaskExecutor {
    database_name: String,
    host: Arc<dyn Host>,
    queues: Arc<dyn QueueService>,
    codec: Arc<Codec>,
}

impl TaskExecutor {
    pub fn new(
        database_name: impl Into<String>,
        host: Arc<dyn Host>,
        queues: Arc<dyn QueueService>,
        codec: Arc<Codec>,
    ) -> Self {
        TaskExecutor {
            database_name: database_name.into(),
            host,
            queues,
            codec,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Execute one task message body.
    ///
    /// Only a message addressed to another tenant is an error; every
    /// other failure is rolled back, logged and reported as
    /// [`TaskOutcome::Failed`].
    pub async fn execute_message(&self, body: &str) -> Result<TaskOutcome> {
        let header = {
            let readonly = match self.host.begin(TransactionScope::readonly(&self.database_name)).await {
                Ok(transaction) => transaction,
                Err(e) => return Ok(self.failed(None, e.into())),
            };
            let header = TaskEnvelope::decode_header(body, &self.codec, &readonly);
            if let Err(e) = readonly.rollback().await {
                warn!("Failed to close read-only transaction: {}", e);
            }
            match header {
                Ok(header) => header,
                Err(e) => return Ok(self.failed(None, e.into())),
            }
        };

        if header.database_name != self.database_name {
            error!(
                expected = %self.database_name,
                found = %header.database_name,
                "Task message for another database"
            );
            return Err(WorkerError::TenantMismatch {
                expected: self.database_name.clone(),
                found: header.database_name,
            });
        }

        let mut transaction = match self.host.begin(TransactionScope::for_header(&header)).await {
            Ok(transaction) => transaction,
            Err(e) => return Ok(self.failed(None, e.into())),
        };

        // Entity references resolve inside the user's transaction
        let envelope = match TaskEnvelope::decode(body, &self.codec, &transaction) {
            Ok(envelope) => envelope,
            Err(e) => {
                rollback(transaction).await;
                return Ok(self.failed(None, e.into()));
            }
        };
        let result_uuid = envelope.result_uuid;

        match self.run(&mut transaction, &envelope).await {
            Ok((value, published)) => {
                if let Err(e) = transaction.commit().await {
                    if published {
                        self.retract(&envelope).await;
                    }
                    return Ok(self.failed(Some(result_uuid), e.into()));
                }
                info!(
                    result_uuid = %result_uuid,
                    entity_type = %envelope.call.entity_type,
                    method = %envelope.call.method_name,
                    "Task completed"
                );
                Ok(TaskOutcome::Completed {
                    result_uuid,
                    value,
                    published,
                })
            }
            Err(e) => {
                rollback(transaction).await;
                Ok(self.failed(Some(result_uuid), e))
            }
        }
    }

    /// Execute the call and publish its result before the caller commits.
    async fn run(
        &self,
        transaction: &mut Box<dyn Transaction>,
        envelope: &TaskEnvelope,
    ) -> Result<(Value, bool)> {
        debug!(
            result_uuid = %envelope.result_uuid,
            entity_type = %envelope.call.entity_type,
            method = %envelope.call.method_name,
            instance = ?envelope.call.instance,
            "Executing task"
        );
        let value = transaction.execute(&envelope.call).await?;

        let published = !envelope.result_options.ignore_result;
        if published {
            self.publish(envelope, &value).await?;
        }
        Ok((value, published))
    }

    async fn publish(&self, envelope: &TaskEnvelope, value: &Value) -> Result<()> {
        let body = ResultEnvelope::new(value.clone()).encode(&self.codec)?;
        let queue = self
            .queues
            .create_or_get_queue(&envelope.result_queue_name())
            .await?;
        self.queues
            .set_visibility_timeout(&queue, envelope.result_options.visibility_timeout)
            .await?;
        self.queues.send(&queue, body, 0, None).await?;
        debug!(result_uuid = %envelope.result_uuid, "Result published");
        Ok(())
    }

    /// Drop a published result whose transaction did not commit
    async fn retract(&self, envelope: &TaskEnvelope) {
        let name = envelope.result_queue_name();
        let removed = match self.queues.get_queue(&name).await {
            Ok(Some(queue)) => self.queues.delete_queue(&queue).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => debug!(result_uuid = %envelope.result_uuid, "Result retracted"),
            Err(e) => error!(
                result_uuid = %envelope.result_uuid,
                "Failed to retract result of uncommitted task: {}", e
            ),
        }
    }

    fn failed(&self, result_uuid: Option<Uuid>, e: WorkerError) -> TaskOutcome {
        match result_uuid {
            Some(result_uuid) => error!(result_uuid = %result_uuid, "Task failed: {}", e),
            None => error!(database = %self.database_name, "Task failed: {}", e),
        }
        TaskOutcome::Failed {
            error: e.to_string(),
        }
    }
}

async fn rollback(transaction: Box<dyn Transaction>) {
    if let Err(e) = transaction.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
