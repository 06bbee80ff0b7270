use crate::{
    auth::{Authenticator, Grant},
    config::BrokerConfig,
    metrics::BrokerMetrics,
    service::MemoryQueueService,
};
use dashmap::DashMap;
use defer_queue_core::{QueueError, QueueHandle, QueueService};
use defer_queue_protocol::{
    AckResponse, ErrorKind, Message, MessageCodec, NackResponse, QueueRef,
};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};
use tokio_util::codec::Framed;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Broker server: owner namespaces of in-memory queues behind the framed protocol
pub struct Broker {
    config: Arc<BrokerConfig>,
    namespaces: DashMap<String, Arc<MemoryQueueService>>,
    auth: Authenticator,
    metrics: Arc<BrokerMetrics>,
    connections: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let metrics = BrokerMetrics::new()?;
        let auth = Authenticator::new(&config.auth);
        if auth.is_enabled() {
            info!("Access-key authentication enabled ({} keys)", config.auth.access_keys.len());
        }

        Ok(Broker {
            connections: Arc::new(Semaphore::new(config.broker.max_connections.max(1))),
            config: Arc::new(config),
            namespaces: DashMap::new(),
            auth,
            metrics: Arc::new(metrics),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Queue service of an owner namespace, created on first use
    pub fn namespace(&self, owner: Option<&str>) -> Arc<MemoryQueueService> {
        let key = owner.unwrap_or_default().to_string();
        self.namespaces
            .entry(key.clone())
            .or_insert_with(|| {
                let limits = &self.config.queues;
                Arc::new(
                    MemoryQueueService::new()
                        .with_limits(
                            Duration::from_secs(limits.default_visibility_timeout_secs as u64),
                            limits.max_message_size,
                        )
                        .with_metrics(self.metrics.clone(), key),
                )
            })
            .clone()
    }

    /// Queue service of an owner namespace, if one was ever created
    pub fn existing_namespace(&self, owner: Option<&str>) -> Option<Arc<MemoryQueueService>> {
        self.namespaces
            .get(owner.unwrap_or_default())
            .map(|entry| entry.value().clone())
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Namespace a queue operation runs in. Only `CreateQueue` creates one.
    fn lookup(&self, queue: &QueueRef) -> Result<Arc<MemoryQueueService>, QueueError> {
        self.existing_namespace(queue.owner.as_deref())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name.clone()))
    }

    /// Start the broker server
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("Broker listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = match self.connections.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, refusing {}", addr);
                                    continue;
                                }
                            };

                            debug!("New connection from {}", addr);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                broker.metrics.connections.inc();
                                if let Err(e) = broker.handle_connection(stream).await {
                                    error!("Connection error: {}", e);
                                }
                                broker.metrics.connections.dec();
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Handle a client connection
    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, MessageCodec);
        let mut grant = if self.auth.is_enabled() {
            None
        } else {
            Some(Grant::AnyOwner)
        };

        while let Some(result) = framed.next().await {
            match result {
                Ok(Message::Authenticate(req)) => {
                    let response = match self.auth.authenticate(&req.access_key, &req.secret_key) {
                        Ok(granted) => {
                            grant = Some(granted);
                            Message::Ack(AckResponse::default())
                        }
                        Err(e) => {
                            grant = None;
                            Message::Nack(NackResponse::from(&e))
                        }
                    };
                    framed.send(response).await?;
                }
                Ok(message) => {
                    let response = self.handle_message(grant.as_ref(), message).await;
                    framed.send(response).await?;
                }
                Err(e) => {
                    error!("Protocol error: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a protocol request from a connection holding `grant`
    pub async fn handle_message(&self, grant: Option<&Grant>, message: Message) -> Message {
        let queue = match queue_of(&message) {
            Some(queue) => queue.clone(),
            None => {
                return Message::Nack(NackResponse::new(
                    ErrorKind::BadRequest,
                    "Unsupported message type",
                ))
            }
        };

        match grant {
            Some(grant) if grant.allows(queue.owner.as_deref()) => {}
            Some(_) => {
                let error = QueueError::Unauthorized(format!(
                    "access key may not use owner {:?}",
                    queue.owner
                ));
                return Message::Nack(NackResponse::from(&error));
            }
            None => {
                let error = QueueError::Unauthorized("connection not authenticated".to_string());
                return Message::Nack(NackResponse::from(&error));
            }
        }

        match self.dispatch(message).await {
            Ok(ack) => Message::Ack(ack),
            Err(e) => {
                debug!(queue = %queue.name, "Request failed: {}", e);
                Message::Nack(NackResponse::from(&e))
            }
        }
    }

    async fn dispatch(&self, message: Message) -> Result<AckResponse, QueueError> {
        match message {
            Message::CreateQueue(queue) => {
                let handle = self
                    .namespace(queue.owner.as_deref())
                    .create_queue(&queue.name)
                    .await?;
                Ok(AckResponse {
                    queue: Some(handle),
                    ..Default::default()
                })
            }
            Message::GetQueue(queue) => {
                let handle = match self.existing_namespace(queue.owner.as_deref()) {
                    Some(namespace) => namespace.get_queue(&queue.name).await?,
                    None => None,
                };
                Ok(AckResponse {
                    queue: handle,
                    ..Default::default()
                })
            }
            Message::DeleteQueue(queue) => {
                self.lookup(&queue)?
                    .delete_queue(&QueueHandle::new(queue.name))
                    .await?;
                Ok(AckResponse::default())
            }
            Message::SendMessage(req) => {
                self.lookup(&req.queue)?
                    .send(
                        &QueueHandle::new(req.queue.name),
                        req.body,
                        req.delay_seconds,
                        req.attributes,
                    )
                    .await?;
                Ok(AckResponse::default())
            }
            Message::ReceiveMessages(req) => {
                let messages = self
                    .lookup(&req.queue)?
                    .receive(
                        &QueueHandle::new(req.queue.name),
                        req.max_messages as usize,
                        Duration::from_millis(req.wait_time_ms),
                    )
                    .await?;
                Ok(AckResponse {
                    messages,
                    ..Default::default()
                })
            }
            Message::DeleteMessage(req) => {
                self.lookup(&req.queue)?
                    .delete_receipt(&QueueHandle::new(req.queue.name), &req.receipt)?;
                Ok(AckResponse::default())
            }
            Message::SetVisibilityTimeout(req) => {
                self.lookup(&req.queue)?
                    .set_visibility_timeout(&QueueHandle::new(req.queue.name), req.seconds)
                    .await?;
                Ok(AckResponse::default())
            }
            Message::Authenticate(_) | Message::Ack(_) | Message::Nack(_) => Err(
                QueueError::Protocol("not a queue request".to_string()),
            ),
        }
    }
}

fn queue_of(message: &Message) -> Option<&QueueRef> {
    match message {
        Message::CreateQueue(queue) | Message::GetQueue(queue) | Message::DeleteQueue(queue) => {
            Some(queue)
        }
        Message::SendMessage(req) => Some(&req.queue),
        Message::ReceiveMessages(req) => Some(&req.queue),
        Message::DeleteMessage(req) => Some(&req.queue),
        Message::SetVisibilityTimeout(req) => Some(&req.queue),
        Message::Authenticate(_) | Message::Ack(_) | Message::Nack(_) => None,
    }
}
