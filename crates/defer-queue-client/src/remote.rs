use crate::QueueConfig;
use async_trait::async_trait;
use defer_queue_core::{MessageAttributes, QueueError, QueueHandle, QueueService, ReceivedMessage};
use defer_queue_protocol::{
    AckResponse, AuthenticateRequest, DeleteMessageRequest, Message, MessageCodec, QueueRef,
    ReceiveMessagesRequest, SendMessageRequest, SetVisibilityTimeoutRequest,
};

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Queue service reached over the broker protocol.
///
/// Every call opens its own connection, authenticating first when
/// credentials are configured.
pub struct RemoteQueueService {
    address: String,
    owner: Option<String>,
    credentials: Option<(String, String)>,
}

impl RemoteQueueService {
    pub fn new(address: impl Into<String>) -> Self {
        RemoteQueueService {
            address: address.into(),
            owner: None,
            credentials: None,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        RemoteQueueService {
            address: config.address.clone(),
            owner: config.owner.clone(),
            credentials: config.credentials(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.credentials = Some((access_key.into(), secret_key.into()));
        self
    }

    fn queue_ref(&self, name: &str) -> QueueRef {
        QueueRef::new(self.owner.clone(), name)
    }

    async fn connect(&self) -> Result<Framed<TcpStream, MessageCodec>, QueueError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let mut framed = Framed::new(stream, MessageCodec);

        if let Some((access_key, secret_key)) = &self.credentials {
            let message = Message::Authenticate(AuthenticateRequest {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            });
            match exchange(&mut framed, message).await? {
                Message::Ack(_) => {}
                Message::Nack(nack) => return Err(nack.into_queue_error("")),
                _ => return Err(QueueError::Protocol("Unexpected response".to_string())),
            }
        }

        Ok(framed)
    }

    /// Send one request about `queue` and wait for its acknowledgment
    async fn request(&self, queue: &str, message: Message) -> Result<AckResponse, QueueError> {
        let mut framed = self.connect().await?;
        match exchange(&mut framed, message).await? {
            Message::Ack(ack) => Ok(ack),
            Message::Nack(nack) => Err(nack.into_queue_error(queue)),
            _ => Err(QueueError::Protocol("Unexpected response".to_string())),
        }
    }
}

async fn exchange(
    framed: &mut Framed<TcpStream, MessageCodec>,
    message: Message,
) -> Result<Message, QueueError> {
    framed
        .send(message)
        .await
        .map_err(|e| QueueError::Protocol(e.to_string()))?;

    match framed.next().await {
        Some(Ok(response)) => Ok(response),
        Some(Err(e)) => Err(QueueError::Protocol(e.to_string())),
        None => Err(QueueError::Connection("Connection closed".to_string())),
    }
}

#[async_trait]
impl QueueService for RemoteQueueService {
    async fn get_queue(&self, name: &str) -> Result<Option<QueueHandle>, QueueError> {
        let ack = self
            .request(name, Message::GetQueue(self.queue_ref(name)))
            .await?;
        Ok(ack.queue)
    }

    async fn create_queue(&self, name: &str) -> Result<QueueHandle, QueueError> {
        let ack = self
            .request(name, Message::CreateQueue(self.queue_ref(name)))
            .await?;
        ack.queue
            .ok_or_else(|| QueueError::Protocol(format!("broker did not return queue {}", name)))
    }

    async fn send(
        &self,
        queue: &QueueHandle,
        body: String,
        delay_seconds: u32,
        attributes: Option<MessageAttributes>,
    ) -> Result<(), QueueError> {
        let message = Message::SendMessage(SendMessageRequest {
            queue: self.queue_ref(&queue.name),
            body,
            delay_seconds,
            attributes,
        });
        self.request(&queue.name, message).await?;
        debug!(queue = %queue.name, delay_seconds, "Message sent to broker");
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let message = Message::ReceiveMessages(ReceiveMessagesRequest {
            queue: self.queue_ref(&queue.name),
            max_messages: u32::try_from(max_messages).unwrap_or(u32::MAX),
            wait_time_ms: u64::try_from(wait_time.as_millis()).unwrap_or(u64::MAX),
        });
        let ack = self.request(&queue.name, message).await?;
        Ok(ack.messages)
    }

    async fn delete(&self, queue: &QueueHandle, message: &ReceivedMessage) -> Result<(), QueueError> {
        let request = Message::DeleteMessage(DeleteMessageRequest {
            queue: self.queue_ref(&queue.name),
            receipt: message.receipt.clone(),
        });
        self.request(&queue.name, request).await?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.request(&queue.name, Message::DeleteQueue(self.queue_ref(&queue.name)))
            .await?;
        Ok(())
    }

    async fn set_visibility_timeout(&self, queue: &QueueHandle, seconds: u32) -> Result<(), QueueError> {
        let message = Message::SetVisibilityTimeout(SetVisibilityTimeoutRequest {
            queue: self.queue_ref(&queue.name),
            seconds,
        });
        self.request(&queue.name, message).await?;
        Ok(())
    }
}
