use defer_queue_core::{MessageAttributes, QueueError, QueueHandle, ReceivedMessage};
use serde::{Deserialize, Serialize};

/// Message types for the broker protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Authenticate = 1,
    CreateQueue = 2,
    GetQueue = 3,
    DeleteQueue = 4,
    SendMessage = 5,
    ReceiveMessages = 6,
    DeleteMessage = 7,
    SetVisibilityTimeout = 8,
    Ack = 9,
    Nack = 10,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Authenticate),
            2 => Some(MessageType::CreateQueue),
            3 => Some(MessageType::GetQueue),
            4 => Some(MessageType::DeleteQueue),
            5 => Some(MessageType::SendMessage),
            6 => Some(MessageType::ReceiveMessages),
            7 => Some(MessageType::DeleteMessage),
            8 => Some(MessageType::SetVisibilityTimeout),
            9 => Some(MessageType::Ack),
            10 => Some(MessageType::Nack),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Present credentials for this connection
    Authenticate(AuthenticateRequest),

    /// Create a queue, or return the existing one
    CreateQueue(QueueRef),

    /// Look a queue up without creating it
    GetQueue(QueueRef),

    DeleteQueue(QueueRef),

    SendMessage(SendMessageRequest),

    /// Long-poll receive
    ReceiveMessages(ReceiveMessagesRequest),

    DeleteMessage(DeleteMessageRequest),

    SetVisibilityTimeout(SetVisibilityTimeoutRequest),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Authenticate(_) => MessageType::Authenticate,
            Message::CreateQueue(_) => MessageType::CreateQueue,
            Message::GetQueue(_) => MessageType::GetQueue,
            Message::DeleteQueue(_) => MessageType::DeleteQueue,
            Message::SendMessage(_) => MessageType::SendMessage,
            Message::ReceiveMessages(_) => MessageType::ReceiveMessages,
            Message::DeleteMessage(_) => MessageType::DeleteMessage,
            Message::SetVisibilityTimeout(_) => MessageType::SetVisibilityTimeout,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub access_key: String,
    pub secret_key: String,
}

/// A queue name inside an owner namespace (`None` is the default namespace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRef {
    pub owner: Option<String>,
    pub name: String,
}

impl QueueRef {
    pub fn new(owner: Option<String>, name: impl Into<String>) -> Self {
        QueueRef {
            owner,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub queue: QueueRef,
    pub body: String,
    pub delay_seconds: u32,
    pub attributes: Option<MessageAttributes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveMessagesRequest {
    pub queue: QueueRef,
    pub max_messages: u32,
    pub wait_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    pub queue: QueueRef,
    pub receipt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVisibilityTimeoutRequest {
    pub queue: QueueRef,
    pub seconds: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    /// Queue returned by CreateQueue/GetQueue (`None` when GetQueue finds nothing)
    pub queue: Option<QueueHandle>,
    /// Messages returned by ReceiveMessages
    pub messages: Vec<ReceivedMessage>,
}

/// Failure category carried by a Nack, so clients can rebuild the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    QueueNotFound,
    InvalidDelay(u32),
    UnknownReceipt(String),
    MessageTooLarge { max: usize, actual: usize },
    Unauthorized,
    BadRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackResponse {
    pub kind: ErrorKind,
    pub error: String,
}

impl NackResponse {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        NackResponse {
            kind,
            error: error.into(),
        }
    }
}

impl From<&QueueError> for NackResponse {
    fn from(error: &QueueError) -> Self {
        let kind = match error {
            QueueError::QueueNotFound(_) => ErrorKind::QueueNotFound,
            QueueError::InvalidDelay(seconds) => ErrorKind::InvalidDelay(*seconds),
            QueueError::UnknownReceipt(receipt) => ErrorKind::UnknownReceipt(receipt.clone()),
            QueueError::MessageTooLarge { max, actual } => ErrorKind::MessageTooLarge {
                max: *max,
                actual: *actual,
            },
            QueueError::Unauthorized(_) => ErrorKind::Unauthorized,
            QueueError::Connection(_) | QueueError::Protocol(_) => ErrorKind::BadRequest,
        };
        match error {
            QueueError::Unauthorized(reason) => NackResponse::new(kind, reason.clone()),
            other => NackResponse::new(kind, other.to_string()),
        }
    }
}

impl NackResponse {
    /// Rebuild a client-side error for a request on `queue`.
    pub fn into_queue_error(self, queue: &str) -> QueueError {
        match self.kind {
            ErrorKind::QueueNotFound => QueueError::QueueNotFound(queue.to_string()),
            ErrorKind::InvalidDelay(seconds) => QueueError::InvalidDelay(seconds),
            ErrorKind::UnknownReceipt(receipt) => QueueError::UnknownReceipt(receipt),
            ErrorKind::MessageTooLarge { max, actual } => QueueError::MessageTooLarge { max, actual },
            ErrorKind::Unauthorized => QueueError::Unauthorized(self.error),
            ErrorKind::BadRequest => QueueError::Protocol(self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Authenticate));
        assert_eq!(MessageType::from_u8(10), Some(MessageType::Nack));
        assert_eq!(MessageType::from_u8(99), None);

        assert_eq!(MessageType::ReceiveMessages.as_u8(), 6);
        assert_eq!(MessageType::Ack.as_u8(), 9);
    }

    #[test]
    fn test_nack_from_queue_error() {
        let nack = NackResponse::from(&QueueError::QueueNotFound("q".to_string()));
        assert_eq!(nack.kind, ErrorKind::QueueNotFound);

        match nack.into_queue_error("q") {
            QueueError::QueueNotFound(name) => assert_eq!(name, "q"),
            other => panic!("Expected QueueNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_nack_keeps_error_variant() {
        let errors = vec![
            QueueError::InvalidDelay(901),
            QueueError::UnknownReceipt("r-1".to_string()),
            QueueError::MessageTooLarge {
                max: 262_144,
                actual: 300_000,
            },
            QueueError::Unauthorized("bad secret".to_string()),
        ];

        for error in errors {
            let expected = error.to_string();
            let rebuilt = NackResponse::from(&error).into_queue_error("q");
            assert_eq!(rebuilt.to_string(), expected);
        }

        assert!(matches!(
            NackResponse::from(&QueueError::Connection("reset".to_string())).into_queue_error("q"),
            QueueError::Protocol(_)
        ));
    }
}
