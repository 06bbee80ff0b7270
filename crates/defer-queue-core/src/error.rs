use crate::codec::TypeTag;
use thiserror::Error;

/// Failure turning a value into its transport form. Nothing is sent when
/// this is raised.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Unsupported type: {0} is not registered with this codec")]
    UnsupportedType(TypeTag),

    #[error("Cannot encode non-finite float {0}")]
    NonFiniteFloat(f64),

    #[error("Map key '__class__' with value '{0}' is reserved for tagged values")]
    ReservedKey(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure turning a received body back into values.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed '{tag}' value: {reason}")]
    MalformedTag { tag: TypeTag, reason: String },

    #[error("Cannot resolve {entity_type}({id}): {reason}")]
    Unresolvable {
        entity_type: String,
        id: i64,
        reason: String,
    },

    #[error("Missing envelope field: {0}")]
    MissingField(&'static str),

    #[error("Invalid envelope field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors reported by a queue service implementation.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid delay: {0} seconds (expected 0-900)")]
    InvalidDelay(u32),

    #[error("Unknown receipt handle: {0}")]
    UnknownReceipt(String),

    #[error("Message too large: {actual} bytes (max {max})")]
    MessageTooLarge { max: usize, actual: usize },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors raised by the executor capability or its transaction boundary.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown method {entity_type}.{method_name}")]
    UnknownMethod {
        entity_type: String,
        method_name: String,
    },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Transaction is read-only")]
    ReadOnly,

    #[error("Execution failed: {0}")]
    Execution(String),
}
