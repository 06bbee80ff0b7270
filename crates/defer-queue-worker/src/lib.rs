pub mod config;
pub mod executor;
pub mod handler;
pub mod memory;
pub mod worker;

pub use config::WorkerConfig;
pub use executor::{TaskExecutor, TaskOutcome};
pub use handler::{MethodHandler, MethodResult, ModelRegistry};
pub use memory::{MemoryHost, Session};
pub use worker::Worker;

use defer_queue_core::{DecodeError, EncodeError, HostError, QueueError};
use thiserror::Error;

/// Worker errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Task addressed to database {found}, worker serves {expected}")]
    TenantMismatch { expected: String, found: String },

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
