mod config;
mod context;
mod dispatcher;
mod pending;
mod remote;
mod task;

pub use config::QueueConfig;
pub use context::ExecutionContext;
pub use dispatcher::{DeferRequest, Dispatcher};
pub use pending::{PendingResult, DEFAULT_POLL_INTERVAL};
pub use remote::RemoteQueueService;
pub use task::AsyncTask;

use defer_queue_core::{DecodeError, EncodeError, QueueError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No active execution context")]
    NoActiveContext,

    #[error("Invalid delay: {0} seconds (expected 0-900)")]
    InvalidDelay(u32),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Result of task {0} is ignored")]
    ResultIgnored(Uuid),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
