mod codec;
mod envelope;
mod error;
mod host;
mod naming;
mod queue;
mod value;

pub use codec::{Codec, EntityResolver, TypeTag, UncheckedResolver, CLASS_KEY};
pub use envelope::{
    EnvelopeHeader, Invocation, ResultEnvelope, ResultOptions, TaskEnvelope,
    DEFAULT_VISIBILITY_TIMEOUT,
};
pub use error::{DecodeError, EncodeError, HostError, QueueError};
pub use host::{Host, Transaction, TransactionScope};
pub use naming::QueueNaming;
pub use queue::{validate_delay, MessageAttributes, QueueHandle, QueueService, ReceivedMessage};
pub use value::{EntityRef, Map, UserId, Value};

/// Base name of the task queue when none is configured
pub const DEFAULT_QUEUE_NAME: &str = "trytond-async";

/// Longest delay a message can be sent with
pub const MAX_DELAY_SECONDS: u32 = 900;

/// Upper bound of a single long-poll receive
pub const MAX_WAIT_TIME_SECONDS: u64 = 20;
