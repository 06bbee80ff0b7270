pub mod auth;
pub mod broker;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod service;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use service::MemoryQueueService;
