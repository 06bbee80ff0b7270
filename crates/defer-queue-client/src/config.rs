use defer_queue_core::{QueueNaming, DEFAULT_QUEUE_NAME};
use serde::{Deserialize, Serialize};

/// Where queues live and how they are named. Shared by dispatchers and workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker endpoint, `host:port`
    pub address: String,
    pub prefix: Option<String>,
    pub queue_name: String,
    /// Owner namespace of the queues (default namespace when unset)
    pub owner: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            address: "127.0.0.1:9324".to_string(),
            prefix: None,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            owner: None,
            access_key: None,
            secret_key: None,
        }
    }
}

impl QueueConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn naming(&self) -> QueueNaming {
        let prefix = self.prefix.clone().filter(|prefix| !prefix.is_empty());
        QueueNaming::new(prefix, self.queue_name.clone())
    }

    /// Access key pair, when both halves are set
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => Some((access_key.clone(), secret_key.clone())),
            _ => None,
        }
    }
}
