use crate::service::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_VISIBILITY_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub queues: QueueDefaults,
    pub auth: AuthConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    pub default_visibility_timeout_secs: u32,
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub access_keys: Vec<AccessKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKeyConfig {
    pub access_key: String,
    /// bcrypt hash of the secret key
    pub secret_hash: String,
    /// Namespace this key may use; `None` allows any
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub prometheus_port: u16,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 9324,
            max_connections: 1000,
        }
    }
}

impl Default for QueueDefaults {
    fn default() -> Self {
        QueueDefaults {
            default_visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            prometheus_port: 9325,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }
}
