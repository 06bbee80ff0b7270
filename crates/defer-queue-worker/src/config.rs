use defer_queue_client::QueueConfig;
use defer_queue_core::MAX_WAIT_TIME_SECONDS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Tenant this worker serves
    pub database_name: String,
    /// Messages taken per receive
    pub prefetch_messages: usize,
    /// Long-poll wait of each receive
    pub wait_time_seconds: u64,
    /// Re-check cadence while the task queue does not exist
    pub queue_lookup_interval_secs: u64,
    pub queue: QueueConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            database_name: String::new(),
            prefetch_messages: 1,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            queue_lookup_interval_secs: 5,
            queue: QueueConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn for_database(database_name: impl Into<String>) -> Self {
        WorkerConfig {
            database_name: database_name.into(),
            ..Default::default()
        }
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds.min(MAX_WAIT_TIME_SECONDS))
    }

    pub fn queue_lookup_interval(&self) -> Duration {
        Duration::from_secs(self.queue_lookup_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::for_database("shop");
        assert_eq!(config.prefetch_messages, 1);
        assert_eq!(config.wait_time(), Duration::from_secs(20));
        assert_eq!(config.queue.naming().task_queue_name("shop"), "shop-trytond-async");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_name: shop\nprefetch_messages: 4\nwait_time_seconds: 60\nqueue:\n  address: \"10.0.0.5:9324\"\n  prefix: prod"
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database_name, "shop");
        assert_eq!(config.prefetch_messages, 4);
        // Long-poll is capped
        assert_eq!(config.wait_time(), Duration::from_secs(20));
        assert_eq!(config.queue_lookup_interval_secs, 5);
        assert_eq!(config.queue.address, "10.0.0.5:9324");
        assert_eq!(config.queue.naming().task_queue_name("shop"), "prod-shop-trytond-async");
    }

    #[test]
    fn test_missing_file() {
        assert!(WorkerConfig::from_file("/nonexistent/worker.yaml").is_err());
    }
}
