use crate::DEFAULT_QUEUE_NAME;
use uuid::Uuid;

/// Derives queue names for tenants and result channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNaming {
    prefix: Option<String>,
    base_name: String,
}

impl QueueNaming {
    pub fn new(prefix: Option<String>, base_name: impl Into<String>) -> Self {
        QueueNaming {
            prefix,
            base_name: base_name.into(),
        }
    }

    /// Task queue of a tenant: `[prefix-]<database>-<base name>`, empty parts skipped.
    pub fn task_queue_name(&self, database_name: &str) -> String {
        let tenant = database_name.replace(':', "");
        [self.prefix.as_deref().unwrap_or(""), &tenant, &self.base_name]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Result queues are named after the task's result uuid.
    pub fn result_queue_name(result_uuid: &Uuid) -> String {
        result_uuid.to_string()
    }
}

impl Default for QueueNaming {
    fn default() -> Self {
        QueueNaming::new(None, DEFAULT_QUEUE_NAME)
    }
}
