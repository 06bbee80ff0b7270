use defer_queue_core::{EnvelopeHeader, Map, UserId, Value};

/// Tenant, user and context a dispatcher defers on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub database_name: String,
    pub user: UserId,
    pub context: Map,
}

impl ExecutionContext {
    pub fn new(database_name: impl Into<String>, user: UserId) -> Self {
        ExecutionContext {
            database_name: database_name.into(),
            user,
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Map) -> Self {
        self.context = context;
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            database_name: self.database_name.clone(),
            user: self.user,
            context: self.context.clone(),
        }
    }
}
