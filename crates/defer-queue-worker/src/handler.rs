use crate::memory::Session;
use async_trait::async_trait;
use defer_queue_core::{HostError, Invocation, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Result type for method handlers
pub type MethodResult = Result<Value, HostError>;

/// A custom method of an entity type
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Run the method inside the caller's transaction
    async fn call(&self, session: &mut Session<'_>, call: &Invocation) -> MethodResult;
}

/// Adapter for plain functions and closures
struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(&mut Session<'_>, &Invocation) -> MethodResult + Send + Sync,
{
    async fn call(&self, session: &mut Session<'_>, call: &Invocation) -> MethodResult {
        (self.0)(session, call)
    }
}

/// Declared entity types and their custom methods
pub struct ModelRegistry {
    models: RwLock<HashMap<String, HashMap<String, Arc<dyn MethodHandler>>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Declare an entity type. Built-in methods become callable on it.
    pub fn declare(&self, entity_type: impl Into<String>) {
        self.models.write().entry(entity_type.into()).or_default();
    }

    /// Register a custom method, declaring its entity type if needed
    pub fn register<H: MethodHandler + 'static>(
        &self,
        entity_type: impl Into<String>,
        method_name: impl Into<String>,
        handler: H,
    ) {
        let mut models = self.models.write();
        models
            .entry(entity_type.into())
            .or_default()
            .insert(method_name.into(), Arc::new(handler));
    }

    pub fn register_fn<F>(&self, entity_type: impl Into<String>, method_name: impl Into<String>, func: F)
    where
        F: Fn(&mut Session<'_>, &Invocation) -> MethodResult + Send + Sync + 'static,
    {
        self.register(entity_type, method_name, FnHandler(func));
    }

    /// Custom handler for a method
    pub fn get(&self, entity_type: &str, method_name: &str) -> Option<Arc<dyn MethodHandler>> {
        let models = self.models.read();
        models.get(entity_type)?.get(method_name).cloned()
    }

    pub fn has_model(&self, entity_type: &str) -> bool {
        self.models.read().contains_key(entity_type)
    }

    /// All declared entity types, sorted
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.models.read().keys().cloned().collect();
        models.sort();
        models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
