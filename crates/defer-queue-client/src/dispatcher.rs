use crate::{
    DispatchError, ExecutionContext, PendingResult, QueueConfig, RemoteQueueService, Result,
};
use defer_queue_core::{
    validate_delay, Codec, EntityRef, EntityResolver, Invocation, Map, MessageAttributes,
    QueueNaming, QueueService, ResultOptions, TaskEnvelope, UncheckedResolver, Value,
};
use std::sync::Arc;
use tracing::{debug, info};

/// One call to be deferred, built at the call site.
///
/// [`DeferRequest::model`] targets a method on an entity type,
/// [`DeferRequest::instance`] a method bound to one record.
#[derive(Debug, Clone)]
pub struct DeferRequest {
    call: Invocation,
    delay_seconds: u32,
    attributes: Option<MessageAttributes>,
    result_options: Option<ResultOptions>,
}

impl DeferRequest {
    pub fn model(entity_type: impl Into<String>, method_name: impl Into<String>) -> Self {
        DeferRequest::from_call(Invocation::on_type(entity_type, method_name))
    }

    pub fn instance(instance: EntityRef, method_name: impl Into<String>) -> Self {
        DeferRequest::from_call(Invocation::on_instance(instance, method_name))
    }

    fn from_call(call: Invocation) -> Self {
        DeferRequest {
            call,
            delay_seconds: 0,
            attributes: None,
            result_options: None,
        }
    }

    /// Bind the call to a record. Its type replaces the entity type.
    pub fn bind(mut self, instance: EntityRef) -> Self {
        self.call.entity_type = instance.entity_type.clone();
        self.call.instance = Some(instance);
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.call.args = args;
        self
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.call.args.push(arg.into());
        self
    }

    pub fn kwargs(mut self, kwargs: Map) -> Self {
        self.call.kwargs = kwargs;
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.call.kwargs.insert(name.into(), value.into());
        self
    }

    /// Seconds before the task becomes visible, 0-900
    pub fn delay(mut self, seconds: u32) -> Self {
        self.delay_seconds = seconds;
        self
    }

    pub fn attributes(mut self, attributes: MessageAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(MessageAttributes::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn result_options(mut self, options: ResultOptions) -> Self {
        self.result_options = Some(options);
        self
    }

    /// Ask for the result with the default visibility timeout
    pub fn keep_result(self) -> Self {
        self.result_options(ResultOptions::keep_result())
    }

    pub fn call(&self) -> &Invocation {
        &self.call
    }

    /// Result options the envelope will carry
    pub fn options(&self) -> ResultOptions {
        self.result_options.unwrap_or_default()
    }
}

/// Sends task envelopes to the task queue of the bound tenant.
#[derive(Clone)]
pub struct Dispatcher {
    queues: Arc<dyn QueueService>,
    codec: Arc<Codec>,
    naming: QueueNaming,
    resolver: Arc<dyn EntityResolver + Send + Sync>,
    context: Option<ExecutionContext>,
}

impl Dispatcher {
    pub fn new(queues: Arc<dyn QueueService>, codec: Arc<Codec>) -> Self {
        Dispatcher {
            queues,
            codec,
            naming: QueueNaming::default(),
            resolver: Arc::new(UncheckedResolver),
            context: None,
        }
    }

    /// Dispatcher talking to the broker named by `config`
    pub fn from_config(config: &QueueConfig, codec: Arc<Codec>) -> Self {
        let queues = Arc::new(RemoteQueueService::from_config(config));
        Dispatcher::new(queues, codec).with_naming(config.naming())
    }

    pub fn with_naming(mut self, naming: QueueNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Resolver used when decoding entity references in results
    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver + Send + Sync>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Copy of this dispatcher bound to an execution context
    pub fn in_context(&self, context: ExecutionContext) -> Dispatcher {
        Dispatcher {
            context: Some(context),
            ..self.clone()
        }
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    pub fn naming(&self) -> &QueueNaming {
        &self.naming
    }

    pub fn queues(&self) -> Arc<dyn QueueService> {
        self.queues.clone()
    }

    /// Enqueue a call for a worker of the bound tenant.
    ///
    /// Nothing is sent unless the context is set, the delay is valid and
    /// the whole envelope encodes.
    pub async fn defer(&self, request: DeferRequest) -> Result<PendingResult> {
        let context = self.context.as_ref().ok_or(DispatchError::NoActiveContext)?;
        validate_delay(request.delay_seconds)
            .map_err(|_| DispatchError::InvalidDelay(request.delay_seconds))?;
        if request.call.instance.is_none() && request.call.entity_type.is_empty() {
            return Err(DispatchError::Configuration(format!(
                "no entity type or instance for method {}",
                request.call.method_name
            )));
        }

        let envelope = TaskEnvelope::new(
            context.header(),
            request.call,
            request.result_options.unwrap_or_default(),
        );
        let body = envelope.encode(&self.codec)?;

        let queue_name = self.naming.task_queue_name(&context.database_name);
        let queue = self.queues.create_or_get_queue(&queue_name).await?;
        self.queues
            .send(&queue, body, request.delay_seconds, request.attributes)
            .await?;

        info!(
            queue = %queue_name,
            result_uuid = %envelope.result_uuid,
            entity_type = %envelope.call.entity_type,
            method = %envelope.call.method_name,
            "Deferred task"
        );
        debug!(delay_seconds = request.delay_seconds, "Task envelope sent");

        Ok(PendingResult::new(
            envelope.result_uuid,
            envelope.result_options,
            self.queues.clone(),
            self.codec.clone(),
            self.resolver.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_overrides_entity_type() {
        let request = DeferRequest::model("party.party", "rename")
            .bind(EntityRef::new("party.address", 4))
            .arg("new name");

        assert_eq!(request.call().entity_type, "party.address");
        assert_eq!(request.call().instance, Some(EntityRef::new("party.address", 4)));
        assert_eq!(request.call().args, vec![Value::from("new name")]);
    }

    #[test]
    fn test_request_defaults() {
        let request = DeferRequest::model("party.party", "search")
            .kwarg("limit", 10)
            .attribute("origin", "test");

        assert_eq!(request.delay_seconds, 0);
        assert!(request.result_options.is_none());
        assert_eq!(request.call().kwargs.get("limit"), Some(&Value::Int(10)));
        assert_eq!(
            request.attributes.as_ref().and_then(|a| a.get("origin")).map(String::as_str),
            Some("test")
        );
    }
}
