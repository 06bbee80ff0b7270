use crate::{DeferRequest, DispatchError, Dispatcher, PendingResult, Result};
use defer_queue_core::{EntityRef, Map, ResultOptions, Value};

/// A method that can run inline or be deferred to a worker.
///
/// `call`/`call_on` invoke the function directly. `defer` targets the
/// configured entity type and `defer_on` a bound record, so the call
/// site picks between the two instead of inspecting the receiver.
/// Result options are fixed when the task is declared and travel with
/// every deferred call.
pub struct AsyncTask<F> {
    entity_type: Option<String>,
    method_name: String,
    result_options: ResultOptions,
    func: F,
}

impl<F, R> AsyncTask<F>
where
    F: Fn(Option<&EntityRef>, &[Value], &Map) -> R,
{
    /// Task that is only ever bound to a record
    pub fn new(method_name: impl Into<String>, func: F) -> Self {
        AsyncTask {
            entity_type: None,
            method_name: method_name.into(),
            result_options: ResultOptions::default(),
            func,
        }
    }

    pub fn for_model(entity_type: impl Into<String>, method_name: impl Into<String>, func: F) -> Self {
        AsyncTask {
            entity_type: Some(entity_type.into()),
            method_name: method_name.into(),
            result_options: ResultOptions::default(),
            func,
        }
    }

    pub fn with_result_options(mut self, result_options: ResultOptions) -> Self {
        self.result_options = result_options;
        self
    }

    /// Publish results of deferred calls with the default visibility timeout
    pub fn keep_result(self) -> Self {
        self.with_result_options(ResultOptions::keep_result())
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn result_options(&self) -> ResultOptions {
        self.result_options
    }

    pub fn call(&self, args: &[Value], kwargs: &Map) -> R {
        (self.func)(None, args, kwargs)
    }

    pub fn call_on(&self, instance: &EntityRef, args: &[Value], kwargs: &Map) -> R {
        (self.func)(Some(instance), args, kwargs)
    }

    /// Deferred call on the configured entity type
    pub fn request(&self, args: Vec<Value>, kwargs: Map) -> Result<DeferRequest> {
        let entity_type = self.entity_type.as_ref().ok_or_else(|| {
            DispatchError::Configuration(format!(
                "task {} has no entity type and no instance",
                self.method_name
            ))
        })?;
        Ok(DeferRequest::model(entity_type.clone(), self.method_name.clone())
            .args(args)
            .kwargs(kwargs)
            .result_options(self.result_options))
    }

    /// Deferred call bound to `instance`
    pub fn request_on(&self, instance: EntityRef, args: Vec<Value>, kwargs: Map) -> DeferRequest {
        DeferRequest::instance(instance, self.method_name.clone())
            .args(args)
            .kwargs(kwargs)
            .result_options(self.result_options)
    }

    pub async fn defer(&self, dispatcher: &Dispatcher, args: Vec<Value>, kwargs: Map) -> Result<PendingResult> {
        let request = self.request(args, kwargs)?;
        dispatcher.defer(request).await
    }

    pub async fn defer_on(
        &self,
        dispatcher: &Dispatcher,
        instance: EntityRef,
        args: Vec<Value>,
        kwargs: Map,
    ) -> Result<PendingResult> {
        dispatcher.defer(self.request_on(instance, args, kwargs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greet(instance: Option<&EntityRef>, args: &[Value], _kwargs: &Map) -> String {
        let name = args.first().and_then(Value::as_str).unwrap_or("nobody");
        match instance {
            Some(instance) => format!("{} greets {}", instance, name),
            None => format!("hello {}", name),
        }
    }

    #[test]
    fn test_direct_calls() {
        let task = AsyncTask::for_model("party.party", "greet", greet);
        assert_eq!(task.call(&[Value::from("ann")], &Map::new()), "hello ann");

        let bound = task.call_on(&EntityRef::new("party.party", 3), &[Value::from("bob")], &Map::new());
        assert!(bound.ends_with("greets bob"));
    }

    #[test]
    fn test_request_needs_entity_type() {
        let task = AsyncTask::new("greet", greet);
        assert!(matches!(
            task.request(vec![], Map::new()),
            Err(DispatchError::Configuration(_))
        ));

        let request = task.request_on(EntityRef::new("party.party", 3), vec![Value::from("x")], Map::new());
        assert_eq!(request.call().entity_type, "party.party");
        assert_eq!(request.call().args.len(), 1);
    }

    #[test]
    fn test_result_options_fixed_at_declaration() {
        let task = AsyncTask::for_model("party.party", "greet", greet)
            .with_result_options(ResultOptions::new(false, 120));
        assert_eq!(task.result_options(), ResultOptions::new(false, 120));

        let request = task.request(vec![], Map::new()).unwrap();
        assert_eq!(request.options(), ResultOptions::new(false, 120));
        let bound = task.request_on(EntityRef::new("party.party", 3), vec![], Map::new());
        assert_eq!(bound.options(), ResultOptions::new(false, 120));

        let ignored = AsyncTask::new("greet", greet);
        assert_eq!(ignored.result_options(), ResultOptions::default());
    }
}
