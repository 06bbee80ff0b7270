use async_trait::async_trait;
use defer_queue_broker::MemoryQueueService;
use defer_queue_client::{AsyncTask, DeferRequest, DispatchError, Dispatcher, ExecutionContext};
use defer_queue_core::{
    Codec, MessageAttributes, QueueError, QueueHandle, QueueService, ReceivedMessage,
    EntityRef, Map, ResultEnvelope, ResultOptions, TaskEnvelope, UncheckedResolver, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts every queue call made through it
struct CountingQueues {
    inner: MemoryQueueService,
    calls: AtomicUsize,
}

impl CountingQueues {
    fn new() -> Self {
        CountingQueues {
            inner: MemoryQueueService::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueService for CountingQueues {
    async fn get_queue(&self, name: &str) -> Result<Option<QueueHandle>, QueueError> {
        self.tick();
        self.inner.get_queue(name).await
    }

    async fn create_queue(&self, name: &str) -> Result<QueueHandle, QueueError> {
        self.tick();
        self.inner.create_queue(name).await
    }

    async fn send(
        &self,
        queue: &QueueHandle,
        body: String,
        delay_seconds: u32,
        attributes: Option<MessageAttributes>,
    ) -> Result<(), QueueError> {
        self.tick();
        self.inner.send(queue, body, delay_seconds, attributes).await
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.tick();
        self.inner.receive(queue, max_messages, wait_time).await
    }

    async fn delete(&self, queue: &QueueHandle, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.tick();
        self.inner.delete(queue, message).await
    }

    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.tick();
        self.inner.delete_queue(queue).await
    }

    async fn set_visibility_timeout(&self, queue: &QueueHandle, seconds: u32) -> Result<(), QueueError> {
        self.tick();
        self.inner.set_visibility_timeout(queue, seconds).await
    }
}

fn setup() -> (Arc<CountingQueues>, Dispatcher) {
    let queues = Arc::new(CountingQueues::new());
    let dispatcher = Dispatcher::new(queues.clone(), Arc::new(Codec::standard()))
        .in_context(ExecutionContext::new("shop", 1).set("language", "en"));
    (queues, dispatcher)
}

async fn task_queue(queues: &CountingQueues) -> QueueHandle {
    queues
        .get_queue("shop-trytond-async")
        .await
        .unwrap()
        .expect("task queue exists")
}

async fn publish_result(queues: &CountingQueues, name: &str, value: Value) {
    let queue = queues.create_or_get_queue(name).await.unwrap();
    let body = ResultEnvelope::new(value).encode(&Codec::standard()).unwrap();
    queues.send(&queue, body, 0, None).await.unwrap();
}

#[tokio::test]
async fn test_defer_without_context_fails() {
    let queues = Arc::new(MemoryQueueService::new());
    let dispatcher = Dispatcher::new(queues.clone(), Arc::new(Codec::standard()));

    let result = dispatcher
        .defer(DeferRequest::model("party.party", "search"))
        .await;
    assert!(matches!(result, Err(DispatchError::NoActiveContext)));
    assert!(queues.queue_names().is_empty());
}

#[tokio::test]
async fn test_defer_sends_full_envelope() {
    let (queues, dispatcher) = setup();

    let pending = dispatcher
        .defer(
            DeferRequest::model("party.party", "search")
                .arg(Value::List(vec![]))
                .kwarg("limit", 10)
                .attribute("origin", "test"),
        )
        .await
        .unwrap();

    let queue = task_queue(&queues).await;
    let messages = queues
        .receive(&queue, 10, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].attributes.get("origin").map(String::as_str),
        Some("test")
    );

    let envelope =
        TaskEnvelope::decode(&messages[0].body, &Codec::standard(), &UncheckedResolver).unwrap();
    assert_eq!(envelope.database_name, "shop");
    assert_eq!(envelope.user, 1);
    assert_eq!(envelope.context.get("language"), Some(&Value::from("en")));
    assert_eq!(envelope.call.method_name, "search");
    assert_eq!(envelope.call.kwargs.get("limit"), Some(&Value::Int(10)));
    assert_eq!(envelope.result_uuid, pending.result_uuid());
    assert_eq!(envelope.result_options, ResultOptions::default());
}

#[tokio::test]
async fn test_invalid_delay_sends_nothing() {
    let (queues, dispatcher) = setup();

    let result = dispatcher
        .defer(DeferRequest::model("party.party", "search").delay(901))
        .await;
    assert!(matches!(result, Err(DispatchError::InvalidDelay(901))));
    assert_eq!(queues.calls(), 0);
}

#[tokio::test]
async fn test_unencodable_value_sends_nothing() {
    let queues = Arc::new(CountingQueues::new());
    let dispatcher = Dispatcher::new(queues.clone(), Arc::new(Codec::new()))
        .in_context(ExecutionContext::new("shop", 1));

    let result = dispatcher
        .defer(DeferRequest::model("party.party", "write").arg(Value::Bytes(vec![1, 2])))
        .await;
    assert!(matches!(result, Err(DispatchError::Encode(_))));
    assert_eq!(queues.calls(), 0);
}

#[tokio::test]
async fn test_missing_receiver_is_configuration_error() {
    let (queues, dispatcher) = setup();

    let result = dispatcher.defer(DeferRequest::model("", "search")).await;
    assert!(matches!(result, Err(DispatchError::Configuration(_))));
    assert_eq!(queues.calls(), 0);
}

#[tokio::test]
async fn test_sequential_defers_get_distinct_uuids() {
    let (queues, dispatcher) = setup();

    let first = dispatcher
        .defer(DeferRequest::model("party.party", "search").keep_result())
        .await
        .unwrap();
    let second = dispatcher
        .defer(DeferRequest::model("party.party", "search").keep_result())
        .await
        .unwrap();

    assert_ne!(first.result_uuid(), second.result_uuid());
    assert_ne!(first.result_queue_name(), second.result_queue_name());
    assert_eq!(queues.inner.queue("shop-trytond-async").unwrap().len(), 2);
}

#[tokio::test]
async fn test_wait_on_ignored_result_fails_immediately() {
    let (queues, dispatcher) = setup();
    let mut pending = dispatcher
        .defer(DeferRequest::model("party.party", "search"))
        .await
        .unwrap();

    let calls = queues.calls();
    let result = pending.wait(None).await;
    assert!(matches!(result, Err(DispatchError::ResultIgnored(_))));
    assert_eq!(queues.calls(), calls);
}

#[tokio::test]
async fn test_wait_times_out_without_result_queue() {
    let (_queues, dispatcher) = setup();
    let mut pending = dispatcher
        .defer(DeferRequest::model("party.party", "search").keep_result())
        .await
        .unwrap();

    let result = pending
        .wait_with_poll(Some(Duration::from_millis(100)), Duration::from_millis(20))
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(pending.cached().is_none());
}

#[tokio::test]
async fn test_wait_collects_deletes_and_caches() {
    let (queues, dispatcher) = setup();
    let mut pending = dispatcher
        .defer(DeferRequest::model("party.party", "search").keep_result())
        .await
        .unwrap();

    let result_queue = pending.result_queue_name();
    publish_result(&queues, &result_queue, Value::List(vec![Value::Int(1), Value::Int(2)])).await;

    let value = pending
        .wait(Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .expect("result available");
    assert_eq!(value, Value::List(vec![Value::Int(1), Value::Int(2)]));
    assert!(queues.get_queue(&result_queue).await.unwrap().is_none());

    let calls = queues.calls();
    let again = pending.wait(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(again, Some(value));
    assert_eq!(queues.calls(), calls);
}

#[tokio::test]
async fn test_wait_polls_until_queue_appears() {
    let (queues, dispatcher) = setup();
    let mut pending = dispatcher
        .defer(DeferRequest::model("party.party", "search").keep_result())
        .await
        .unwrap();

    let result_queue = pending.result_queue_name();
    let publisher = {
        let queues = queues.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            publish_result(&queues, &result_queue, Value::from("done")).await;
        })
    };

    let value = pending
        .wait_with_poll(Some(Duration::from_secs(5)), Duration::from_millis(25))
        .await
        .unwrap();
    publisher.await.unwrap();
    assert_eq!(value, Some(Value::from("done")));
}

#[tokio::test]
async fn test_wait_on_empty_result_queue_returns_none() {
    let (queues, dispatcher) = setup();
    let mut pending = dispatcher
        .defer(DeferRequest::model("party.party", "search").keep_result())
        .await
        .unwrap();
    queues
        .create_queue(&pending.result_queue_name())
        .await
        .unwrap();

    let result = pending
        .wait_with_poll(Some(Duration::from_millis(100)), Duration::from_millis(20))
        .await
        .unwrap();
    assert!(result.is_none());
    // Queue is kept so a later wait can still collect
    assert!(queues
        .get_queue(&pending.result_queue_name())
        .await
        .unwrap()
        .is_some());
}

fn count_parties(_instance: Option<&EntityRef>, _args: &[Value], _kwargs: &Map) -> Value {
    Value::Int(0)
}

#[tokio::test]
async fn test_async_task_with_kept_result_is_collectable() {
    let (queues, dispatcher) = setup();
    let task = AsyncTask::for_model("party.party", "search_count", count_parties).keep_result();

    let mut pending = task
        .defer(&dispatcher, vec![Value::List(vec![])], Map::new())
        .await
        .unwrap();
    assert_eq!(pending.result_options(), ResultOptions::keep_result());

    let queue = task_queue(&queues).await;
    let messages = queues
        .receive(&queue, 1, Duration::from_millis(10))
        .await
        .unwrap();
    let envelope =
        TaskEnvelope::decode(&messages[0].body, &Codec::standard(), &UncheckedResolver).unwrap();
    assert!(!envelope.result_options.ignore_result);

    publish_result(&queues, &pending.result_queue_name(), Value::Int(3)).await;
    let value = pending.wait(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(value, Some(Value::Int(3)));
}

#[tokio::test]
async fn test_async_task_defaults_to_ignored_result() {
    let (_queues, dispatcher) = setup();
    let task = AsyncTask::for_model("party.party", "search_count", count_parties);

    let mut pending = task.defer(&dispatcher, vec![], Map::new()).await.unwrap();
    assert!(matches!(
        pending.wait(None).await,
        Err(DispatchError::ResultIgnored(_))
    ));
}
