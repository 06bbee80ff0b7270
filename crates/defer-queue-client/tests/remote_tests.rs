use defer_queue_broker::config::{AccessKeyConfig, AuthConfig};
use defer_queue_broker::{Broker, BrokerConfig};
use defer_queue_client::{
    DeferRequest, DispatchError, Dispatcher, ExecutionContext, QueueConfig, RemoteQueueService,
};
use defer_queue_core::{
    Codec, MessageAttributes, QueueError, QueueService, ReceivedMessage, ResultEnvelope, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_broker(config: BrokerConfig) -> (Arc<Broker>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let broker = Arc::new(Broker::new(config).unwrap());

    let server = broker.clone();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (broker, address)
}

fn auth_config() -> BrokerConfig {
    BrokerConfig {
        auth: AuthConfig {
            enabled: true,
            access_keys: vec![AccessKeyConfig {
                access_key: "AK".to_string(),
                secret_hash: bcrypt::hash("secret", 4).unwrap(),
                owner: Some("acct".to_string()),
            }],
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_remote_queue_operations() {
    let (broker, address) = start_broker(BrokerConfig::default()).await;
    let remote = RemoteQueueService::new(address);

    assert!(remote.get_queue("jobs").await.unwrap().is_none());
    let queue = remote.create_or_get_queue("jobs").await.unwrap();
    remote.set_visibility_timeout(&queue, 5).await.unwrap();
    remote
        .send(&queue, "payload".to_string(), 0, None)
        .await
        .unwrap();

    let messages = remote
        .receive(&queue, 1, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "payload");

    remote.delete(&queue, &messages[0]).await.unwrap();
    assert!(broker.namespace(None).queue("jobs").unwrap().is_empty());

    remote.delete_queue(&queue).await.unwrap();
    assert!(matches!(
        remote.receive(&queue, 1, Duration::from_millis(10)).await,
        Err(QueueError::QueueNotFound(_))
    ));
    broker.shutdown();
}

#[tokio::test]
async fn test_remote_dispatch_and_wait() {
    let (_broker, address) = start_broker(BrokerConfig::default()).await;
    let config = QueueConfig {
        address: address.clone(),
        prefix: Some("test".to_string()),
        ..Default::default()
    };
    let codec = Arc::new(Codec::standard());
    let dispatcher = Dispatcher::from_config(&config, codec.clone())
        .in_context(ExecutionContext::new("shop", 1));

    let mut pending = dispatcher
        .defer(DeferRequest::model("party.party", "search_count").keep_result())
        .await
        .unwrap();

    let remote = RemoteQueueService::from_config(&config);
    assert!(remote
        .get_queue("test-shop-trytond-async")
        .await
        .unwrap()
        .is_some());

    let result_queue = remote
        .create_queue(&pending.result_queue_name())
        .await
        .unwrap();
    let body = ResultEnvelope::new(Value::Int(3)).encode(&codec).unwrap();
    remote.send(&result_queue, body, 0, None).await.unwrap();

    let value = pending.wait(Some(Duration::from_secs(3))).await.unwrap();
    assert_eq!(value, Some(Value::Int(3)));
    assert!(remote
        .get_queue(&pending.result_queue_name())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_credentials_required_when_auth_enabled() {
    let (_broker, address) = start_broker(auth_config()).await;

    let anonymous = RemoteQueueService::new(address.clone()).with_owner("acct");
    assert!(matches!(
        anonymous.create_queue("jobs").await,
        Err(QueueError::Unauthorized(_))
    ));

    let wrong = RemoteQueueService::new(address.clone())
        .with_owner("acct")
        .with_credentials("AK", "nope");
    assert!(matches!(
        wrong.create_queue("jobs").await,
        Err(QueueError::Unauthorized(_))
    ));

    let other_owner = RemoteQueueService::new(address.clone())
        .with_owner("someone-else")
        .with_credentials("AK", "secret");
    assert!(matches!(
        other_owner.create_queue("jobs").await,
        Err(QueueError::Unauthorized(_))
    ));

    let valid = RemoteQueueService::new(address)
        .with_owner("acct")
        .with_credentials("AK", "secret");
    assert!(valid.create_queue("jobs").await.is_ok());
}

#[tokio::test]
async fn test_unreachable_broker_is_queue_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = QueueConfig {
        address,
        ..Default::default()
    };
    let dispatcher = Dispatcher::from_config(&config, Arc::new(Codec::standard()))
        .in_context(ExecutionContext::new("shop", 1));

    let result = dispatcher
        .defer(DeferRequest::model("party.party", "search"))
        .await;
    assert!(matches!(
        result,
        Err(DispatchError::Queue(QueueError::Connection(_)))
    ));
}

#[tokio::test]
async fn test_remote_errors_keep_their_variant() {
    let (_broker, address) = start_broker(BrokerConfig::default()).await;
    let remote = RemoteQueueService::new(address);
    let queue = remote.create_queue("jobs").await.unwrap();

    assert!(matches!(
        remote.send(&queue, "payload".to_string(), 901, None).await,
        Err(QueueError::InvalidDelay(901))
    ));

    let stale = ReceivedMessage {
        message_id: "m-1".to_string(),
        receipt: "no-such-receipt".to_string(),
        body: String::new(),
        attributes: MessageAttributes::new(),
        receive_count: 1,
    };
    match remote.delete(&queue, &stale).await {
        Err(QueueError::UnknownReceipt(receipt)) => assert_eq!(receipt, "no-such-receipt"),
        other => panic!("unexpected result: {:?}", other),
    }
}
