//! Completion callbacks: synchronous attempts, queued redelivery and the HTTP client.

mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use fsm_engine::callback::{CallbackEvent, CallbackManager, HttpCallbackManager};
use fsm_engine::config::CallbackConfig;
use fsm_engine::engine::{Engine, EngineDependencies};
use fsm_engine::lock::MemoryLocker;
use fsm_engine::model::{Tx, TxStatus};
use fsm_engine::queue::InMemoryBroker;
use fsm_engine::test_helpers::{InMemoryCallbackRepository, InMemoryRepository};

const CALLBACK_QUEUE: &str = "callback_manager";

fn fast_callback_config() -> CallbackConfig {
    CallbackConfig {
        sync_retry_delay_ms: 5,
        async_retry_delay_ms: 5,
        request_timeout_ms: 2_000,
        ..CallbackConfig::default()
    }
}

struct CallbackHarness {
    manager: HttpCallbackManager,
    repository: Arc<InMemoryCallbackRepository>,
    broker: InMemoryBroker,
    client: Arc<ScriptedClient>,
}

impl CallbackHarness {
    async fn new(client: ScriptedClient) -> Self {
        let repository = Arc::new(InMemoryCallbackRepository::new());
        let broker = InMemoryBroker::with_history();
        let client = Arc::new(client);

        let manager = HttpCallbackManager::start(
            fast_callback_config(),
            repository.clone(),
            Arc::new(broker.clone()),
            client.clone(),
        )
        .await
        .unwrap();

        Self {
            manager,
            repository,
            broker,
            client,
        }
    }

    fn attempts(&self, tx: &Tx) -> Vec<CallbackEvent> {
        self.repository.events_for(tx.id)
    }
}

fn finished_tx(url: &str) -> Tx {
    let mut tx = Tx::generate()
        .with_callback_url(url)
        .with_attribute("amount", 990)
        .unwrap();
    tx.state = "PAYMENT_DONE".to_string();
    tx.status = TxStatus::Done;
    tx
}

#[tokio::test]
async fn test_delivered_on_second_sync_attempt() {
    let harness =
        CallbackHarness::new(ScriptedClient::new([Scripted::Unreachable], Scripted::Status(200)))
            .await;
    let tx = finished_tx("http://merchant.test/hooks/payment");

    harness.manager.send(&tx).await;

    assert_eq!(harness.client.request_count(), 2);
    let attempts = harness.attempts(&tx);
    assert_eq!(attempts.len(), 2);

    assert_eq!(attempts[0].retry_n, 1);
    assert_eq!(attempts[0].response_code, -1);
    assert!(!attempts[0].sent_successfully);

    assert_eq!(attempts[1].retry_n, 2);
    assert_eq!(attempts[1].response_code, 200);
    assert!(attempts[1].sent_successfully);
    assert_ne!(attempts[0].id, attempts[1].id);

    assert!(harness.broker.published(CALLBACK_QUEUE).is_empty());

    let (url, body) = harness.client.requests().remove(0);
    assert_eq!(url, "http://merchant.test/hooks/payment");
    assert_eq!(serde_json::from_slice::<Tx>(&body).unwrap(), tx);
}

#[tokio::test]
async fn test_non_success_statuses_are_retried() {
    let harness = CallbackHarness::new(ScriptedClient::new(
        [Scripted::Status(503), Scripted::Status(302)],
        Scripted::Status(204),
    ))
    .await;
    let tx = finished_tx("http://merchant.test/hooks/payment");

    harness.manager.send(&tx).await;

    let codes: Vec<i32> = harness
        .attempts(&tx)
        .iter()
        .map(|attempt| attempt.response_code)
        .collect();
    assert_eq!(codes, vec![503, 302, 204]);
    assert!(harness.broker.published(CALLBACK_QUEUE).is_empty());
}

#[tokio::test]
async fn test_unreachable_receiver_exhausts_all_attempts() {
    let harness = CallbackHarness::new(ScriptedClient::always(Scripted::Unreachable)).await;
    let tx = finished_tx("http://merchant.test/hooks/payment");

    harness.manager.send(&tx).await;
    assert_eq!(harness.client.request_count(), 3);

    assert!(wait_until(|| harness.client.request_count() == 10).await);
    assert!(wait_until(|| harness.broker.queue_stats(CALLBACK_QUEUE).unwrap().acked == 7).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.client.request_count(), 10);
    assert_eq!(harness.broker.published(CALLBACK_QUEUE).len(), 7);

    let attempts = harness.attempts(&tx);
    assert_eq!(attempts.len(), 10);
    assert!(attempts.iter().all(|attempt| !attempt.sent_successfully));
    assert!(attempts.iter().all(|attempt| attempt.response_code == -1));
    let retries: Vec<u32> = attempts.iter().map(|attempt| attempt.retry_n).collect();
    assert_eq!(retries, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_queued_attempt_can_succeed() {
    let harness = CallbackHarness::new(ScriptedClient::new(
        [
            Scripted::Unreachable,
            Scripted::Unreachable,
            Scripted::Unreachable,
            Scripted::Status(500),
        ],
        Scripted::Status(200),
    ))
    .await;
    let tx = finished_tx("https://merchant.test/hooks/payment");

    harness.manager.send(&tx).await;

    assert!(wait_until(|| harness.client.request_count() == 5).await);
    assert!(wait_until(|| harness.broker.queue_stats(CALLBACK_QUEUE).unwrap().acked == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.client.request_count(), 5);
    let last = harness.attempts(&tx).pop().unwrap();
    assert_eq!(last.retry_n, 5);
    assert!(last.sent_successfully);
}

#[tokio::test]
async fn test_missing_or_invalid_url_sends_nothing() {
    let harness = CallbackHarness::new(ScriptedClient::always(Scripted::Status(200))).await;

    harness.manager.send(&finished_tx("")).await;
    harness.manager.send(&finished_tx("not a url")).await;
    harness.manager.send(&finished_tx("ftp://merchant.test/hooks")).await;

    assert_eq!(harness.client.request_count(), 0);
    assert!(harness.repository.is_empty());
}

#[tokio::test]
async fn test_stop_closes_queue_consumer() {
    let harness = CallbackHarness::new(ScriptedClient::always(Scripted::Status(200))).await;

    harness.manager.stop().await.unwrap();
}

type Received = Arc<Mutex<Vec<Tx>>>;

async fn receive(State(received): State<Received>, Json(tx): Json<Tx>) -> StatusCode {
    received.lock().push(tx);
    StatusCode::NO_CONTENT
}

async fn spawn_receiver(received: Received) -> String {
    let app = Router::new()
        .route("/hooks/payment", post(receive))
        .with_state(received);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/hooks/payment")
}

#[tokio::test]
async fn test_reqwest_client_posts_tx_json() {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let url = spawn_receiver(Arc::clone(&received)).await;

    let repository = Arc::new(InMemoryCallbackRepository::new());
    let manager = HttpCallbackManager::with_reqwest(
        fast_callback_config(),
        repository.clone(),
        Arc::new(InMemoryBroker::new()),
    )
    .await
    .unwrap();

    let tx = finished_tx(&url);
    manager.send(&tx).await;

    let delivered = received.lock().clone();
    assert_eq!(delivered, vec![tx.clone()]);

    let attempts = repository.events_for(tx.id);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].response_code, 204);
    assert!(attempts[0].sent_successfully);
    assert!(attempts[0].request_timestamp.is_some());
}

#[tokio::test]
async fn test_reqwest_client_reports_refused_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let repository = Arc::new(InMemoryCallbackRepository::new());
    let config = CallbackConfig {
        sync_retry_count: 1,
        async_retry_count: 1,
        ..fast_callback_config()
    };
    let broker = InMemoryBroker::new();
    let manager =
        HttpCallbackManager::with_reqwest(config, repository.clone(), Arc::new(broker.clone()))
            .await
            .unwrap();

    let tx = finished_tx(&format!("http://{addr}/hooks/payment"));
    manager.send(&tx).await;

    assert!(wait_until(|| broker.queue_stats(CALLBACK_QUEUE).unwrap().acked == 1).await);
    let attempts = repository.events_for(tx.id);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].response_code, -1);
    assert!(!attempts[0].response_body.is_empty());
}

#[tokio::test]
async fn test_engine_notifies_through_http_manager() {
    let client = Arc::new(ScriptedClient::always(Scripted::Status(200)));
    let broker = InMemoryBroker::new();
    let callback_repository = Arc::new(InMemoryCallbackRepository::new());
    let manager = HttpCallbackManager::start(
        fast_callback_config(),
        callback_repository.clone(),
        Arc::new(broker.clone()),
        client.clone(),
    )
    .await
    .unwrap();

    let repository = Arc::new(InMemoryRepository::new());
    let engine = Engine::new(
        fast_engine_config(),
        EngineDependencies {
            repository: repository.clone(),
            locker: Arc::new(MemoryLocker::new()),
            broker: Arc::new(broker.clone()),
            callbacks: Arc::new(manager),
        },
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let model = two_state_model("payment", counting_goto(Arc::clone(&calls), "B"));
    engine.add_model(Arc::clone(&model)).await.unwrap();

    let mut tx = Tx::generate().with_callback_url("http://merchant.test/hooks/payment");
    engine
        .create_tx(&mut tx, &model.resolve("A").unwrap())
        .await
        .unwrap();

    assert!(wait_until(|| client.request_count() == 1).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (_, body) = client.requests().remove(0);
    let notified: Tx = serde_json::from_slice(&body).unwrap();
    assert_eq!(notified.id, tx.id);
    assert_eq!(notified.state, "B");
    assert_eq!(notified.status, TxStatus::Done);

    engine.stop().await;
    assert!(broker.is_closed());
}
