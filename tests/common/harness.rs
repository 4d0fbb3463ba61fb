//! Engine wired to in-memory collaborators with millisecond delays.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use fsm_engine::config::EngineConfig;
use fsm_engine::engine::{Engine, EngineDependencies};
use fsm_engine::lock::MemoryLocker;
use fsm_engine::model::Event;
use fsm_engine::queue::InMemoryBroker;
use fsm_engine::test_helpers::InMemoryRepository;

use super::callbacks::RecordingCallbackManager;

/// Engine settings that keep retry and contention back-off short.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        app_name: "fsm-engine-tests".to_string(),
        event_retry_max_count: 5,
        event_retry_min_delay_ms: 10,
        lock_retry_delay_ms: 20,
        ..EngineConfig::default()
    }
}

pub struct EngineHarness {
    pub engine: Arc<Engine>,
    pub repository: Arc<InMemoryRepository>,
    pub broker: InMemoryBroker,
    pub locker: Arc<MemoryLocker>,
    pub callbacks: Arc<RecordingCallbackManager>,
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_config(fast_engine_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        let broker = InMemoryBroker::with_history();
        let locker = Arc::new(MemoryLocker::new());
        let callbacks = Arc::new(RecordingCallbackManager::default());

        let engine = Engine::new(
            config,
            EngineDependencies {
                repository: repository.clone(),
                locker: locker.clone(),
                broker: Arc::new(broker.clone()),
                callbacks: callbacks.clone(),
            },
        );

        Self {
            engine,
            repository,
            broker,
            locker,
            callbacks,
        }
    }

    /// Events published to `queue` so far, decoded.
    pub fn published_events(&self, queue: &str) -> Vec<Event> {
        self.broker
            .published(queue)
            .iter()
            .map(|body| Event::decode(body).expect("engine publishes valid events"))
            .collect()
    }

    pub fn acked(&self, queue: &str) -> u64 {
        self.broker
            .queue_stats(queue)
            .map(|stats| stats.acked)
            .unwrap_or_default()
    }
}

/// Polls `condition` for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
