//! # Polling Fallback Integration Tests
//!
//! Drives the fallback engine with scripted connection-state transitions
//! and a counting state source: polling must start when the transport
//! degrades, reconcile fetched snapshots into the store, survive fetch
//! failures, and stop (after the grace delay) once the transport recovers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lib_common::SyncConfig;
use lib_common::core::reconcile::{DataType, ReconciledState};
use lib_common::core::transport::{ConnectionState, InMemoryTransport, PubSubTransport};
use lib_common::fallback::{FallbackPhase, PollingFallback, StateSource, StateSourceError};

const PHASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Scripted state source: counts fetches and can be switched into a failing
/// mode.
struct CountingSource {
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl CountingSource {
    fn new() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl StateSource for CountingSource {
    async fn fetch_all(&self, data_type: DataType) -> Result<Vec<Value>, StateSourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StateSourceError::Http("connection refused".to_string()));
        }
        Ok(match data_type {
            DataType::PriorityList => vec![json!({"orderIds": ["O1"]})],
            _ => vec![json!({"id": "O1", "status": "Cut"})],
        })
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 25,
        recovery_grace_ms: 30,
        ..SyncConfig::default()
    }
}

struct Fixture {
    source: Arc<CountingSource>,
    store: Arc<Mutex<ReconciledState>>,
    transport: Arc<InMemoryTransport>,
    cancel: CancellationToken,
    phase: tokio::sync::watch::Receiver<FallbackPhase>,
}

fn spawn_engine() -> Fixture {
    spawn_engine_for(DataType::Orders)
}

fn spawn_engine_for(data_type: DataType) -> Fixture {
    let source = Arc::new(CountingSource::new());
    let store = Arc::new(Mutex::new(ReconciledState::new()));
    let transport = Arc::new(InMemoryTransport::new());
    let cancel = CancellationToken::new();

    let engine = PollingFallback::new(
        Arc::clone(&source),
        Arc::clone(&store),
        data_type,
        &fast_config(),
        transport.watch_connection(),
        cancel.clone(),
    );
    let phase = engine.phase();
    tokio::spawn(engine.run());

    Fixture {
        source,
        store,
        transport,
        cancel,
        phase,
    }
}

async fn wait_for_phase(fixture: &mut Fixture, wanted: FallbackPhase) {
    timeout(PHASE_TIMEOUT, fixture.phase.wait_for(|phase| *phase == wanted))
        .await
        .unwrap_or_else(|_| panic!("Engine never reached {wanted:?}"))
        .expect("Engine dropped its phase channel");
}

#[tokio::test]
async fn test_degraded_transport_activates_polling() {
    let mut fixture = spawn_engine();
    assert_eq!(fixture.source.fetches(), 0, "No polling while the transport is healthy");

    fixture
        .transport
        .set_connection_state(ConnectionState::Disconnected);
    wait_for_phase(&mut fixture, FallbackPhase::Polling).await;

    // A few ticks pass; every successful fetch must land in the store.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        fixture.source.fetches() >= 2,
        "Polling must repeat on the interval, got {} fetches",
        fixture.source.fetches()
    );
    let snapshot = fixture.store.lock().expect("Store lock poisoned");
    assert_eq!(snapshot.orders_len(), 1);
    assert_eq!(
        snapshot.order("O1").expect("O1 missing")["status"],
        "Cut"
    );
    drop(snapshot);

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_recovery_stops_polling_after_grace_delay() {
    let mut fixture = spawn_engine();
    fixture
        .transport
        .set_connection_state(ConnectionState::Disconnected);
    wait_for_phase(&mut fixture, FallbackPhase::Polling).await;

    fixture
        .transport
        .set_connection_state(ConnectionState::Connected);
    wait_for_phase(&mut fixture, FallbackPhase::Idle).await;

    let after_recovery = fixture.source.fetches();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(
        fixture.source.fetches(),
        after_recovery,
        "No fetches may happen once the engine is idle again"
    );

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_priority_list_is_recovered_by_polling() {
    let mut fixture = spawn_engine_for(DataType::PriorityList);
    fixture
        .transport
        .set_connection_state(ConnectionState::Disconnected);
    wait_for_phase(&mut fixture, FallbackPhase::Polling).await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    let snapshot = fixture.store.lock().expect("Store lock poisoned");
    assert_eq!(
        snapshot.priority_ids(),
        Some(&["O1".to_string()][..]),
        "A priority update missed during the outage must be caught up by polling"
    );
    drop(snapshot);

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_errored_state_also_activates_polling() {
    let mut fixture = spawn_engine();
    fixture
        .transport
        .set_connection_state(ConnectionState::Errored);
    wait_for_phase(&mut fixture, FallbackPhase::Polling).await;
    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_fetch_failures_do_not_stop_the_loop() {
    let mut fixture = spawn_engine();
    fixture.source.failing.store(true, Ordering::SeqCst);
    fixture
        .transport
        .set_connection_state(ConnectionState::Disconnected);
    wait_for_phase(&mut fixture, FallbackPhase::Polling).await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    let while_failing = fixture.source.fetches();
    assert!(while_failing >= 2, "Failed fetches must be retried on the next tick");

    // The source heals; the very next tick must reconcile successfully.
    fixture.source.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(fixture.source.fetches() > while_failing);
    assert_eq!(
        fixture.store.lock().expect("Store lock poisoned").orders_len(),
        1
    );

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_cancellation_ends_the_engine() {
    let source = Arc::new(CountingSource::new());
    let store = Arc::new(Mutex::new(ReconciledState::new()));
    let transport = Arc::new(InMemoryTransport::new());
    let cancel = CancellationToken::new();

    let engine = PollingFallback::new(
        Arc::clone(&source),
        store,
        DataType::Orders,
        &fast_config(),
        transport.watch_connection(),
        cancel.clone(),
    );
    let handle = tokio::spawn(engine.run());

    transport.set_connection_state(ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(40)).await;
    cancel.cancel();

    timeout(PHASE_TIMEOUT, handle)
        .await
        .expect("Engine did not stop after cancellation")
        .expect("Engine task panicked");
}
