//! # Order Watch Client
//!
//! The consumer side of the live-update pipeline: subscribes to the order
//! and notification channels, runs every delivery through the suppression
//! filter, throttle gate and reconciliation store, and falls back to
//! polling the REST read endpoints whenever the transport degrades.
//!
//! The reconciled collections this process maintains are exactly what a
//! dashboard tab would render; here they are summarized to the log instead.

use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lib_common::SyncConfig;
use lib_common::connections::RedisTransport;
use lib_common::core::pipeline::{Delivery, EventPipeline};
use lib_common::core::reconcile::{DataType, ReconciledState};
use lib_common::core::transport::{PubSubTransport, Subscription};
use lib_common::fallback::{HttpStateSource, PollingFallback, StateSource};
use lib_common::{NOTIFICATIONS_CHANNEL, ORDERS_CHANNEL};

/// # Application Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about = "Live-updating client view of the order dashboard state.")]
struct AppConfig {
    /// Redis connection URL for the pub/sub transport.
    #[clap(long, env = "REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,

    /// Base URL of the order API's read endpoints (trailing slash required).
    #[clap(long, env = "API_URL", default_value = "http://127.0.0.1:3000/")]
    api_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");

    let app_config = AppConfig::parse();
    let sync_config = SyncConfig::load()?;

    // --- Phase 1: Transport & Subscriptions ---
    let transport = Arc::new(RedisTransport::connect(&app_config.redis_url).await?);
    let mut orders_sub = transport.subscribe(ORDERS_CHANNEL).await?;
    let mut notifications_sub = transport.subscribe(NOTIFICATIONS_CHANNEL).await?;

    // --- Phase 2: Initial Load ---
    // The same endpoints the fallback polls also provide the first snapshot.
    let source = Arc::new(HttpStateSource::new(&app_config.api_url)?);
    let store = Arc::new(Mutex::new(ReconciledState::new()));
    initial_load(&source, &store).await;

    let mut pipeline = EventPipeline::new(&sync_config, Arc::clone(&store));

    // --- Phase 3: Fallback Engines ---
    let cancel = CancellationToken::new();
    for data_type in [
        DataType::Orders,
        DataType::Notifications,
        DataType::PriorityList,
    ] {
        let fallback = PollingFallback::new(
            Arc::clone(&source),
            Arc::clone(&store),
            data_type,
            &sync_config,
            transport.watch_connection(),
            cancel.clone(),
        );
        tokio::spawn(fallback.run());
    }

    // --- Phase 4: Connectivity Indicator ---
    let mut conn_rx = transport.watch_connection();
    tokio::spawn(async move {
        loop {
            let state = *conn_rx.borrow();
            if state.is_degraded() {
                info!(?state, "still syncing: transport degraded, polling fallback covers updates");
            } else {
                info!(?state, "live updates active");
            }
            if conn_rx.changed().await.is_err() {
                return;
            }
        }
    });

    // --- Phase 5: Main Event Loop ---
    info!("Order watch running. Press CTRL+C to stop.");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            payload = orders_sub.recv() => {
                match payload {
                    Some(payload) => handle_payload(&mut pipeline, &orders_sub, &payload, &store),
                    None => {
                        warn!("orders subscription closed");
                        break;
                    }
                }
            }
            payload = notifications_sub.recv() => {
                match payload {
                    Some(payload) => handle_payload(&mut pipeline, &notifications_sub, &payload, &store),
                    None => {
                        warn!("notifications subscription closed");
                        break;
                    }
                }
            }
        }
    }

    // --- Phase 6: Teardown ---
    cancel.cancel();
    transport.shutdown();
    info!("Order watch stopped.");
    Ok(())
}

/// Loads the first authoritative snapshot for every collection. A failed
/// load is not fatal: live events and the fallback engine converge on the
/// same state later.
async fn initial_load(source: &Arc<HttpStateSource>, store: &Arc<Mutex<ReconciledState>>) {
    for data_type in [
        DataType::Orders,
        DataType::Notifications,
        DataType::PriorityList,
    ] {
        match source.fetch_all(data_type).await {
            Ok(items) => {
                let count = items.len();
                store
                    .lock()
                    .expect("Reconciled state lock poisoned")
                    .apply_full_replace(data_type, items);
                info!(?data_type, count, "initial snapshot loaded");
            }
            Err(e) => {
                warn!(?data_type, error = %e, "initial snapshot failed, relying on live updates");
            }
        }
    }
}

fn handle_payload(
    pipeline: &mut EventPipeline,
    subscription: &Subscription,
    payload: &str,
    store: &Arc<Mutex<ReconciledState>>,
) {
    match pipeline.handle_raw(payload) {
        Ok(Delivery::Applied(outcome)) => {
            let snapshot = store.lock().expect("Reconciled state lock poisoned");
            info!(
                channel = subscription.channel(),
                ?outcome,
                orders = snapshot.orders_len(),
                notifications = snapshot.notifications().len(),
                prioritized = snapshot.priority_view().len(),
                "event applied"
            );
        }
        Ok(Delivery::DroppedDuplicate) => {
            debug!(channel = subscription.channel(), "duplicate delivery dropped");
        }
        Ok(Delivery::DroppedThrottled) => {
            debug!(channel = subscription.channel(), "delivery throttled");
        }
        Err(e) => {
            // Malformed events are discarded whole; no partial state applied.
            warn!(channel = subscription.channel(), error = %e, "event discarded");
        }
    }
}
