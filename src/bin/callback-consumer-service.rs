//! Entrypoint for component F, the callback consumer & receipt fan-out
//! service (`spec.md` §4.F).

use forgeos_core::config::{ConsumerConfig, LoggingConfig};
use forgeos_core::consumer::{
    self, build_fence_store, build_idempotency_guard, ConsumerState, EventStore,
    InMemoryReceiptRepo, PostgresReceiptRepo, ReceiptBroadcast, ReceiptRepo, ReceiptStore, Ring,
};
use forgeos_core::logging;
use forgeos_core::metrics::ConsumerMetrics;
use std::sync::Arc;

/// Scans `std::env::args()` for `--<name> <value>`, the same plain
/// argv-scanning approach used elsewhere in this codebase in place of a
/// `clap` dependency.
fn scan_arg(name: &str) -> Option<String> {
    let flag = format!("--{name}");
    let args: Vec<String> = std::env::args().collect();
    args.iter().position(|a| a == &flag).and_then(|i| args.get(i + 1).cloned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = logging::init_logging(&logging_config);

    let mut config = ConsumerConfig::from_env();
    if let Some(port) = scan_arg("port") {
        if let Some((host, _)) = config.bind_addr.rsplit_once(':') {
            config.bind_addr = format!("{host}:{port}");
        }
    }

    let fence_store = build_fence_store(config.redis_url.as_deref())?;
    let receipt_idempotency = build_idempotency_guard(config.redis_url.as_deref());

    let receipt_store = Arc::new(ReceiptStore::new(config.recent_receipts_capacity));
    let event_store = Arc::new(EventStore::new(config.recent_events_capacity));
    let broadcast = Arc::new(ReceiptBroadcast::new(config.sse_max_clients, config.sse_replay_cap));
    let metrics = Arc::new(ConsumerMetrics::default());

    let receipt_repo: Arc<dyn ReceiptRepo> = match &config.postgres_url {
        Some(url) => match PostgresReceiptRepo::connect(url).await {
            Ok(repo) => Arc::new(repo),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to postgres, falling back to in-memory receipt repo");
                Arc::new(InMemoryReceiptRepo)
            }
        },
        None => Arc::new(InMemoryReceiptRepo),
    };

    match receipt_repo.load_all().await {
        Ok(receipts) => receipt_store.hydrate(receipts),
        Err(e) => tracing::error!(error = %e, "failed to hydrate execution receipts at startup"),
    }

    let state = Arc::new(ConsumerState {
        config: config.clone(),
        fence_store,
        receipt_idempotency,
        receipt_store,
        receipt_repo,
        event_store,
        broadcast,
        metrics,
        cycle_samples: Ring::new(2_000),
        consistency_samples: Ring::new(2_000),
    });

    let app = consumer::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "callback-consumer-service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
