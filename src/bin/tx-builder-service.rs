//! Entrypoint for component D, the transaction-builder HTTP service
//! (`spec.md` §4.D).

use forgeos_core::builder::{BuilderState, CommandTxBuilder, HttpUtxoSource, ManualTxBuilder, NativeTxBuilder, ProxyTxBuilder, TxBuilder, UtxoSource};
use forgeos_core::config::{BuildMode, BuilderConfig, LoggingConfig, TelemetryCacheConfig};
use forgeos_core::metrics::{BuilderMetrics, TelemetryCacheMetrics};
use forgeos_core::policy::PolicyConfig;
use forgeos_core::telemetry::{HttpSummarySource, SummaryCache};
use forgeos_core::{builder, logging};
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

    let mut config = BuilderConfig::from_env();
    if let Some(port) = scan_arg("port") {
        if let Some((host, _)) = config.bind_addr.rsplit_once(':') {
            config.bind_addr = format!("{host}:{port}");
        }
    }
    let policy_config_path = scan_arg("config").or_else(|| std::env::var("FORGEOS_POLICY_CONFIG_FILE").ok());
    let policy_config = PolicyConfig::load(policy_config_path.as_deref());

    let utxo_source: Arc<dyn UtxoSource> = Arc::new(HttpUtxoSource::new(
        config.mainnet_rpc_base.clone(),
        config.testnet10_rpc_base.clone(),
        config.rpc_timeout,
    ));

    let tx_builder: Arc<dyn TxBuilder> = match config.mode {
        BuildMode::Command => Arc::new(CommandTxBuilder {
            command_path: config.command_path.clone().unwrap_or_default(),
            timeout: config.rpc_timeout,
        }),
        BuildMode::Proxy => Arc::new(ProxyTxBuilder {
            client: reqwest::Client::new(),
            proxy_url: config.proxy_url.clone().unwrap_or_default(),
            timeout: config.rpc_timeout,
        }),
        BuildMode::Manual => Arc::new(ManualTxBuilder),
        _ => Arc::new(NativeTxBuilder),
    };

    let telemetry_cache = if policy_config.priority_fee_mode == forgeos_core::policy::PriorityFeeMode::Adaptive {
        let telemetry_config = TelemetryCacheConfig::from_env();
        let source = Arc::new(HttpSummarySource::new(
            telemetry_config.callback_summary_url.clone(),
            telemetry_config.scheduler_summary_url.clone(),
            telemetry_config.fetch_timeout,
        ));
        let metrics = Arc::new(TelemetryCacheMetrics::default());
        Some(Arc::new(SummaryCache::new(telemetry_config, source, metrics)))
    } else {
        None
    };

    let state = Arc::new(BuilderState {
        config: config.clone(),
        policy_config,
        utxo_source,
        tx_builder,
        telemetry_cache,
        metrics: Arc::new(BuilderMetrics::default()),
    });

    let app = builder::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "tx-builder-service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
