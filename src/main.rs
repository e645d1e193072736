use anyhow::{anyhow, Context, Result};
use hopbridge::api::{create_api_router, EngineState};
use hopbridge::amm::QuoteSimulator;
use hopbridge::config::{AppConfig, ChainRegistry};
use hopbridge::endpoint::EndpointResolver;
use hopbridge::escrow::EscrowEngine;
use hopbridge::reconcile::Reconciler;
use hopbridge::router::{Planner, QuoteSequencer};
use hopbridge::transport::jsonrpc::EvmRpc;
use hopbridge::transport::wallet::{request_accounts, RpcWallet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal bridge engine error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration from environment")?;
    let registry = ChainRegistry::builtin(config.hub_chain_id);
    let resolver = EndpointResolver::new(registry.clone());

    // Node-backed wallet against the hub chain; browser deployments
    // inject their own provider through the library instead.
    let hub = registry
        .chain(registry.hub_chain_id())
        .map_err(|e| anyhow!("{e}"))?;
    let wallet_url = hub
        .default_rpc_urls
        .first()
        .cloned()
        .context("hub chain has no rpc urls")?;
    let wallet = RpcWallet::new(EvmRpc::labeled(wallet_url, hub.chain_id.to_string()));

    let maker = match config.maker_address.as_deref() {
        Some(raw) => raw.parse().map_err(|e| anyhow!("parse maker address: {e}"))?,
        None => request_accounts(&wallet)
            .await
            .unwrap_or_default()
            .first()
            .copied()
            .unwrap_or_default(),
    };

    let state = Arc::new(EngineState {
        resolver: resolver.clone(),
        planner: Planner::new(resolver.clone()),
        simulator: QuoteSimulator::new(registry.clone()),
        engine: EscrowEngine::new(resolver.clone(), wallet, maker),
        reconciler: Reconciler::new(resolver.clone()),
        sequencer: QuoteSequencer::default(),
    });

    info!(
        hub_chain = registry.hub_chain_id(),
        chains = ?registry.chain_ids(),
        maker = %maker,
        "hopbridge engine online"
    );

    // Start HTTP API server
    let api_router = create_api_router(state.clone());
    let api_addr: std::net::SocketAddr = config
        .bind_addr
        .as_deref()
        .unwrap_or("0.0.0.0:8080")
        .parse()
        .context("parse API bind address")?;

    info!(address = %api_addr, "HTTP API server starting");
    let _api_handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&api_addr)
            .await
            .expect("bind API server address");
        if let Err(e) = axum::serve(listener, api_router).await {
            warn!(error = %e, "API server error");
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = state.engine.stats();
                info!(
                    orders_created = stats.orders_created,
                    dispatches_ok = stats.dispatches_ok,
                    dispatches_failed = stats.dispatches_failed,
                    cached_endpoints = state.resolver.cached_chains().await,
                    max_inflight = ?config.max_inflight,
                    "hopbridge heartbeat"
                );
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!(error = %err, "ctrl_c listener error");
                }
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
