//! solstrike daemon - wires the execution core together and runs it.
//!
//! Startup order mirrors the dependency graph: caches attach to the stream
//! manager before it connects, executors come up only when a signing key is
//! configured, and detectors start last. Shutdown refuses new work but
//! lets in-flight bundle submissions finish (their timeouts bound the
//! tail).

use anyhow::{Context, Result};
use clap::Parser;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use solstrike::{
    arb_engine::ArbEngine,
    audit::AuditLog,
    blockhash_cache::BlockhashCache,
    bundle_executor::BundleExecutor,
    config::Config,
    endpoint_manager::EndpointManager,
    events::EventBus,
    hft_monitor::HftMonitor,
    jito_client::JitoBundleClient,
    jupiter_client::JupiterClient,
    orca_sidecar::{OrcaPoolMap, OrcaSidecarClient},
    price_cache::PriceCache,
    raydium_registry::RaydiumPoolRegistry,
    rpc_client::RpcHttpClient,
    settings::SniperSettings,
    sniper_engine::SniperEngine,
    stream_manager::StreamManager,
    tip_floor_cache::TipFloorCache,
    trade_executor::TradeExecutor,
    trade_guard::TradeGuard,
    venue_router::VenueRouter,
    wallet_manager::WalletManager,
    whale_watcher::WhaleWatcher,
};

#[derive(Parser, Debug)]
#[command(name = "solstrike", about = "Event-driven Solana trading core")]
struct Args {
    /// Load environment from a specific .env file
    #[arg(long)]
    env_file: Option<String>,

    /// Skip startup Raydium pool discovery for the arb watchlist
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.env_file {
        dotenvy::from_filename(path).with_context(|| format!("loading env file {}", path))?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("🚀 solstrike starting");

    let audit = Arc::new(AuditLog::open(&config.audit_db_path)?);
    audit.record_system_event("start", "core initializing");

    let events = EventBus::default();
    let endpoints = Arc::new(EndpointManager::new());
    {
        let mut rpc_group = vec![config.rpc_url.clone()];
        if let Some(staked) = &config.staked_rpc_url {
            rpc_group.insert(0, staked.clone());
        }
        endpoints.register_group("rpc", rpc_group);
    }

    // ── Streaming fabric + caches ────────────────────────────────────
    let stream = StreamManager::new(&config, Arc::clone(&endpoints));
    let blockhash = BlockhashCache::new();
    blockhash.attach_stream(&stream);

    let rpc_http = Arc::new(RpcHttpClient::new(&config.rpc_url));
    let rpc_confirm = Arc::new(RpcClient::new(config.rpc_url.clone()));

    let registry = Arc::new(RaydiumPoolRegistry::new(config.reserve_rpc_url()));
    registry.set_stream_manager(stream.clone());
    registry.start();

    let tip_floor = TipFloorCache::new();
    tip_floor.start();

    // ── Venue plumbing ───────────────────────────────────────────────
    let orca_map = OrcaPoolMap::new();
    {
        let orca_map = Arc::clone(&orca_map);
        tokio::spawn(async move { orca_map.load_from_vendor().await });
    }
    let jupiter = Arc::new(JupiterClient::new(&config));
    let router = Arc::new(VenueRouter::new(
        Arc::clone(&registry),
        Arc::clone(&blockhash),
        Arc::clone(&orca_map),
        OrcaSidecarClient::new(&config.orca_sidecar_url),
        Arc::clone(&jupiter),
    ));
    let price_cache = PriceCache::new(Arc::clone(&jupiter), Arc::clone(&rpc_http));

    // ── Execution side (requires the signing key) ────────────────────
    let wallet = match &config.keypair_path {
        Some(path) => match WalletManager::load(path) {
            Ok(wallet) => Some(Arc::new(wallet)),
            Err(e) => {
                error!("Signing key unusable ({:#}) - execution disabled", e);
                None
            }
        },
        None => {
            warn!("No SERVER_KEYPAIR_PATH configured - running detect-only");
            None
        }
    };

    let bundles = wallet.as_ref().map(|wallet| {
        Arc::new(BundleExecutor::new(
            Arc::clone(wallet),
            Arc::new(JitoBundleClient::new(config.jito_block_engines.clone())),
        ))
    });

    // ── Arb engine ───────────────────────────────────────────────────
    let arb = ArbEngine::new(
        Arc::clone(&jupiter),
        Arc::clone(&router),
        Arc::clone(&blockhash),
        bundles.clone(),
        events.clone(),
        Arc::clone(&audit),
    );
    arb.start();

    if !args.no_discovery {
        let pairs: Vec<(String, String)> = arb
            .pairs()
            .iter()
            .map(|p| (p.input_mint.clone(), p.output_mint.clone()))
            .collect();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry.discover_pools(&pairs).await;
        });
    }

    // ── Sniper (only with a signing key - its whole job is executing) ─
    let sniper = match (&wallet, &bundles) {
        (Some(wallet), Some(bundles)) => {
            let trades = Arc::new(TradeExecutor::new(
                Arc::clone(&router),
                Arc::clone(bundles),
                Arc::clone(&blockhash),
                Arc::clone(&rpc_confirm),
            ));
            let settings = Arc::new(parking_lot::RwLock::new(SniperSettings::default()));
            let hft = HftMonitor::new(
                Arc::clone(&settings),
                Arc::clone(&price_cache),
                Arc::clone(&trades),
                Arc::clone(&tip_floor),
                Arc::clone(&rpc_http),
                events.clone(),
                Arc::clone(&audit),
                wallet.pubkey().to_string(),
            );
            let sniper = SniperEngine::new(
                Arc::clone(&rpc_http),
                settings,
                Arc::new(TradeGuard::new()),
                trades,
                Arc::clone(&tip_floor),
                hft,
                events.clone(),
                Arc::clone(&audit),
                wallet.pubkey().to_string(),
            );
            sniper.start();
            Some(sniper)
        }
        _ => {
            warn!("Sniper engine not started (no signing key)");
            None
        }
    };

    // ── Whale watcher ────────────────────────────────────────────────
    let whales = WhaleWatcher::new(Arc::clone(&rpc_http), events.clone());
    if let Ok(wallets) = std::env::var("WHALE_WALLETS") {
        let targets: Vec<String> = wallets
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !targets.is_empty() {
            whales.set_targets(targets);
            whales.attach_stream(&stream);
        }
    }

    // ── Go live ──────────────────────────────────────────────────────
    if config.streaming_configured() {
        if let Err(e) = stream.start() {
            error!("Streaming fabric refused to start: {:#}", e);
        }
    } else {
        warn!("Streaming endpoints not configured - caches fall back to polling only");
    }

    // Keep a bus subscriber alive so emissions are observable in the logs.
    {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                tracing::debug!(topic = event.topic(), "event");
            }
        });
    }

    info!("✅ solstrike core online - Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    info!("Shutting down...");

    if let Some(sniper) = &sniper {
        sniper.stop();
    }
    whales.stop();
    arb.stop();
    tip_floor.stop();
    registry.stop();
    stream.stop();
    audit.record_system_event("stop", "core shut down");
    info!("👋 solstrike stopped");
    Ok(())
}
