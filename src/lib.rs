//! solstrike - event-driven Solana trading core.
//!
//! This library provides:
//! - Dual Yellowstone gRPC ingest (Geyser + shred-level) with typed callbacks
//! - In-memory state caches: blockhash, Raydium V4 pools, Jito tip floor
//! - Opportunity detectors: cross-venue arbitrage, new-token sniper, whales
//! - A venue-aware swap builder (direct AMM → sidecar → aggregator ladder)
//! - Atomic Jito bundle execution with circuit breakers and an audit trail
//!
//! Control flow is event-driven: stream callbacks wake detectors, detectors
//! read caches, builders synthesize transactions from memory, executors sign
//! and submit. No RPC sits on the hot path.

pub mod arb_engine;
pub mod audit;
pub mod blockhash_cache;
pub mod bundle_executor;
pub mod config;
pub mod constants;
pub mod endpoint_manager;
pub mod events;
pub mod hft_monitor;
pub mod jito_client;
pub mod jupiter_client;
pub mod orca_sidecar;
pub mod price_cache;
pub mod raydium_pool_state;
pub mod raydium_registry;
pub mod raydium_swap_builder;
pub mod rpc_client;
pub mod settings;
pub mod sniper_engine;
pub mod stream_manager;
pub mod tip_floor_cache;
pub mod trade_executor;
pub mod trade_guard;
pub mod venue_router;
pub mod wallet_manager;
pub mod whale_watcher;

// Re-export main types for convenience
pub use arb_engine::{ArbEngine, MonitoredPair};
pub use audit::AuditLog;
pub use blockhash_cache::BlockhashCache;
pub use bundle_executor::{BundleExecutor, BundleOutcome};
pub use config::Config;
pub use endpoint_manager::EndpointManager;
pub use events::{Event, EventBus, NotifyLevel};
pub use hft_monitor::{HftMonitor, HftPosition, PositionStatus};
pub use jito_client::{bundle_accepted, JitoBundleClient, RelaySubmission};
pub use jupiter_client::JupiterClient;
pub use orca_sidecar::{OrcaPoolMap, OrcaSidecarClient};
pub use price_cache::PriceCache;
pub use raydium_pool_state::RaydiumPoolState;
pub use raydium_registry::{quote_amount_out, RaydiumPoolRegistry};
pub use rpc_client::RpcHttpClient;
pub use settings::{ArbSettings, SnipeMode, SniperSettings};
pub use sniper_engine::SniperEngine;
pub use stream_manager::{
    AccountUpdate, ProgramAccountUpdate, SlotCommitment, StreamManager, StreamStats,
    TransactionNotice,
};
pub use tip_floor_cache::{TipFloorCache, TipPercentile};
pub use trade_executor::{TradeExecutor, TradeResult};
pub use trade_guard::TradeGuard;
pub use venue_router::{SwapBuild, SwapMethod, Venue, VenueRouter};
pub use wallet_manager::WalletManager;
pub use whale_watcher::WhaleWatcher;
