//! End-to-end behavior of the execution core, exercised offline.
//!
//! Vendor endpoints point at unroutable loopback ports, so every network
//! rung fails fast and the tests assert the pure control flow: routing
//! ladder decisions, blockhash policy, circuit-breaker disarm, and the HFT
//! position state machine.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;

use solstrike::{
    ArbSettings, AuditLog, BlockhashCache, BundleExecutor, Config, Event, EventBus,
    HftMonitor, JitoBundleClient, JupiterClient, NotifyLevel, OrcaPoolMap, OrcaSidecarClient,
    PriceCache, RaydiumPoolRegistry, RaydiumPoolState, RpcHttpClient, SnipeMode, SniperEngine,
    SniperSettings, SwapMethod, TipFloorCache, TradeExecutor, TradeGuard, Venue, VenueRouter,
    WalletManager,
};

const DEAD: &str = "http://127.0.0.1:1";

fn offline_config() -> Config {
    Config {
        geyser_endpoint: None,
        shred_endpoint: None,
        grpc_token: None,
        rpc_url: DEAD.to_string(),
        staked_rpc_url: None,
        keypair_path: None,
        jupiter_quote_api: format!("{}/quote", DEAD),
        jupiter_swap_api: format!("{}/swap", DEAD),
        jupiter_price_api: format!("{}/price", DEAD),
        jupiter_api_key: None,
        orca_sidecar_url: DEAD.to_string(),
        jito_block_engines: vec![DEAD.to_string()],
        audit_db_path: ":memory:".to_string(),
        allowed_origins: vec![],
        auth_enabled: false,
        ip_whitelist: vec![],
    }
}

fn sol_usdc_pool() -> RaydiumPoolState {
    let mut pool = test_pool_shape();
    pool.coin_mint = Pubkey::new_unique(); // stand-in SOL-side mint
    pool.pc_mint = Pubkey::new_unique(); // stand-in USDC-side mint
    pool.coin_reserve = 1_000_000_000_000; // 1000 "SOL"
    pool.pc_reserve = 150_000_000_000; // 150k "USDC"
    pool
}

fn test_pool_shape() -> RaydiumPoolState {
    RaydiumPoolState {
        pool_address: Pubkey::new_unique(),
        coin_mint: Pubkey::new_unique(),
        pc_mint: Pubkey::new_unique(),
        coin_decimals: 9,
        pc_decimals: 6,
        coin_vault: Pubkey::new_unique(),
        pc_vault: Pubkey::new_unique(),
        open_orders: Pubkey::new_unique(),
        target_orders: Pubkey::new_unique(),
        market_address: Pubkey::new_unique(),
        serum_program: Pubkey::new_unique(),
        market_bids: Pubkey::new_unique(),
        market_asks: Pubkey::new_unique(),
        market_event_queue: Pubkey::new_unique(),
        market_coin_vault: Pubkey::new_unique(),
        market_pc_vault: Pubkey::new_unique(),
        market_vault_signer: Pubkey::new_unique(),
        trade_fee_numerator: 25,
        trade_fee_denominator: 10_000,
        swap_fee_numerator: 25,
        swap_fee_denominator: 10_000,
        coin_reserve: 0,
        pc_reserve: 0,
        last_update_slot: 0,
        last_update_time: Some(std::time::Instant::now()),
    }
}

struct Harness {
    config: Config,
    registry: Arc<RaydiumPoolRegistry>,
    blockhash: Arc<BlockhashCache>,
    router: Arc<VenueRouter>,
    events: EventBus,
}

fn harness() -> Harness {
    let config = offline_config();
    let registry = Arc::new(RaydiumPoolRegistry::new(DEAD));
    let blockhash = BlockhashCache::new();
    let router = Arc::new(VenueRouter::new(
        Arc::clone(&registry),
        Arc::clone(&blockhash),
        OrcaPoolMap::with_list_url(DEAD),
        OrcaSidecarClient::new(DEAD),
        Arc::new(JupiterClient::new(&config)),
    ));
    Harness {
        config,
        registry,
        blockhash,
        router,
        events: EventBus::default(),
    }
}

fn fresh_blockhash(cache: &BlockhashCache) -> String {
    // last_valid = 1000 + 150 = 1150, slot 1005 → 145 blocks remaining
    let hash = Hash::new_unique().to_string();
    cache.on_blocks_meta(1_000, hash.clone(), 1_000);
    cache.on_slot(1_005);
    hash
}

fn trade_stack(h: &Harness) -> (Arc<TradeExecutor>, Arc<WalletManager>) {
    let wallet = Arc::new(WalletManager::from_keypair(Keypair::new()));
    let bundles = Arc::new(BundleExecutor::new(
        Arc::clone(&wallet),
        Arc::new(JitoBundleClient::new(h.config.jito_block_engines.clone())),
    ));
    let trades = Arc::new(TradeExecutor::new(
        Arc::clone(&h.router),
        bundles,
        Arc::clone(&h.blockhash),
        Arc::new(solana_rpc_client::nonblocking::rpc_client::RpcClient::new(
            DEAD.to_string(),
        )),
    ));
    (trades, wallet)
}

// ── Routing ladder ───────────────────────────────────────────────────

#[tokio::test]
async fn router_picks_direct_build_from_fresh_registry() {
    let h = harness();
    let pool = sol_usdc_pool();
    let input = pool.coin_mint.to_string();
    let output = pool.pc_mint.to_string();
    h.registry.install_pool(pool);
    let blockhash = fresh_blockhash(&h.blockhash);

    let build = h
        .router
        .build_swap(
            &Venue::Raydium,
            &input,
            &output,
            1_000_000_000,
            &Pubkey::new_unique(),
            &blockhash,
            50,
        )
        .await;

    assert_eq!(build.method, SwapMethod::RaydiumDirect);
    assert!(build.ok());
    // ~1 SOL in a 1000/150k pool ≈ 149.x USDC out
    assert!(build.estimated_out > 149_000_000 && build.estimated_out < 150_000_000);
}

#[tokio::test]
async fn router_same_inputs_with_cleared_registry_never_goes_direct() {
    let h = harness();
    let pool = sol_usdc_pool();
    let input = pool.coin_mint.to_string();
    let output = pool.pc_mint.to_string();
    // Registry intentionally left empty: the direct rung must not fire, and
    // with the aggregator unreachable the ladder bottoms out at `failed`.
    let blockhash = fresh_blockhash(&h.blockhash);

    let build = h
        .router
        .build_swap(
            &Venue::Raydium,
            &input,
            &output,
            1_000_000_000,
            &Pubkey::new_unique(),
            &blockhash,
            50,
        )
        .await;

    assert_ne!(build.method, SwapMethod::RaydiumDirect);
    assert_eq!(build.method, SwapMethod::Failed);
    assert!(!build.ok());
}

#[tokio::test]
async fn router_stale_reserves_force_fallback() {
    let h = harness();
    let mut pool = sol_usdc_pool();
    pool.last_update_slot = 925; // 80 slots behind
    let input = pool.coin_mint.to_string();
    let output = pool.pc_mint.to_string();
    h.registry.install_pool(pool);
    let blockhash = fresh_blockhash(&h.blockhash); // current slot 1005

    let build = h
        .router
        .build_swap(
            &Venue::Raydium,
            &input,
            &output,
            1_000_000_000,
            &Pubkey::new_unique(),
            &blockhash,
            50,
        )
        .await;

    assert_ne!(build.method, SwapMethod::RaydiumDirect);
}

// ── Blockhash policy ─────────────────────────────────────────────────

#[tokio::test]
async fn trade_aborts_when_blockhash_near_expiry() {
    let h = harness();
    let pool = sol_usdc_pool();
    let input = pool.coin_mint.to_string();
    let output = pool.pc_mint.to_string();
    h.registry.install_pool(pool);

    // 1150 - 1135 = 15 blocks remaining: below the submission floor.
    h.blockhash
        .on_blocks_meta(1_000, Hash::new_unique().to_string(), 1_000);
    h.blockhash.on_slot(1_135);

    let (trades, _wallet) = trade_stack(&h);
    let err = trades
        .execute_swap(
            &Venue::Raydium,
            &input,
            &output,
            1_000_000_000,
            50,
            10_000,
            "test trade",
            false,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("blockhash"));
}

// ── Circuit breaker ──────────────────────────────────────────────────

fn sniper_stack(h: &Harness) -> SniperEngine {
    let (trades, wallet) = trade_stack(h);
    let settings = Arc::new(parking_lot::RwLock::new(SniperSettings {
        auto_snipe: true,
        snipe_mode: SnipeMode::Graduated,
        circuit_breaker_limit: 1,
        ..SniperSettings::default()
    }));
    let tip_floor = TipFloorCache::with_url(DEAD);
    let rpc = Arc::new(RpcHttpClient::new(DEAD));
    let price_cache = PriceCache::new(Arc::new(JupiterClient::new(&h.config)), Arc::clone(&rpc));
    let hft = HftMonitor::new(
        Arc::clone(&settings),
        price_cache,
        Arc::clone(&trades),
        Arc::clone(&tip_floor),
        Arc::clone(&rpc),
        h.events.clone(),
        Arc::new(AuditLog::in_memory().unwrap()),
        wallet.pubkey().to_string(),
    );
    SniperEngine::new(
        rpc,
        settings,
        Arc::new(TradeGuard::new()),
        trades,
        tip_floor,
        hft,
        h.events.clone(),
        Arc::new(AuditLog::in_memory().unwrap()),
        wallet.pubkey().to_string(),
    )
}

fn clean_token(dex: &str) -> solstrike::events::TokenDetected {
    solstrike::events::TokenDetected {
        mint: Pubkey::new_unique().to_string(),
        symbol: "NEW".into(),
        name: "New Token".into(),
        dex_id: dex.into(),
        initial_liquidity: 2.0,
        is_rug: false,
        mint_authority: None,
        freeze_authority: None,
        socials: serde_json::json!({}),
        detected_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn circuit_breaker_fires_then_disarms() {
    let h = harness();
    let sniper = sniper_stack(&h);
    let mut rx = h.events.subscribe();

    // First detection in the arm cycle: the snipe fires.
    sniper.attempt_auto_snipe(clean_token("Raydium")).await;
    assert_eq!(sniper.snipe_count(), 1);
    assert!(sniper.settings().auto_snipe);

    // Second detection with limit=1: disarm instead of submitting.
    sniper.attempt_auto_snipe(clean_token("Raydium")).await;
    assert_eq!(sniper.snipe_count(), 1);
    assert!(!sniper.settings().auto_snipe);

    // A disarm notification and a status flip both reach the bus.
    let mut saw_disarm_notice = false;
    let mut saw_disarmed_status = false;
    while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        match event.unwrap() {
            Event::Notification(n) if n.level == NotifyLevel::Warning => {
                assert!(n.title.contains("Circuit Breaker"));
                saw_disarm_notice = true;
            }
            Event::SniperStatus { armed: false, .. } => saw_disarmed_status = true,
            _ => {}
        }
        if saw_disarm_notice && saw_disarmed_status {
            break;
        }
    }
    assert!(saw_disarm_notice && saw_disarmed_status);
}

#[tokio::test]
async fn graduated_mode_skips_pumpfun_launches() {
    let h = harness();
    let sniper = sniper_stack(&h);
    sniper.attempt_auto_snipe(clean_token("Pump.fun")).await;
    assert_eq!(sniper.snipe_count(), 0);
    assert!(sniper.settings().auto_snipe);
}

#[tokio::test]
async fn rearming_resets_the_breaker() {
    let h = harness();
    let sniper = sniper_stack(&h);
    sniper.attempt_auto_snipe(clean_token("Raydium")).await;
    sniper.attempt_auto_snipe(clean_token("Raydium")).await;
    assert!(!sniper.settings().auto_snipe);

    let mut rearmed = sniper.settings();
    rearmed.auto_snipe = true;
    sniper.update_settings(rearmed);
    assert_eq!(sniper.snipe_count(), 0);
    assert!(sniper.settings().auto_snipe);
}

// ── HFT position state machine ───────────────────────────────────────

#[tokio::test]
async fn hft_take_profit_transitions_monitoring_to_selling_exactly_once() {
    let h = harness();
    let (trades, wallet) = trade_stack(&h);
    let settings = Arc::new(parking_lot::RwLock::new(SniperSettings::default()));
    let rpc = Arc::new(RpcHttpClient::new(DEAD));
    let jupiter = Arc::new(JupiterClient::new(&h.config));
    let price_cache = PriceCache::new(jupiter, Arc::clone(&rpc));
    let tip_floor = TipFloorCache::with_url(DEAD);
    let monitor = HftMonitor::new(
        Arc::clone(&settings),
        Arc::clone(&price_cache),
        trades,
        tip_floor,
        rpc,
        h.events.clone(),
        Arc::new(AuditLog::in_memory().unwrap()),
        wallet.pubkey().to_string(),
    );

    let mint = Pubkey::new_unique().to_string();
    // Entry: 0.1 SOL for 1M tokens → 1e-7 SOL/token. Current price +35%,
    // above the default 30% take-profit.
    monitor.register_position(&mint, "TST", 0.1, 1_000_000.0, "sigTP");
    price_cache.set_usd(solstrike::constants::WSOL_MINT, 150.0);
    price_cache.set_usd(&mint, 1.35e-7 * 150.0);

    let mut rx = h.events.subscribe();
    monitor.start();

    // Within the first ticks the position must flip to `selling` with the
    // take_profit reason, and exactly once.
    let mut selling_events = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
    while tokio::time::Instant::now() < deadline {
        let Ok(event) = tokio::time::timeout(Duration::from_secs(8), rx.recv()).await else {
            break;
        };
        if let Ok(Event::HftPositionUpdate(update)) = event {
            if update.status == "selling" && update.reason.as_deref() == Some("take_profit") {
                selling_events += 1;
            }
            // Offline, the sell path cannot find a balance and closes the
            // position out with an error status.
            if update.status == "error" {
                break;
            }
        }
    }
    assert_eq!(selling_events, 1);
    assert_eq!(monitor.position_count(), 0);
    monitor.stop();
}

// ── Arb engine configuration ─────────────────────────────────────────

#[tokio::test]
async fn arb_engine_scan_settings_and_pairs() {
    let h = harness();
    let arb = solstrike::ArbEngine::new(
        Arc::new(JupiterClient::new(&h.config)),
        Arc::clone(&h.router),
        Arc::clone(&h.blockhash),
        None,
        h.events.clone(),
        Arc::new(AuditLog::in_memory().unwrap()),
    );

    // Defaults: SOL/USDC both ways.
    let pairs = arb.pairs();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].input_symbol, "SOL");

    // Empty set falls back to defaults; interval clamps at 1s.
    arb.set_pairs(vec![]);
    assert_eq!(arb.pairs().len(), 2);
    arb.update_settings(ArbSettings {
        scan_interval_secs: 0.1,
        ..ArbSettings::default()
    });
    assert_eq!(arb.settings().scan_interval(), Duration::from_secs(1));
}

// ── Quote law ────────────────────────────────────────────────────────

#[test]
fn quote_round_trip_is_never_profitable() {
    let pool = sol_usdc_pool();
    for amount in [1_000u64, 777_777, 1_000_000_000, 250_000_000_000] {
        let out = solstrike::quote_amount_out(&pool, amount, true);
        let back = solstrike::quote_amount_out(&pool, out, false);
        assert!(back <= amount, "{} -> {} -> {}", amount, out, back);
    }
}
