//! Sniper engine - new-pool detection and two-mode execution.
//!
//! A 1s poll over the Raydium and Pump.fun programs surfaces launch
//! signatures; each unseen signature is decoded in a background task and
//! classified. Graduated mode runs the full safety battery and places a
//! hold-oriented buy; fast mode skips to a bounded-latency scalp whose
//! position is handed to the HFT monitor. A per-arm circuit breaker
//! disarms the sniper after a configured number of strikes.

use anyhow::{anyhow, Result};
use chrono::Utc;
use lru::LruCache;
use nonzero_ext::nonzero;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::constants::{
    sol_to_lamports, PUMPFUN_PROGRAM_ID, RAYDIUM_V4_PROGRAM_ID, SNIPER_POLL_INTERVAL, USDC_MINT,
    WSOL_MINT,
};
use crate::events::{Event, EventBus, NotifyLevel, TokenDetected};
use crate::hft_monitor::HftMonitor;
use crate::rpc_client::RpcHttpClient;
use crate::settings::{SnipeMode, SniperSettings};
use crate::tip_floor_cache::{TipFloorCache, TipPercentile};
use crate::trade_executor::TradeExecutor;
use crate::trade_guard::{TradeGuard, HFT_MAX_CONCURRENT};
use crate::venue_router::Venue;

/// Program addresses that are touched during pool creation, per DEX.
const MONITORS: [(&str, &str); 2] = [
    ("Raydium", RAYDIUM_V4_PROGRAM_ID),
    ("Pump.fun", PUMPFUN_PROGRAM_ID),
];

/// Signatures fetched per program per poll.
const SIGNATURES_PER_POLL: usize = 20;

struct SniperInner {
    rpc: Arc<RpcHttpClient>,
    settings: Arc<RwLock<SniperSettings>>,
    guard: Arc<TradeGuard>,
    trades: Arc<TradeExecutor>,
    tip_floor: Arc<TipFloorCache>,
    hft: HftMonitor,
    events: EventBus,
    audit: Arc<AuditLog>,
    seen_signatures: Mutex<LruCache<String, ()>>,
    snipe_count: AtomicU32,
    running: AtomicBool,
    detect_task: Mutex<Option<JoinHandle<()>>>,
    /// Server wallet address, for holding lookups on manual sells.
    owner: String,
}

#[derive(Clone)]
pub struct SniperEngine {
    inner: Arc<SniperInner>,
}

impl SniperEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<RpcHttpClient>,
        settings: Arc<RwLock<SniperSettings>>,
        guard: Arc<TradeGuard>,
        trades: Arc<TradeExecutor>,
        tip_floor: Arc<TipFloorCache>,
        hft: HftMonitor,
        events: EventBus,
        audit: Arc<AuditLog>,
        owner: String,
    ) -> Self {
        Self {
            inner: Arc::new(SniperInner {
                rpc,
                settings,
                guard,
                trades,
                tip_floor,
                hft,
                events,
                audit,
                seen_signatures: Mutex::new(LruCache::new(nonzero!(10_000usize))),
                snipe_count: AtomicU32::new(0),
                running: AtomicBool::new(false),
                detect_task: Mutex::new(None),
                owner,
            }),
        }
    }

    // ── Service lifecycle ────────────────────────────────────────────

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *self.inner.detect_task.lock() = Some(tokio::spawn(detection_loop(inner)));
        self.inner.hft.start();
        info!("🎯 Sniper discovery engine + HFT monitor started");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.detect_task.lock().take() {
            task.abort();
        }
        self.inner.hft.stop();
        info!("🎯 Sniper discovery engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn hft_monitor(&self) -> &HftMonitor {
        &self.inner.hft
    }

    pub fn settings(&self) -> SniperSettings {
        self.inner.settings.read().clone()
    }

    /// Apply new settings. Re-arming resets the circuit breaker.
    pub fn update_settings(&self, new_settings: SniperSettings) {
        let was_armed = self.inner.settings.read().auto_snipe;
        let now_armed = new_settings.auto_snipe;
        if now_armed && !was_armed {
            self.inner.snipe_count.store(0, Ordering::SeqCst);
            info!("🔌 Circuit breaker reset (re-armed)");
        }
        let mode = new_settings.snipe_mode;
        *self.inner.settings.write() = new_settings.clone();
        info!(
            "🎯 Settings updated: mode={:?} auto_snipe={}",
            mode,
            if now_armed { "ON" } else { "OFF" }
        );
        self.inner.events.emit(Event::SniperSettingsSync(new_settings));
        self.inner.events.emit(Event::SniperStatus {
            armed: now_armed,
            detecting: self.is_running(),
        });
    }

    pub fn snipe_count(&self) -> u32 {
        self.inner.snipe_count.load(Ordering::SeqCst)
    }

    /// Manual position exit: swap the full holding back to wrapped SOL.
    pub async fn sell_position(
        &self,
        mint: &str,
        symbol: &str,
        slippage_bps: u16,
    ) -> Result<String> {
        let inner = &self.inner;
        info!("Sell requested: {} ({}...) slippage={}bps", symbol, &mint[..8.min(mint.len())], slippage_bps);

        let balance = inner.rpc.get_owner_token_balance(&inner.owner, mint).await?;
        if balance == 0 {
            return Err(anyhow!("no {} balance found in wallet", symbol));
        }

        let tip_lamports = inner.tip_floor.get_optimal_tip(TipPercentile::P75, None);
        let source = format!("Snipe Sell ({})", symbol);
        let trade = inner
            .trades
            .execute_swap(
                &Venue::any(),
                mint,
                WSOL_MINT,
                balance,
                slippage_bps,
                tip_lamports,
                &source,
                false,
            )
            .await?;

        if !trade.submitted {
            inner.events.notify(
                "Snipe Sell Failed",
                &format!("{}: bundle rejected by relay", symbol),
                NotifyLevel::Error,
            );
            return Err(anyhow!("sell bundle rejected"));
        }

        let signature = trade.signature.clone().unwrap_or_default();
        inner.audit.record_trade(
            &source,
            mint,
            symbol,
            0.0,
            trade.signature.as_deref(),
            true,
            trade.confirmed,
            Some("manual_sell"),
        );
        inner.events.notify(
            "Snipe Sell Submitted",
            &format!("{} → SOL ({}...)", symbol, &signature[..16.min(signature.len())]),
            NotifyLevel::Success,
        );
        Ok(signature)
    }

    /// Route a detected token into the armed execution path. The detection
    /// loop calls this; the API layer can also inject a token manually.
    pub async fn attempt_auto_snipe(&self, token: TokenDetected) {
        attempt_auto_snipe(&self.inner, token).await;
    }
}

// ── Detection loop ───────────────────────────────────────────────────

async fn detection_loop(inner: Arc<SniperInner>) {
    info!("🎯 Sniper main loop: entering scanning phase");
    let mut cycle = 0u64;
    let mut tick = tokio::time::interval(SNIPER_POLL_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    while inner.running.load(Ordering::SeqCst) {
        tick.tick().await;
        poll_launches(&inner).await;
        cycle += 1;
        if cycle % 30 == 0 {
            let mode = inner.settings.read().snipe_mode;
            info!(
                "🎯 Heartbeat: cycle {} | mode={:?} | HFT positions={}",
                cycle,
                mode,
                inner.hft.position_count()
            );
        }
    }
}

async fn poll_launches(inner: &Arc<SniperInner>) {
    for (dex_name, program) in MONITORS {
        let sigs = match inner
            .rpc
            .get_signatures_for_address(program, SIGNATURES_PER_POLL)
            .await
        {
            Ok(sigs) => sigs,
            Err(e) => {
                warn!("🎯 Poll error ({}): {:#}", dex_name, e);
                continue;
            }
        };

        let mut fresh = Vec::new();
        {
            let mut seen = inner.seen_signatures.lock();
            for sig in sigs {
                if seen.contains(&sig) {
                    continue;
                }
                seen.put(sig.clone(), ());
                fresh.push(sig);
            }
        }
        if fresh.is_empty() {
            continue;
        }
        debug!("🎯 Found {} new signatures on {}", fresh.len(), dex_name);
        for sig in fresh {
            let inner = Arc::clone(inner);
            let dex = dex_name.to_string();
            tokio::spawn(async move {
                process_launch(inner, sig, dex).await;
            });
        }
    }
}

// ── Signature processing ─────────────────────────────────────────────

async fn process_launch(inner: Arc<SniperInner>, signature: String, dex_name: String) {
    let tx = match inner.rpc.get_transaction_json(&signature).await {
        Ok(Some(tx)) => tx,
        Ok(None) => return,
        Err(e) => {
            debug!("🎯 Transaction fetch failed ({}...): {:#}", &signature[..12.min(signature.len())], e);
            return;
        }
    };
    let Some(meta) = tx.get("meta").filter(|m| !m.is_null()) else {
        return;
    };

    // Launch classification by log content.
    let logs = meta
        .get("logMessages")
        .and_then(|l| l.as_array())
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| m.as_str())
                .collect::<String>()
                .to_lowercase()
        })
        .unwrap_or_default();
    match dex_name.as_str() {
        "Raydium" if !logs.contains("initialize2") => return,
        "Pump.fun" if !logs.contains("create") => return,
        _ => {}
    }

    let Some(new_mint) = extract_new_mint(meta) else {
        return;
    };
    let sol_delta = max_sol_delta(meta);

    let min_liquidity = inner.settings.read().min_liquidity;
    if sol_delta < min_liquidity {
        return;
    }

    // Asset metadata drives the rug heuristics.
    let asset = match inner.rpc.get_asset(&new_mint).await {
        Ok(Some(asset)) => asset,
        Ok(None) => Value::Null,
        Err(e) => {
            error!("Metadata error for {}: {:#}", new_mint, e);
            return;
        }
    };
    let token = assemble_token(&new_mint, &dex_name, sol_delta, &asset);

    let rug_status = if token.is_rug { "⚠️ RUG RISK" } else { "✅ SAFE" };
    info!(
        "🚀 SNIPER ALERT: {} | LIQ: {:.2} SOL | {} | DEX: {}",
        token.symbol, sol_delta, rug_status, dex_name
    );
    inner.audit.record_detected_token(&token);
    inner.events.emit(Event::NewTokenDetected(token.clone()));

    if inner.settings.read().auto_snipe {
        attempt_auto_snipe(&inner, token).await;
    }
}

fn extract_new_mint(meta: &Value) -> Option<String> {
    let balances = meta.get("postTokenBalances")?.as_array()?;
    for balance in balances {
        let mint = balance.get("mint").and_then(|m| m.as_str())?;
        if mint != WSOL_MINT && mint != USDC_MINT {
            return Some(mint.to_string());
        }
    }
    None
}

/// Initial liquidity estimate: the largest positive SOL delta across the
/// transaction's accounts.
fn max_sol_delta(meta: &Value) -> f64 {
    let pre = meta
        .get("preBalances")
        .and_then(|b| b.as_array())
        .cloned()
        .unwrap_or_default();
    let post = meta
        .get("postBalances")
        .and_then(|b| b.as_array())
        .cloned()
        .unwrap_or_default();
    pre.iter()
        .zip(post.iter())
        .filter_map(|(pre, post)| Some((post.as_i64()? - pre.as_i64()?) as f64 / 1e9))
        .fold(0.0, f64::max)
}

fn assemble_token(mint: &str, dex_name: &str, sol_delta: f64, asset: &Value) -> TokenDetected {
    let token_info = asset.get("token_info").cloned().unwrap_or(Value::Null);
    let metadata = asset.pointer("/content/metadata").cloned().unwrap_or(Value::Null);
    let mint_authority = token_info
        .get("mint_authority")
        .and_then(|a| a.as_str())
        .map(String::from);
    let freeze_authority = token_info
        .get("freeze_authority")
        .and_then(|a| a.as_str())
        .map(String::from);
    let symbol = token_info
        .get("symbol")
        .or_else(|| metadata.get("symbol"))
        .and_then(|s| s.as_str())
        .unwrap_or("???")
        .to_string();
    let name = metadata
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("Unknown Token")
        .to_string();

    TokenDetected {
        mint: mint.to_string(),
        symbol,
        name,
        dex_id: dex_name.to_string(),
        initial_liquidity: (sol_delta * 100.0).round() / 100.0,
        is_rug: mint_authority.is_some() || freeze_authority.is_some(),
        mint_authority,
        freeze_authority,
        socials: asset
            .pointer("/content/links")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        detected_at: Utc::now(),
    }
}

// ── Mode router & circuit breaker ────────────────────────────────────

async fn attempt_auto_snipe(inner: &Arc<SniperInner>, token: TokenDetected) {
    let settings = inner.settings.read().clone();
    let fired = inner.snipe_count.load(Ordering::SeqCst);

    // Disarm before the attempt once the per-arm limit is reached.
    if fired >= settings.circuit_breaker_limit {
        warn!(
            "🔌 CIRCUIT BREAKER: {}/{} snipes fired - disarming. Skipping {}",
            fired, settings.circuit_breaker_limit, token.symbol
        );
        {
            let mut settings = inner.settings.write();
            settings.auto_snipe = false;
        }
        inner.events.emit(Event::SniperStatus {
            armed: false,
            detecting: inner.running.load(Ordering::SeqCst),
        });
        inner.events.notify(
            "Circuit Breaker Tripped",
            &format!("Sniper disarmed after {} snipe(s). Re-arm to continue.", fired),
            NotifyLevel::Warning,
        );
        return;
    }

    match settings.snipe_mode {
        SnipeMode::Graduated => {
            if token.dex_id == "Pump.fun" {
                info!("⏭️ Graduated mode: skipping Pump.fun token {}", token.symbol);
                return;
            }
            execute_graduated_snipe(inner, token, &settings).await;
        }
        SnipeMode::Hft => {
            if token.dex_id != "Pump.fun" {
                info!(
                    "⏭️ HFT mode: skipping non-Pump.fun token {} ({})",
                    token.symbol, token.dex_id
                );
                return;
            }
            execute_hft_snipe(inner, token, &settings).await;
        }
        SnipeMode::Both => {
            if token.dex_id == "Pump.fun" {
                execute_hft_snipe(inner, token, &settings).await;
            } else {
                execute_graduated_snipe(inner, token, &settings).await;
            }
        }
    }
}

// ── Graduated execution ──────────────────────────────────────────────

async fn execute_graduated_snipe(
    inner: &Arc<SniperInner>,
    token: TokenDetected,
    settings: &SniperSettings,
) {
    if let Err(e) = inner.guard.validate_token_safety(&token, settings, None) {
        warn!("🛡️ Graduated BLOCKED (safety): {:#}", e);
        inner
            .events
            .notify("Graduated Snipe Blocked", &format!("{:#}", e), NotifyLevel::Warning);
        return;
    }
    if let Err(e) = inner.guard.validate_trade(settings.buy_amount, settings.slippage) {
        warn!("⚠️ Graduated trade blocked: {:#}", e);
        inner
            .events
            .notify("Graduated Snipe Blocked", &format!("{:#}", e), NotifyLevel::Warning);
        return;
    }

    let user_min = (sol_to_lamports(settings.priority_fee)).max(1_000);
    let tip_lamports = inner
        .tip_floor
        .get_optimal_tip(TipPercentile::P75, Some(user_min));
    info!(
        "🎓 GRADUATED SNIPE: {} for {} SOL (slippage: {}%, tip: {:.6} SOL, dex: {})",
        token.symbol,
        settings.buy_amount,
        settings.slippage,
        tip_lamports as f64 / 1e9,
        token.dex_id
    );

    let buy_amount = settings.buy_amount;
    let slippage_bps = settings.slippage_bps();
    let task_inner = Arc::clone(inner);
    let task_token = token.clone();
    tokio::spawn(async move {
        let result = task_inner
            .trades
            .execute_swap(
                &Venue::Raydium,
                WSOL_MINT,
                &task_token.mint,
                sol_to_lamports(buy_amount),
                slippage_bps,
                tip_lamports,
                &format!("Graduated Snipe ({})", task_token.symbol),
                false,
            )
            .await;
        match result {
            Ok(trade) => {
                info!("✅ GRADUATED SUCCESS: {} - {:?}", task_token.symbol, trade.signature);
                task_inner.audit.record_trade(
                    "graduated_snipe",
                    &task_token.mint,
                    &task_token.symbol,
                    buy_amount,
                    trade.signature.as_deref(),
                    trade.submitted,
                    trade.confirmed,
                    None,
                );
            }
            Err(e) => error!("❌ GRADUATED FAILED: {} - {:#}", task_token.symbol, e),
        }
    });

    let fired = inner.snipe_count.fetch_add(1, Ordering::SeqCst) + 1;
    info!(
        "🔌 Circuit breaker: {}/{} snipes fired",
        fired, settings.circuit_breaker_limit
    );
    inner.events.notify(
        "Graduated Snipe Fired",
        &format!("{} via {}", token.symbol, token.dex_id),
        NotifyLevel::Success,
    );
}

// ── Fast execution ───────────────────────────────────────────────────

async fn execute_hft_snipe(
    inner: &Arc<SniperInner>,
    token: TokenDetected,
    settings: &SniperSettings,
) {
    if inner.hft.position_count() >= HFT_MAX_CONCURRENT {
        info!(
            "⏭️ HFT: max {} concurrent positions - skipping {}",
            HFT_MAX_CONCURRENT, token.symbol
        );
        return;
    }
    if let Err(e) = inner.guard.validate_hft_snipe(&token, settings.hft_buy_amount) {
        warn!("🛡️ HFT BLOCKED: {:#}", e);
        inner
            .events
            .notify("HFT Snipe Blocked", &format!("{:#}", e), NotifyLevel::Warning);
        return;
    }

    let user_min = (sol_to_lamports(settings.hft_priority_fee)).max(1_000);
    let percentile = TipPercentile::from_str(&settings.hft_jito_percentile)
        .unwrap_or(TipPercentile::P95);
    let tip_lamports = inner.tip_floor.get_optimal_tip(percentile, Some(user_min));
    info!(
        "⚡ HFT SNIPE: {} for {} SOL (slippage: {}%, tip: {:.6} SOL, jito: {})",
        token.symbol,
        settings.hft_buy_amount,
        settings.hft_slippage,
        tip_lamports as f64 / 1e9,
        settings.hft_jito_percentile
    );

    let buy_amount = settings.hft_buy_amount;
    let slippage_bps = settings.hft_slippage_bps();
    let task_inner = Arc::clone(inner);
    let task_token = token.clone();
    tokio::spawn(async move {
        let result = task_inner
            .trades
            .execute_swap(
                &Venue::any(),
                WSOL_MINT,
                &task_token.mint,
                sol_to_lamports(buy_amount),
                slippage_bps,
                tip_lamports,
                &format!("HFT Snipe ({})", task_token.symbol),
                true,
            )
            .await;
        match result {
            Ok(trade) if trade.confirmed => {
                info!("✅ HFT SUCCESS: {} - {:?}", task_token.symbol, trade.signature);
                task_inner.audit.record_trade(
                    "hft_snipe",
                    &task_token.mint,
                    &task_token.symbol,
                    buy_amount,
                    trade.signature.as_deref(),
                    true,
                    true,
                    None,
                );
                // A position exists only once the buy is on-chain.
                task_inner.hft.register_position(
                    &task_token.mint,
                    &task_token.symbol,
                    buy_amount,
                    trade.estimated_out as f64,
                    trade.signature.as_deref().unwrap_or(""),
                );
            }
            Ok(trade) => {
                error!(
                    "❌ HFT TX FAILED ON-CHAIN: {} - sig={}... (no position registered)",
                    task_token.symbol,
                    trade
                        .signature
                        .as_deref()
                        .map(|s| &s[..16.min(s.len())])
                        .unwrap_or("")
                );
                task_inner.events.notify(
                    "HFT Snipe Failed",
                    &format!("{}: tx reverted on-chain", task_token.symbol),
                    NotifyLevel::Error,
                );
            }
            Err(e) => error!("❌ HFT FAILED: {} - {:#}", task_token.symbol, e),
        }
    });

    let fired = inner.snipe_count.fetch_add(1, Ordering::SeqCst) + 1;
    info!(
        "🔌 Circuit breaker: {}/{} snipes fired",
        fired, settings.circuit_breaker_limit
    );
    inner.events.notify(
        "HFT Snipe Fired",
        &format!("⚡ {} on Pump.fun bonding curve", token.symbol),
        NotifyLevel::Success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_new_mint_skips_majors() {
        let meta = json!({
            "postTokenBalances": [
                {"mint": WSOL_MINT},
                {"mint": USDC_MINT},
                {"mint": "NewMint1111111111111111111111111111111111111"},
            ]
        });
        assert_eq!(
            extract_new_mint(&meta).as_deref(),
            Some("NewMint1111111111111111111111111111111111111")
        );

        let only_majors = json!({"postTokenBalances": [{"mint": WSOL_MINT}]});
        assert!(extract_new_mint(&only_majors).is_none());
    }

    #[test]
    fn test_max_sol_delta() {
        let meta = json!({
            "preBalances": [10_000_000_000u64, 5_000_000_000u64, 1_000_000_000u64],
            "postBalances": [8_000_000_000u64, 7_000_000_000u64, 1_000_000_000u64],
        });
        // deltas: -2, +2, 0 → max = 2.0 SOL
        assert!((max_sol_delta(&meta) - 2.0).abs() < 1e-9);

        assert_eq!(max_sol_delta(&json!({})), 0.0);
    }

    #[test]
    fn test_assemble_token_rug_flags() {
        let asset = json!({
            "token_info": {"symbol": "NEW", "mint_authority": "SomeAuth"},
            "content": {"metadata": {"name": "New Token"}, "links": {"twitter": "t"}},
        });
        let token = assemble_token("Mint1", "Raydium", 2.0, &asset);
        assert!(token.is_rug);
        assert_eq!(token.symbol, "NEW");
        assert_eq!(token.name, "New Token");
        assert_eq!(token.mint_authority.as_deref(), Some("SomeAuth"));
        assert!(token.freeze_authority.is_none());

        let clean = json!({
            "token_info": {"symbol": "OK"},
            "content": {"metadata": {}, "links": {}},
        });
        let token = assemble_token("Mint2", "Pump.fun", 1.0, &clean);
        assert!(!token.is_rug);
    }

    #[test]
    fn test_assemble_token_defaults_on_missing_metadata() {
        let token = assemble_token("Mint3", "Raydium", 0.7, &Value::Null);
        assert_eq!(token.symbol, "???");
        assert_eq!(token.name, "Unknown Token");
        assert!(!token.is_rug);
        assert_eq!(token.initial_liquidity, 0.7);
    }
}
