//! Cross-venue arbitrage: scanner and atomic strike executor.
//!
//! Every scan cycle fans one quote request per venue out for each monitored
//! pair, publishes the price matrix, and measures the spread between the
//! best and worst venue. When auto-strike is armed and the spread clears
//! the configured threshold with positive net profit, a two-leg bundle is
//! built through the venue router and submitted atomically: buy on the
//! cheap venue, sell on the expensive one, tip last.

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::blockhash_cache::BlockhashCache;
use crate::bundle_executor::BundleExecutor;
use crate::constants::{ARB_EMIT_SPREAD_PCT, ARB_FLAT_FEE_USD, USDC_MINT, WSOL_MINT};
use crate::events::{ArbOpportunity, Event, EventBus, NotifyLevel, PriceMatrix, StrikeResult};
use crate::jupiter_client::JupiterClient;
use crate::settings::ArbSettings;
use crate::venue_router::{Venue, VenueRouter};

/// Venues scanned for the price matrix.
const SCAN_VENUES: [&str; 4] = ["Raydium", "Orca", "Meteora", "Phoenix"];

/// A pair under arbitrage watch. Persisted by the external settings layer;
/// loaded at startup.
#[derive(Debug, Clone)]
pub struct MonitoredPair {
    pub id: i64,
    pub input_mint: String,
    pub output_mint: String,
    pub input_symbol: String,
    pub output_symbol: String,
    pub amount: u64,
}

impl MonitoredPair {
    /// Default watchlist used when the external store has no pairs yet.
    pub fn defaults() -> Vec<Self> {
        vec![
            MonitoredPair {
                id: 1,
                input_mint: WSOL_MINT.to_string(),
                output_mint: USDC_MINT.to_string(),
                input_symbol: "SOL".to_string(),
                output_symbol: "USDC".to_string(),
                amount: 10 * 1_000_000_000,
            },
            MonitoredPair {
                id: 2,
                input_mint: USDC_MINT.to_string(),
                output_mint: WSOL_MINT.to_string(),
                input_symbol: "USDC".to_string(),
                output_symbol: "SOL".to_string(),
                amount: 1_000 * 1_000_000,
            },
        ]
    }
}

fn symbol_decimals(symbol: &str) -> u32 {
    match symbol {
        "SOL" => 9,
        "USDC" | "USDT" => 6,
        _ => 6,
    }
}

struct ArbInner {
    jupiter: Arc<JupiterClient>,
    router: Arc<VenueRouter>,
    blockhash: Arc<BlockhashCache>,
    /// None when no signing key is configured - scanning still works,
    /// strikes refuse to fire.
    bundles: Option<Arc<BundleExecutor>>,
    events: EventBus,
    audit: Arc<AuditLog>,
    settings: RwLock<ArbSettings>,
    pairs: RwLock<Vec<MonitoredPair>>,
    running: AtomicBool,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ArbEngine {
    inner: Arc<ArbInner>,
}

impl ArbEngine {
    pub fn new(
        jupiter: Arc<JupiterClient>,
        router: Arc<VenueRouter>,
        blockhash: Arc<BlockhashCache>,
        bundles: Option<Arc<BundleExecutor>>,
        events: EventBus,
        audit: Arc<AuditLog>,
    ) -> Self {
        info!("⚡ ArbEngine initialized");
        Self {
            inner: Arc::new(ArbInner {
                jupiter,
                router,
                blockhash,
                bundles,
                events,
                audit,
                settings: RwLock::new(ArbSettings::default()),
                pairs: RwLock::new(MonitoredPair::defaults()),
                running: AtomicBool::new(false),
                scan_task: Mutex::new(None),
            }),
        }
    }

    // ── Configuration ────────────────────────────────────────────────

    pub fn update_settings(&self, settings: ArbSettings) {
        info!(
            "⚡ Arb engine config updated: strike={} tip={} min={}% interval={}s",
            settings.auto_strike,
            settings.jito_tip_sol,
            settings.min_profit_pct,
            settings.scan_interval().as_secs_f64()
        );
        *self.inner.settings.write() = settings;
    }

    pub fn settings(&self) -> ArbSettings {
        self.inner.settings.read().clone()
    }

    /// Replace the watchlist (falls back to defaults when empty).
    pub fn set_pairs(&self, pairs: Vec<MonitoredPair>) {
        let pairs = if pairs.is_empty() {
            MonitoredPair::defaults()
        } else {
            pairs
        };
        info!("⚡ Arb engine refreshed: {} pairs", pairs.len());
        *self.inner.pairs.write() = pairs;
    }

    pub fn pairs(&self) -> Vec<MonitoredPair> {
        self.inner.pairs.read().clone()
    }

    // ── Service lifecycle ────────────────────────────────────────────

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *self.inner.scan_task.lock() = Some(tokio::spawn(scan_loop(inner)));
        info!("⚡ Arb monitor engine started");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.scan_task.lock().take() {
            task.abort();
        }
        info!("⚡ Arb monitor engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

// ── Scan cycle ───────────────────────────────────────────────────────

async fn scan_loop(inner: Arc<ArbInner>) {
    info!("🔄 Arb engine main loop started");
    while inner.running.load(Ordering::SeqCst) {
        let pairs = inner.pairs.read().clone();
        for pair in &pairs {
            check_pair(&inner, pair).await;
        }
        let interval = inner.settings.read().scan_interval();
        tokio::time::sleep(interval).await;
    }
}

async fn check_pair(inner: &Arc<ArbInner>, pair: &MonitoredPair) {
    // One quote per venue, in parallel; failures are dropped.
    let quotes = join_all(SCAN_VENUES.iter().map(|venue| {
        inner
            .jupiter
            .fetch_venue_quote(&pair.input_mint, &pair.output_mint, pair.amount, venue)
    }))
    .await;
    let valid: Vec<_> = quotes.into_iter().flatten().collect();

    let in_decimals = symbol_decimals(&pair.input_symbol);
    let out_decimals = symbol_decimals(&pair.output_symbol);
    let amount_units = pair.amount as f64 / 10f64.powi(in_decimals as i32);

    let mut venues = BTreeMap::new();
    for quote in &valid {
        let out_units = quote.out_amount as f64 / 10f64.powi(out_decimals as i32);
        venues.insert(quote.venue.clone(), out_units / amount_units);
    }
    if !venues.is_empty() {
        inner.events.emit(Event::PriceMatrixUpdate(PriceMatrix {
            pair_id: pair.id,
            input_symbol: pair.input_symbol.clone(),
            output_symbol: pair.output_symbol.clone(),
            venues: venues.clone(),
        }));
    }

    if valid.len() < 2 {
        return;
    }

    let mut sorted = valid;
    sorted.sort_by(|a, b| b.out_amount.cmp(&a.out_amount));
    let best = sorted.first().unwrap().clone();
    let worst = sorted.last().unwrap().clone();

    let diff = best.out_amount - worst.out_amount;
    let spread_pct = diff as f64 / worst.out_amount as f64 * 100.0;
    if spread_pct <= ARB_EMIT_SPREAD_PCT {
        return;
    }

    // Gross profit in USD: stablecoin output directly; SOL output through
    // the best venue's price.
    let gross_profit_usd = if pair.output_symbol == "USDC" {
        diff as f64 / 1e6
    } else if pair.output_symbol == "SOL" {
        let best_price = venues.get(&best.venue).copied().unwrap_or(0.0);
        diff as f64 / 1e9 * best_price
    } else {
        0.0
    };
    let net_profit_usd = (gross_profit_usd - ARB_FLAT_FEE_USD).max(0.0);

    let opportunity = ArbOpportunity {
        pair_id: pair.id,
        input_mint: pair.input_mint.clone(),
        output_mint: pair.output_mint.clone(),
        input_symbol: pair.input_symbol.clone(),
        output_symbol: pair.output_symbol.clone(),
        best_venue: best.venue.clone(),
        worst_venue: worst.venue.clone(),
        best_amount: best.out_amount,
        worst_amount: worst.out_amount,
        spread_pct,
        gross_profit_usd,
        net_profit_usd,
        input_amount: pair.amount,
        best_quote: best.quote,
        worst_quote: worst.quote,
        timestamp: Utc::now(),
    };
    inner
        .events
        .emit(Event::ArbOpportunity(opportunity.clone()));

    let settings = inner.settings.read().clone();
    if settings.auto_strike && spread_pct >= settings.min_profit_pct && net_profit_usd > 0.0 {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            execute_atomic_strike(inner, opportunity).await;
        });
    }
}

// ── Atomic strike ────────────────────────────────────────────────────

/// Build and submit the two-leg bundle for an opportunity.
///
/// Leg 1 buys the input token on the cheap venue (spending the scanned
/// output amount); Leg 2 sells Leg 1's output on the expensive venue.
/// Bundle order is the settlement order - the relay lands all three or
/// nothing.
async fn execute_atomic_strike(inner: Arc<ArbInner>, opp: ArbOpportunity) {
    let strike_start = Instant::now();
    info!(
        "🚀 ATOMIC STRIKE: {}/{} spread={:.3}%",
        opp.input_symbol, opp.output_symbol, opp.spread_pct
    );

    let Some(bundles) = inner.bundles.clone() else {
        error!("No signing key configured - cannot execute strike");
        return;
    };

    let Some((blockhash, _last_valid, blocks_remaining)) = inner.blockhash.usable_blockhash()
    else {
        warn!("Blockhash unavailable or too close to expiry - skipping strike");
        return;
    };
    info!(
        "Using streamed blockhash {}... (valid for {} blocks)",
        &blockhash[..8.min(blockhash.len())],
        blocks_remaining
    );

    let wallet = bundles.wallet().pubkey();
    let settings = inner.settings.read().clone();

    // Leg 1: buy input on the cheap venue - spend the output amount the
    // scanner saw there. Direct-AMM legs build in-memory; network legs just
    // run in sequence since Leg 2's size depends on Leg 1's output.
    let leg1_start = Instant::now();
    let leg1 = inner
        .router
        .build_swap(
            &Venue::from_name(&opp.worst_venue),
            &opp.output_mint,
            &opp.input_mint,
            opp.worst_amount,
            &wallet,
            &blockhash,
            50,
        )
        .await;
    let leg1_ms = leg1_start.elapsed().as_millis() as u64;
    let Some(leg1_tx) = leg1.transaction_b64.clone() else {
        error!("Leg 1 build failed ({})", leg1.method.as_str());
        return;
    };

    // Leg 2: sell Leg 1's output on the expensive venue.
    let leg2_start = Instant::now();
    let leg2 = inner
        .router
        .build_swap(
            &Venue::from_name(&opp.best_venue),
            &opp.input_mint,
            &opp.output_mint,
            leg1.estimated_out,
            &wallet,
            &blockhash,
            50,
        )
        .await;
    let leg2_ms = leg2_start.elapsed().as_millis() as u64;
    let Some(leg2_tx) = leg2.transaction_b64.clone() else {
        error!("Leg 2 build failed ({})", leg2.method.as_str());
        return;
    };

    let profit_raw = leg2.estimated_out as i128 - opp.worst_amount as i128;
    let out_decimals = symbol_decimals(&opp.output_symbol);
    let profit_units = profit_raw as f64 / 10f64.powi(out_decimals as i32);
    info!(
        "📊 Arb calculation: leg1[{} {}ms] {} → {} | leg2[{} {}ms] → {} | profit {:.4} {}",
        leg1.method.as_str(),
        leg1_ms,
        opp.worst_amount,
        leg1.estimated_out,
        leg2.method.as_str(),
        leg2_ms,
        leg2.estimated_out,
        profit_units,
        opp.output_symbol
    );

    if profit_raw <= 0 {
        warn!("⚠️ No profit after routing - aborting strike");
        return;
    }

    let tip_lamports = (settings.jito_tip_sol * 1e9) as u64;
    let outcome = match bundles
        .execute(&[leg1_tx, leg2_tx], tip_lamports, &blockhash)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let elapsed = strike_start.elapsed().as_millis() as u64;
            error!("Strike error ({}ms): {:#}", elapsed, e);
            inner
                .events
                .notify("Arb Strike Error", &format!("{:#}", e), NotifyLevel::Error);
            return;
        }
    };

    let elapsed_ms = strike_start.elapsed().as_millis() as u64;
    let result = StrikeResult {
        success: outcome.success,
        profit: profit_units,
        output_symbol: opp.output_symbol.clone(),
        worst_venue: opp.worst_venue.clone(),
        best_venue: opp.best_venue.clone(),
        leg1_method: leg1.method.as_str().to_string(),
        leg2_method: leg2.method.as_str().to_string(),
        leg1_ms,
        leg2_ms,
        elapsed_ms,
        timestamp: Utc::now(),
    };
    inner.audit.record_strike(&result);

    if outcome.success {
        info!(
            "✅ Arb bundle submitted in {}ms (leg1={}/{}ms, leg2={}/{}ms)",
            elapsed_ms,
            result.leg1_method,
            leg1_ms,
            result.leg2_method,
            leg2_ms
        );
        inner.events.notify(
            "Arb Strike Executed",
            &format!(
                "Atomic arb: {} → {}, expected profit: {:.4} {}",
                opp.worst_venue, opp.best_venue, profit_units, opp.output_symbol
            ),
            NotifyLevel::Success,
        );
    } else {
        error!("❌ Bundle submission failed: {:?}", outcome.submissions);
        inner
            .events
            .notify("Arb Strike Failed", "Bundle rejected by relay", NotifyLevel::Error);
    }
    inner.events.emit(Event::StrikeResult(result));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pairs() {
        let pairs = MonitoredPair::defaults();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].input_symbol, "SOL");
        assert_eq!(pairs[0].amount, 10_000_000_000);
        assert_eq!(pairs[1].amount, 1_000_000_000);
    }

    #[test]
    fn test_symbol_decimals() {
        assert_eq!(symbol_decimals("SOL"), 9);
        assert_eq!(symbol_decimals("USDC"), 6);
        assert_eq!(symbol_decimals("USDT"), 6);
        assert_eq!(symbol_decimals("BONK"), 6);
    }

    #[test]
    fn test_spread_and_net_profit_math() {
        // Mirrors the scanner: 151_000_000 vs 149_500_000 USDC out.
        let best: u64 = 151_000_000;
        let worst: u64 = 149_500_000;
        let diff = best - worst;
        let spread_pct = diff as f64 / worst as f64 * 100.0;
        assert!(spread_pct > 1.0 && spread_pct < 1.01);

        let gross = diff as f64 / 1e6;
        let net = (gross - ARB_FLAT_FEE_USD).max(0.0);
        assert!((gross - 1.5).abs() < 1e-9);
        assert!((net - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_tiny_spread_below_emit_threshold() {
        let best: u64 = 100_000_004;
        let worst: u64 = 100_000_000;
        let spread_pct = (best - worst) as f64 / worst as f64 * 100.0;
        assert!(spread_pct < ARB_EMIT_SPREAD_PCT);
    }
}
