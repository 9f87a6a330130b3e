//! Fast-mode position table and auto-sell monitor.
//!
//! Every confirmed fast-mode buy registers a position here. A 2s loop
//! re-prices each position and schedules an exit on deadline, take-profit
//! or stop-loss. A position is marked `selling` inside the table lock
//! before its sell task is spawned, so no position can ever be sold twice.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::constants::{HFT_MONITOR_INTERVAL, WSOL_MINT};
use crate::events::{Event, EventBus, HftPositionEvent, NotifyLevel};
use crate::price_cache::PriceCache;
use crate::rpc_client::RpcHttpClient;
use crate::settings::SniperSettings;
use crate::tip_floor_cache::{TipFloorCache, TipPercentile};
use crate::trade_executor::TradeExecutor;
use crate::venue_router::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Monitoring,
    Selling,
    Sold,
    Error,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Monitoring => "monitoring",
            PositionStatus::Selling => "selling",
            PositionStatus::Sold => "sold",
            PositionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HftPosition {
    pub mint: String,
    pub symbol: String,
    pub sol_spent: f64,
    pub tokens_received: f64,
    pub entry_price_sol: f64,
    pub entry_time: Instant,
    pub deadline: Instant,
    pub peak_pnl_pct: f64,
    pub current_pnl_pct: f64,
    pub signature: String,
    pub status: PositionStatus,
}

impl HftPosition {
    fn seconds_remaining(&self) -> u64 {
        self.deadline
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SellReason {
    Timeout,
    TakeProfit,
    StopLoss,
}

impl SellReason {
    fn as_str(&self) -> &'static str {
        match self {
            SellReason::Timeout => "timeout",
            SellReason::TakeProfit => "take_profit",
            SellReason::StopLoss => "stop_loss",
        }
    }
}

struct HftInner {
    positions: Mutex<HashMap<String, HftPosition>>,
    settings: Arc<parking_lot::RwLock<SniperSettings>>,
    price_cache: Arc<PriceCache>,
    trades: Arc<TradeExecutor>,
    tip_floor: Arc<TipFloorCache>,
    rpc: Arc<RpcHttpClient>,
    events: EventBus,
    audit: Arc<AuditLog>,
    /// Server wallet address, for holding-balance lookups on exits.
    owner: String,
    running: AtomicBool,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct HftMonitor {
    inner: Arc<HftInner>,
}

impl HftMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<parking_lot::RwLock<SniperSettings>>,
        price_cache: Arc<PriceCache>,
        trades: Arc<TradeExecutor>,
        tip_floor: Arc<TipFloorCache>,
        rpc: Arc<RpcHttpClient>,
        events: EventBus,
        audit: Arc<AuditLog>,
        owner: String,
    ) -> Self {
        Self {
            inner: Arc::new(HftInner {
                positions: Mutex::new(HashMap::new()),
                settings,
                price_cache,
                trades,
                tip_floor,
                rpc,
                events,
                audit,
                owner,
                running: AtomicBool::new(false),
                monitor_task: Mutex::new(None),
            }),
        }
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.positions.lock().clear();
        let inner = Arc::clone(&self.inner);
        *self.inner.monitor_task.lock() = Some(tokio::spawn(monitor_loop(inner)));
        info!("⚡ HFT monitor started");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.monitor_task.lock().take() {
            task.abort();
        }
        info!("⚡ HFT monitor stopped");
    }

    pub fn position_count(&self) -> usize {
        self.inner.positions.lock().len()
    }

    pub fn positions(&self) -> Vec<HftPosition> {
        self.inner.positions.lock().values().cloned().collect()
    }

    /// Register a confirmed fast-mode buy for monitoring.
    pub fn register_position(
        &self,
        mint: &str,
        symbol: &str,
        sol_spent: f64,
        tokens_received: f64,
        signature: &str,
    ) {
        let hold_seconds = self.inner.settings.read().hft_max_hold_seconds;
        let now = Instant::now();
        let position = HftPosition {
            mint: mint.to_string(),
            symbol: symbol.to_string(),
            sol_spent,
            tokens_received,
            entry_price_sol: if tokens_received > 0.0 {
                sol_spent / tokens_received
            } else {
                0.0
            },
            entry_time: now,
            deadline: now + std::time::Duration::from_secs_f64(hold_seconds.max(1.0)),
            peak_pnl_pct: 0.0,
            current_pnl_pct: 0.0,
            signature: signature.to_string(),
            status: PositionStatus::Monitoring,
        };
        let seconds = position.seconds_remaining();
        self.inner
            .positions
            .lock()
            .insert(mint.to_string(), position);
        info!(
            "⚡ HFT position registered: {} - auto-sell in {}s",
            symbol, seconds
        );
        self.inner.events.emit(Event::HftPositionOpened(HftPositionEvent {
            mint: mint.to_string(),
            symbol: symbol.to_string(),
            status: PositionStatus::Monitoring.as_str().to_string(),
            reason: None,
            current_pnl_pct: 0.0,
            peak_pnl_pct: 0.0,
            seconds_remaining: seconds,
            sol_received: None,
            signature: Some(signature.to_string()),
        }));
    }
}

// ── Monitor loop ─────────────────────────────────────────────────────

async fn monitor_loop(inner: Arc<HftInner>) {
    let mut tick = tokio::time::interval(HFT_MONITOR_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    while inner.running.load(Ordering::SeqCst) {
        tick.tick().await;
        run_monitor_tick(&inner).await;
    }
}

async fn run_monitor_tick(inner: &Arc<HftInner>) {
    // Snapshot active positions; price lookups must not hold the lock.
    let active: Vec<String> = {
        let positions = inner.positions.lock();
        positions
            .values()
            .filter(|p| p.status == PositionStatus::Monitoring)
            .map(|p| p.mint.clone())
            .collect()
    };
    if active.is_empty() {
        return;
    }

    let settings = inner.settings.read().clone();
    let mut prices = HashMap::new();
    if settings.hft_auto_sell_enabled {
        for mint in &active {
            prices.insert(mint.clone(), inner.price_cache.token_price_sol(mint).await);
        }
    }

    // Decide exits with the table locked; selling is marked here so a
    // position can never be scheduled twice.
    let mut to_sell: Vec<(String, SellReason)> = Vec::new();
    let mut updates: Vec<HftPositionEvent> = Vec::new();
    {
        let mut positions = inner.positions.lock();
        let now = Instant::now();
        for mint in &active {
            let Some(pos) = positions.get_mut(mint) else {
                continue;
            };
            if pos.status != PositionStatus::Monitoring {
                continue;
            }

            if now >= pos.deadline {
                pos.status = PositionStatus::Selling;
                to_sell.push((mint.clone(), SellReason::Timeout));
                continue;
            }

            if !settings.hft_auto_sell_enabled {
                continue;
            }
            let price = prices.get(mint).copied().unwrap_or(0.0);
            // Price unavailable: wait for the next tick rather than act on
            // stale data.
            if price <= 0.0 || pos.entry_price_sol <= 0.0 {
                continue;
            }

            let pnl_pct = (price - pos.entry_price_sol) / pos.entry_price_sol * 100.0;
            pos.peak_pnl_pct = pos.peak_pnl_pct.max(pnl_pct);
            pos.current_pnl_pct = pnl_pct;
            updates.push(HftPositionEvent {
                mint: mint.clone(),
                symbol: pos.symbol.clone(),
                status: PositionStatus::Monitoring.as_str().to_string(),
                reason: None,
                current_pnl_pct: (pnl_pct * 100.0).round() / 100.0,
                peak_pnl_pct: (pos.peak_pnl_pct * 100.0).round() / 100.0,
                seconds_remaining: pos.seconds_remaining(),
                sol_received: None,
                signature: None,
            });

            if pnl_pct >= settings.hft_take_profit_pct {
                pos.status = PositionStatus::Selling;
                to_sell.push((mint.clone(), SellReason::TakeProfit));
            } else if pnl_pct <= -settings.hft_stop_loss_pct {
                pos.status = PositionStatus::Selling;
                to_sell.push((mint.clone(), SellReason::StopLoss));
            }
        }
    }

    for update in updates {
        inner.events.emit(Event::HftPositionUpdate(update));
    }
    for (mint, reason) in to_sell {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            auto_sell(inner, mint, reason).await;
        });
    }
}

// ── Auto-sell ────────────────────────────────────────────────────────

async fn auto_sell(inner: Arc<HftInner>, mint: String, reason: SellReason) {
    let (symbol, pnl, sol_spent) = {
        let positions = inner.positions.lock();
        let Some(pos) = positions.get(&mint) else {
            return;
        };
        (pos.symbol.clone(), pos.current_pnl_pct, pos.sol_spent)
    };
    info!(
        "⚡ HFT AUTO-SELL: {} reason={} pnl={:.1}%",
        symbol,
        reason.as_str(),
        pnl
    );
    emit_position_update(&inner, &mint, &symbol, PositionStatus::Selling, Some(reason.as_str()), None, None);

    let settings = inner.settings.read().clone();
    let balance = inner
        .rpc
        .get_owner_token_balance(&inner.owner, &mint)
        .await
        .unwrap_or(0);
    if balance == 0 {
        warn!("⚡ HFT auto-sell: no balance for {}", symbol);
        inner.positions.lock().remove(&mint);
        emit_position_update(&inner, &mint, &symbol, PositionStatus::Error, Some("no_balance"), None, None);
        return;
    }

    let percentile = TipPercentile::from_str(&settings.hft_jito_percentile)
        .unwrap_or(TipPercentile::P95);
    let tip_lamports = inner.tip_floor.get_optimal_tip(percentile, None);
    let source = format!("HFT Sell ({}, {})", symbol, reason.as_str());

    let result = inner
        .trades
        .execute_swap(
            &Venue::any(),
            &mint,
            WSOL_MINT,
            balance,
            settings.hft_slippage_bps(),
            tip_lamports,
            &source,
            false,
        )
        .await;

    match result {
        Ok(trade) if trade.submitted => {
            let sol_received = trade.estimated_out as f64 / 1e9;
            info!(
                "✅ HFT SOLD: {} reason={} - {}...",
                symbol,
                reason.as_str(),
                trade
                    .signature
                    .as_deref()
                    .map(|s| &s[..16.min(s.len())])
                    .unwrap_or("")
            );
            inner.positions.lock().remove(&mint);
            inner.audit.record_trade(
                &source,
                &mint,
                &symbol,
                sol_spent,
                trade.signature.as_deref(),
                true,
                trade.confirmed,
                Some(reason.as_str()),
            );
            emit_position_update(
                &inner,
                &mint,
                &symbol,
                PositionStatus::Sold,
                Some(reason.as_str()),
                Some(sol_received),
                trade.signature.clone(),
            );
            inner.events.notify(
                &format!("HFT Auto-Sell ({})", reason.as_str()),
                &format!("{}: P&L {:+.1}%", symbol, pnl),
                NotifyLevel::Info,
            );
        }
        Ok(_) => {
            error!("❌ HFT auto-sell rejected for {}", symbol);
            inner.positions.lock().remove(&mint);
            emit_position_update(&inner, &mint, &symbol, PositionStatus::Error, Some("submit_failed"), None, None);
        }
        Err(e) => {
            error!("❌ HFT auto-sell error for {}: {:#}", symbol, e);
            inner.positions.lock().remove(&mint);
            emit_position_update(&inner, &mint, &symbol, PositionStatus::Error, None, None, None);
        }
    }
}

fn emit_position_update(
    inner: &Arc<HftInner>,
    mint: &str,
    symbol: &str,
    status: PositionStatus,
    reason: Option<&str>,
    sol_received: Option<f64>,
    signature: Option<String>,
) {
    let (current, peak, remaining) = {
        let positions = inner.positions.lock();
        positions
            .get(mint)
            .map(|p| (p.current_pnl_pct, p.peak_pnl_pct, p.seconds_remaining()))
            .unwrap_or((0.0, 0.0, 0))
    };
    inner.events.emit(Event::HftPositionUpdate(HftPositionEvent {
        mint: mint.to_string(),
        symbol: symbol.to_string(),
        status: status.as_str().to_string(),
        reason: reason.map(String::from),
        current_pnl_pct: current,
        peak_pnl_pct: peak,
        seconds_remaining: remaining,
        sol_received,
        signature,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_status_strings() {
        assert_eq!(PositionStatus::Monitoring.as_str(), "monitoring");
        assert_eq!(PositionStatus::Selling.as_str(), "selling");
        assert_eq!(PositionStatus::Sold.as_str(), "sold");
        assert_eq!(PositionStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_sell_reasons() {
        assert_eq!(SellReason::Timeout.as_str(), "timeout");
        assert_eq!(SellReason::TakeProfit.as_str(), "take_profit");
        assert_eq!(SellReason::StopLoss.as_str(), "stop_loss");
    }

    #[test]
    fn test_entry_price_math() {
        // 0.1 SOL for 1_000_000 tokens → 1e-7 SOL per token
        let entry: f64 = 0.1 / 1_000_000.0;
        let tp_price = entry * 1.35;
        let pnl = (tp_price - entry) / entry * 100.0;
        assert!((pnl - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_seconds_remaining_saturates() {
        let pos = HftPosition {
            mint: "m".into(),
            symbol: "s".into(),
            sol_spent: 0.1,
            tokens_received: 1.0,
            entry_price_sol: 0.1,
            entry_time: Instant::now(),
            deadline: Instant::now(), // already due
            peak_pnl_pct: 0.0,
            current_pnl_pct: 0.0,
            signature: String::new(),
            status: PositionStatus::Monitoring,
        };
        assert_eq!(pos.seconds_remaining(), 0);
    }
}
