//! Local event bus.
//!
//! The core emits typed events onto a process-local broadcast channel; the
//! out-of-scope API layer subscribes and fans them out to clients. Delivery
//! is at-least-once for local subscribers - a send with no receivers is not
//! an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Severity for user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Per-pair venue price matrix produced by each arb scan cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PriceMatrix {
    pub pair_id: i64,
    pub input_symbol: String,
    pub output_symbol: String,
    /// venue name -> output/input price
    pub venues: BTreeMap<String, f64>,
}

/// Transient arbitrage opportunity, consumed by the executor or discarded.
#[derive(Debug, Clone, Serialize)]
pub struct ArbOpportunity {
    pub pair_id: i64,
    pub input_mint: String,
    pub output_mint: String,
    pub input_symbol: String,
    pub output_symbol: String,
    pub best_venue: String,
    pub worst_venue: String,
    pub best_amount: u64,
    pub worst_amount: u64,
    pub spread_pct: f64,
    pub gross_profit_usd: f64,
    pub net_profit_usd: f64,
    pub input_amount: u64,
    pub best_quote: Value,
    pub worst_quote: Value,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of an atomic strike attempt.
#[derive(Debug, Clone, Serialize)]
pub struct StrikeResult {
    pub success: bool,
    pub profit: f64,
    pub output_symbol: String,
    pub worst_venue: String,
    pub best_venue: String,
    pub leg1_method: String,
    pub leg2_method: String,
    pub leg1_ms: u64,
    pub leg2_ms: u64,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A newly launched token surfaced by the sniper detector.
#[derive(Debug, Clone, Serialize)]
pub struct TokenDetected {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub dex_id: String,
    pub initial_liquidity: f64,
    pub is_rug: bool,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
    pub socials: Value,
    pub detected_at: DateTime<Utc>,
}

/// Live state of a fast-mode position.
#[derive(Debug, Clone, Serialize)]
pub struct HftPositionEvent {
    pub mint: String,
    pub symbol: String,
    pub status: String,
    pub reason: Option<String>,
    pub current_pnl_pct: f64,
    pub peak_pnl_pct: f64,
    pub seconds_remaining: u64,
    pub sol_received: Option<f64>,
    pub signature: Option<String>,
}

/// Whale transaction spotted on the pre-execution stream.
#[derive(Debug, Clone, Serialize)]
pub struct WhaleSwap {
    pub wallet: String,
    pub signature: String,
    pub slot: u64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub level: NotifyLevel,
}

/// Union of everything the core publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "data", rename_all = "snake_case")]
pub enum Event {
    PriceMatrixUpdate(PriceMatrix),
    ArbOpportunity(ArbOpportunity),
    StrikeResult(StrikeResult),
    NewTokenDetected(TokenDetected),
    SniperStatus { armed: bool, detecting: bool },
    SniperSettingsSync(crate::settings::SniperSettings),
    HftPositionOpened(HftPositionEvent),
    HftPositionUpdate(HftPositionEvent),
    WhaleSwapDetected(WhaleSwap),
    Notification(Notification),
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::PriceMatrixUpdate(_) => "price_matrix_update",
            Event::ArbOpportunity(_) => "arb_opportunity",
            Event::StrikeResult(_) => "strike_result",
            Event::NewTokenDetected(_) => "new_token_detected",
            Event::SniperStatus { .. } => "sniper_status",
            Event::SniperSettingsSync(_) => "sniper_settings_sync",
            Event::HftPositionOpened(_) => "hft_position_opened",
            Event::HftPositionUpdate(_) => "hft_position_update",
            Event::WhaleSwapDetected(_) => "whale_swap_detected",
            Event::Notification(_) => "notification",
        }
    }
}

/// Broadcast bus shared by every engine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Lagging or absent subscribers never block the
    /// emitter.
    pub fn emit(&self, event: Event) {
        trace!(topic = event.topic(), "emit");
        let _ = self.tx.send(event);
    }

    /// Shorthand for user-facing notifications.
    pub fn notify(&self, title: &str, message: &str, level: NotifyLevel) {
        self.emit(Event::Notification(Notification {
            title: title.to_string(),
            message: message.to_string(),
            level,
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.notify("t", "m", NotifyLevel::Info);
    }

    #[tokio::test]
    async fn test_subscriber_receives_topic_tagged_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(Event::SniperStatus {
            armed: true,
            detecting: false,
        });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.topic(), "sniper_status");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["topic"], "sniper_status");
        assert_eq!(json["data"]["armed"], true);
    }

    #[test]
    fn test_notification_serializes_type_field() {
        let n = Notification {
            title: "a".into(),
            message: "b".into(),
            level: NotifyLevel::Warning,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "warning");
    }
}
