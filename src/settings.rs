//! Runtime-tunable strategy settings.
//!
//! These are stored in the external settings database by the API layer and
//! pushed into the engines via `update_settings`. Field names serialize in
//! camelCase so the `sniper_settings_sync` event matches what the frontend
//! persists.

use serde::{Deserialize, Serialize};

/// Arb scanner / striker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbSettings {
    pub auto_strike: bool,
    /// Tip attached to every strike bundle, in SOL
    pub jito_tip_sol: f64,
    /// Minimum spread (percent) before a strike fires
    pub min_profit_pct: f64,
    /// Scan cycle interval in seconds (clamped to >= 1)
    pub scan_interval_secs: f64,
}

impl Default for ArbSettings {
    fn default() -> Self {
        Self {
            auto_strike: false,
            jito_tip_sol: 0.001,
            min_profit_pct: 0.1,
            scan_interval_secs: 2.0,
        }
    }
}

impl ArbSettings {
    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.scan_interval_secs.max(1.0))
    }
}

/// Which execution path the sniper routes detections into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnipeMode {
    /// Raydium only, full safety checks, hold-oriented
    Graduated,
    /// Pump.fun only, minimal checks, scalp with auto-sell
    Hft,
    /// Route by DEX: Pump.fun fast, Raydium graduated
    Both,
}

/// Sniper configuration, graduated + fast-mode knobs together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SniperSettings {
    pub auto_snipe: bool,
    pub snipe_mode: SnipeMode,

    // Graduated execution
    pub buy_amount: f64,
    pub slippage: f64,
    pub priority_fee: f64,
    pub min_liquidity: f64,
    pub require_mint_renounced: bool,
    pub require_freeze_revoked: bool,
    pub require_lp_burned: bool,
    pub require_socials: bool,
    pub rugcheck_enabled: bool,
    pub rugcheck_score_limit: f64,

    // Graduated hold targets (tracked by the external position layer)
    pub take_profit_enabled: bool,
    pub take_profit_pct: f64,
    pub stop_loss_enabled: bool,
    pub stop_loss_pct: f64,

    // Safety
    pub circuit_breaker_limit: u32,

    // Fast mode
    pub hft_buy_amount: f64,
    pub hft_slippage: f64,
    pub hft_priority_fee: f64,
    pub hft_jito_percentile: String,
    pub hft_max_hold_seconds: f64,
    pub hft_take_profit_pct: f64,
    pub hft_stop_loss_pct: f64,
    pub hft_auto_sell_enabled: bool,
}

impl Default for SniperSettings {
    fn default() -> Self {
        Self {
            auto_snipe: false,
            snipe_mode: SnipeMode::Graduated,
            buy_amount: 0.1,
            slippage: 15.0,
            priority_fee: 0.005,
            min_liquidity: 0.5,
            require_mint_renounced: true,
            require_freeze_revoked: true,
            require_lp_burned: true,
            require_socials: false,
            rugcheck_enabled: true,
            rugcheck_score_limit: 10_000.0,
            take_profit_enabled: true,
            take_profit_pct: 100.0,
            stop_loss_enabled: true,
            stop_loss_pct: 50.0,
            circuit_breaker_limit: 1,
            hft_buy_amount: 0.1,
            hft_slippage: 25.0,
            hft_priority_fee: 0.00005,
            hft_jito_percentile: "95th".to_string(),
            hft_max_hold_seconds: 60.0,
            hft_take_profit_pct: 30.0,
            hft_stop_loss_pct: 25.0,
            hft_auto_sell_enabled: true,
        }
    }
}

impl SniperSettings {
    pub fn slippage_bps(&self) -> u16 {
        (self.slippage * 100.0) as u16
    }

    pub fn hft_slippage_bps(&self) -> u16 {
        (self.hft_slippage * 100.0) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arb_scan_interval_clamped() {
        let mut s = ArbSettings::default();
        s.scan_interval_secs = 0.2;
        assert_eq!(s.scan_interval(), std::time::Duration::from_secs(1));
        s.scan_interval_secs = 5.0;
        assert_eq!(s.scan_interval(), std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_sniper_defaults_match_frontend_contract() {
        let s = SniperSettings::default();
        assert_eq!(s.snipe_mode, SnipeMode::Graduated);
        assert_eq!(s.hft_jito_percentile, "95th");
        assert_eq!(s.slippage_bps(), 1500);
        assert_eq!(s.hft_slippage_bps(), 2500);
    }

    #[test]
    fn test_settings_roundtrip_camel_case() {
        let s = SniperSettings::default();
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("autoSnipe").is_some());
        assert!(json.get("hftMaxHoldSeconds").is_some());
        let back: SniperSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back.circuit_breaker_limit, s.circuit_breaker_limit);
    }

    #[test]
    fn test_partial_settings_deserialize_with_defaults() {
        // A frontend payload that predates the fast-mode knobs still parses.
        let s: SniperSettings =
            serde_json::from_str(r#"{"autoSnipe": true, "buyAmount": 0.25}"#).unwrap();
        assert!(s.auto_snipe);
        assert_eq!(s.buy_amount, 0.25);
        assert_eq!(s.hft_max_hold_seconds, 60.0);
    }
}
