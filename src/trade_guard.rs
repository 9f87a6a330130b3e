//! Pre-trade safety validation.
//!
//! Two tiers: the graduated validator runs the full battery (blocklist,
//! authority policy, liquidity, socials, score), the fast-mode validator
//! only what can be checked without adding latency (blocklist, freeze
//! authority, amount cap). A rejection aborts the trade and surfaces as a
//! user notification; it is never retried.

use anyhow::{bail, Result};
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::events::TokenDetected;
use crate::settings::SniperSettings;

/// Hard cap on any single graduated buy.
pub const MAX_TRADE_SOL: f64 = 5.0;
/// Hard cap on any single fast-mode buy.
pub const HFT_MAX_BUY_SOL: f64 = 0.5;
/// Widest slippage accepted on any path.
pub const MAX_SLIPPAGE_PCT: f64 = 50.0;
/// Fast-mode concurrent position ceiling.
pub const HFT_MAX_CONCURRENT: usize = 3;

#[derive(Default)]
pub struct TradeGuard {
    blocklist: RwLock<HashSet<String>>,
}

impl TradeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_mint(&self, mint: &str) {
        self.blocklist.write().insert(mint.to_string());
    }

    pub fn is_blocked(&self, mint: &str) -> bool {
        self.blocklist.read().contains(mint)
    }

    /// Full graduated-mode token safety battery.
    pub fn validate_token_safety(
        &self,
        token: &TokenDetected,
        settings: &SniperSettings,
        rug_score: Option<f64>,
    ) -> Result<()> {
        if self.is_blocked(&token.mint) {
            bail!("token {} is blocklisted", token.symbol);
        }
        if settings.require_mint_renounced && token.mint_authority.is_some() {
            bail!("mint authority not renounced for {}", token.symbol);
        }
        if settings.require_freeze_revoked && token.freeze_authority.is_some() {
            bail!("freeze authority still present for {}", token.symbol);
        }
        if token.initial_liquidity < settings.min_liquidity {
            bail!(
                "liquidity {:.2} SOL below minimum {:.2} SOL",
                token.initial_liquidity,
                settings.min_liquidity
            );
        }
        if settings.require_socials {
            let has_socials = token
                .socials
                .as_object()
                .map(|o| !o.is_empty())
                .unwrap_or(false);
            if !has_socials {
                bail!("{} has no socials", token.symbol);
            }
        }
        if settings.rugcheck_enabled {
            if let Some(score) = rug_score {
                if score > settings.rugcheck_score_limit {
                    bail!(
                        "risk score {:.0} exceeds limit {:.0} for {}",
                        score,
                        settings.rugcheck_score_limit,
                        token.symbol
                    );
                }
            }
        }
        Ok(())
    }

    /// Per-trade parameter caps, shared by every buy path.
    pub fn validate_trade(&self, amount_sol: f64, slippage_pct: f64) -> Result<()> {
        if amount_sol <= 0.0 {
            bail!("trade amount must be positive");
        }
        if amount_sol > MAX_TRADE_SOL {
            bail!(
                "trade amount {:.2} SOL exceeds cap of {:.2} SOL",
                amount_sol,
                MAX_TRADE_SOL
            );
        }
        if slippage_pct > MAX_SLIPPAGE_PCT {
            bail!(
                "slippage {:.1}% exceeds cap of {:.1}%",
                slippage_pct,
                MAX_SLIPPAGE_PCT
            );
        }
        Ok(())
    }

    /// Minimal fast-mode check: everything else trades safety for latency.
    pub fn validate_hft_snipe(&self, token: &TokenDetected, amount_sol: f64) -> Result<()> {
        if self.is_blocked(&token.mint) {
            bail!("token {} is blocklisted", token.symbol);
        }
        if token.freeze_authority.is_some() {
            bail!("freeze authority present for {} - honeypot risk", token.symbol);
        }
        if amount_sol <= 0.0 || amount_sol > HFT_MAX_BUY_SOL {
            bail!(
                "fast-mode amount {:.2} SOL outside (0, {:.2}]",
                amount_sol,
                HFT_MAX_BUY_SOL
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn token(mint_auth: Option<&str>, freeze_auth: Option<&str>, liquidity: f64) -> TokenDetected {
        TokenDetected {
            mint: "Mint11111111111111111111111111111111111111".into(),
            symbol: "TEST".into(),
            name: "Test Token".into(),
            dex_id: "Raydium".into(),
            initial_liquidity: liquidity,
            is_rug: mint_auth.is_some() || freeze_auth.is_some(),
            mint_authority: mint_auth.map(String::from),
            freeze_authority: freeze_auth.map(String::from),
            socials: json!({}),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_clean_token_passes_graduated() {
        let guard = TradeGuard::new();
        let settings = SniperSettings::default();
        assert!(guard
            .validate_token_safety(&token(None, None, 2.0), &settings, None)
            .is_ok());
    }

    #[test]
    fn test_mint_authority_rejected_when_required() {
        let guard = TradeGuard::new();
        let settings = SniperSettings::default();
        let err = guard
            .validate_token_safety(&token(Some("Auth"), None, 2.0), &settings, None)
            .unwrap_err();
        assert!(err.to_string().contains("mint authority"));

        let mut relaxed = settings.clone();
        relaxed.require_mint_renounced = false;
        assert!(guard
            .validate_token_safety(&token(Some("Auth"), None, 2.0), &relaxed, None)
            .is_ok());
    }

    #[test]
    fn test_liquidity_floor() {
        let guard = TradeGuard::new();
        let settings = SniperSettings::default(); // min 0.5 SOL
        assert!(guard
            .validate_token_safety(&token(None, None, 0.3), &settings, None)
            .is_err());
    }

    #[test]
    fn test_socials_requirement() {
        let guard = TradeGuard::new();
        let mut settings = SniperSettings::default();
        settings.require_socials = true;
        let mut t = token(None, None, 2.0);
        assert!(guard.validate_token_safety(&t, &settings, None).is_err());
        t.socials = json!({"twitter": "https://x.com/test"});
        assert!(guard.validate_token_safety(&t, &settings, None).is_ok());
    }

    #[test]
    fn test_rug_score_limit() {
        let guard = TradeGuard::new();
        let settings = SniperSettings::default(); // limit 10_000
        let t = token(None, None, 2.0);
        assert!(guard
            .validate_token_safety(&t, &settings, Some(20_000.0))
            .is_err());
        assert!(guard
            .validate_token_safety(&t, &settings, Some(5_000.0))
            .is_ok());
        // no score available → check skipped
        assert!(guard.validate_token_safety(&t, &settings, None).is_ok());
    }

    #[test]
    fn test_blocklist_applies_everywhere() {
        let guard = TradeGuard::new();
        let t = token(None, None, 2.0);
        guard.block_mint(&t.mint);
        assert!(guard
            .validate_token_safety(&t, &SniperSettings::default(), None)
            .is_err());
        assert!(guard.validate_hft_snipe(&t, 0.1).is_err());
    }

    #[test]
    fn test_trade_caps() {
        let guard = TradeGuard::new();
        assert!(guard.validate_trade(0.5, 15.0).is_ok());
        assert!(guard.validate_trade(0.0, 15.0).is_err());
        assert!(guard.validate_trade(10.0, 15.0).is_err());
        assert!(guard.validate_trade(0.5, 80.0).is_err());
    }

    #[test]
    fn test_hft_minimal_checks() {
        let guard = TradeGuard::new();
        // mint authority alone does not block fast mode
        assert!(guard.validate_hft_snipe(&token(Some("A"), None, 0.0), 0.1).is_ok());
        // freeze authority does
        assert!(guard.validate_hft_snipe(&token(None, Some("F"), 0.0), 0.1).is_err());
        // amount cap
        assert!(guard.validate_hft_snipe(&token(None, None, 0.0), 1.0).is_err());
    }
}
