//! In-memory price cache with layered fallbacks.
//!
//! Lookup priority for the HFT monitor's SOL-denominated reads:
//!   1. the in-memory USD cache (fed by whoever has fresh prices),
//!   2. Pump.fun bonding-curve virtual reserves (tokens still on the curve),
//!   3. a 5s-TTL cached call to the external price endpoint.
//! All three missing → 0.0, and the caller waits for the next tick instead
//! of acting on stale data.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use solana_sdk::pubkey::Pubkey;

use crate::constants::{PUMPFUN_PROGRAM_ID, WSOL_MINT};
use crate::jupiter_client::JupiterClient;
use crate::rpc_client::RpcHttpClient;

/// TTL for external price lookups.
const EXTERNAL_PRICE_TTL: Duration = Duration::from_secs(5);

/// Bonding-curve account: two u64 virtual reserves behind an 8-byte
/// discriminator.
const CURVE_VIRTUAL_TOKEN_OFFSET: usize = 8;
const CURVE_VIRTUAL_SOL_OFFSET: usize = 16;
const CURVE_MIN_SIZE: usize = 24;

pub struct PriceCache {
    /// mint -> (usd price, updated)
    usd: RwLock<HashMap<String, (f64, Instant)>>,
    /// mint -> (sol price, fetched) for the external fallback
    external: Mutex<HashMap<String, (f64, Instant)>>,
    jupiter: Arc<JupiterClient>,
    rpc: Arc<RpcHttpClient>,
}

impl PriceCache {
    pub fn new(jupiter: Arc<JupiterClient>, rpc: Arc<RpcHttpClient>) -> Arc<Self> {
        Arc::new(Self {
            usd: RwLock::new(HashMap::new()),
            external: Mutex::new(HashMap::new()),
            jupiter,
            rpc,
        })
    }

    /// Feed a USD price into the cache (portfolio pollers, stream parsers).
    pub fn set_usd(&self, mint: &str, price: f64) {
        self.usd
            .write()
            .insert(mint.to_string(), (price, Instant::now()));
    }

    pub fn get_usd(&self, mint: &str) -> Option<f64> {
        self.usd.read().get(mint).map(|(p, _)| *p)
    }

    /// Token price denominated in SOL, walking the fallback ladder.
    /// Returns 0.0 when every source fails.
    pub async fn token_price_sol(&self, mint: &str) -> f64 {
        // 1. In-memory USD cache (needs both the token and SOL)
        {
            let usd = self.usd.read();
            if let (Some((price_usd, _)), Some((sol_usd, _))) =
                (usd.get(mint), usd.get(WSOL_MINT))
            {
                if *price_usd > 0.0 && *sol_usd > 0.0 {
                    return price_usd / sol_usd;
                }
            }
        }

        // 2. Bonding-curve reserves for tokens still on the curve
        if let Some(price) = self.bonding_curve_price_sol(mint).await {
            return price;
        }

        // 3. External price endpoint, TTL-cached
        self.external_price_sol(mint).await
    }

    /// Price from Pump.fun virtual reserves: `(vSOL / vTokens) / 1e9`.
    async fn bonding_curve_price_sol(&self, mint: &str) -> Option<f64> {
        let curve = derive_bonding_curve(mint)?;
        let data = self
            .rpc
            .get_account_data(&curve.to_string())
            .await
            .ok()
            .flatten()?;
        if data.len() < CURVE_MIN_SIZE {
            return None;
        }
        let virtual_tokens = u64::from_le_bytes(
            data[CURVE_VIRTUAL_TOKEN_OFFSET..CURVE_VIRTUAL_TOKEN_OFFSET + 8]
                .try_into()
                .ok()?,
        );
        let virtual_sol = u64::from_le_bytes(
            data[CURVE_VIRTUAL_SOL_OFFSET..CURVE_VIRTUAL_SOL_OFFSET + 8]
                .try_into()
                .ok()?,
        );
        if virtual_tokens == 0 {
            return None;
        }
        Some((virtual_sol as f64 / virtual_tokens as f64) / 1e9)
    }

    async fn external_price_sol(&self, mint: &str) -> f64 {
        {
            let cache = self.external.lock();
            if let Some((price, fetched)) = cache.get(mint) {
                if fetched.elapsed() < EXTERNAL_PRICE_TTL {
                    return *price;
                }
            }
        }

        let price_usd = self.jupiter.price_usd(mint).await.unwrap_or(0.0);
        if price_usd <= 0.0 {
            return 0.0;
        }
        let sol_usd = self.get_usd(WSOL_MINT).unwrap_or(0.0);
        if sol_usd <= 0.0 {
            debug!("external price lookup has no SOL/USD reference");
            return 0.0;
        }
        let price_sol = price_usd / sol_usd;
        self.external
            .lock()
            .insert(mint.to_string(), (price_sol, Instant::now()));
        price_sol
    }
}

/// Pump.fun bonding-curve PDA: seeds `["bonding-curve", mint]`.
fn derive_bonding_curve(mint: &str) -> Option<Pubkey> {
    let mint = Pubkey::from_str(mint).ok()?;
    let program = Pubkey::from_str(PUMPFUN_PROGRAM_ID).ok()?;
    let (pda, _) = Pubkey::find_program_address(&[b"bonding-curve", mint.as_ref()], &program);
    Some(pda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cache() -> Arc<PriceCache> {
        let config = Config {
            geyser_endpoint: None,
            shred_endpoint: None,
            grpc_token: None,
            rpc_url: "http://127.0.0.1:1".into(),
            staked_rpc_url: None,
            keypair_path: None,
            jupiter_quote_api: "http://127.0.0.1:1/quote".into(),
            jupiter_swap_api: "http://127.0.0.1:1/swap".into(),
            jupiter_price_api: "http://127.0.0.1:1/price".into(),
            jupiter_api_key: None,
            orca_sidecar_url: "http://127.0.0.1:1".into(),
            jito_block_engines: vec![],
            audit_db_path: ":memory:".into(),
            allowed_origins: vec![],
            auth_enabled: false,
            ip_whitelist: vec![],
        };
        PriceCache::new(
            Arc::new(JupiterClient::new(&config)),
            Arc::new(RpcHttpClient::new("http://127.0.0.1:1")),
        )
    }

    #[tokio::test]
    async fn test_usd_cache_converts_to_sol() {
        let cache = cache();
        cache.set_usd(WSOL_MINT, 150.0);
        cache.set_usd("SomeMint", 1.5);
        let price = cache.token_price_sol("SomeMint").await;
        assert!((price - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_everything_reads_zero() {
        let cache = cache();
        // No cached prices, no reachable RPC or price endpoint.
        let price = cache.token_price_sol("UnknownMint1111111111111111111111111111111").await;
        assert_eq!(price, 0.0);
    }

    #[test]
    fn test_bonding_curve_pda_is_stable() {
        let mint = Pubkey::new_unique().to_string();
        let a = derive_bonding_curve(&mint).unwrap();
        let b = derive_bonding_curve(&mint).unwrap();
        assert_eq!(a, b);
        assert!(derive_bonding_curve("not-a-mint").is_none());
    }
}
