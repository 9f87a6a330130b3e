//! Orca Whirlpool integration: advisory pool map + local sidecar client.
//!
//! The sidecar is a loopback HTTP service that owns the Whirlpool SDK
//! surface; this module only maps mint pairs to whirlpool addresses and
//! forwards build requests. A missing mapping or an unreachable sidecar is
//! not an error - the router falls through to the aggregator.

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::{ORCA_WHIRLPOOL_LIST_API, SIDECAR_TIMEOUT, USDC_MINT, USDT_MINT, WSOL_MINT};

/// Vendor pools below this TVL are ignored.
const MIN_POOL_TVL_USD: f64 = 100_000.0;

/// Bootstrap entries used until (or in case) the vendor list is reachable.
const BOOTSTRAP_POOLS: &[(&str, &str, &str)] = &[
    (WSOL_MINT, USDC_MINT, "7qbRF6YsyGuLUVs6Y1q64bdVrfe4ZcUUz1JRdoVNUJnm"),
    (WSOL_MINT, USDT_MINT, "4GkRbcYg1VKsZropgai4dMf2Nj2PkXNLf43knFpavrSi"),
];

/// Mint-pair → whirlpool address map, keyed in both directions.
pub struct OrcaPoolMap {
    map: RwLock<HashMap<(String, String), String>>,
    loaded: AtomicBool,
    http: reqwest::Client,
    list_url: String,
}

impl OrcaPoolMap {
    pub fn new() -> Arc<Self> {
        Self::with_list_url(ORCA_WHIRLPOOL_LIST_API)
    }

    pub fn with_list_url(url: &str) -> Arc<Self> {
        let map = Arc::new(Self {
            map: RwLock::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            http: reqwest::Client::new(),
            list_url: url.to_string(),
        });
        map.install_bootstrap();
        map
    }

    fn install_bootstrap(&self) {
        let mut map = self.map.write();
        for (a, b, pool) in BOOTSTRAP_POOLS {
            map.insert((a.to_string(), b.to_string()), pool.to_string());
            map.insert((b.to_string(), a.to_string()), pool.to_string());
        }
    }

    /// Load the vendor whirlpool list, filtered by TVL. The vendor is
    /// authoritative: its entries replace the bootstrap values. Best-effort;
    /// failure leaves the bootstrap map in place.
    pub async fn load_from_vendor(&self) {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.fetch_vendor_list().await {
            Ok(count) => info!("🌀 Orca pool map loaded: {} mappings", count),
            Err(e) => debug!("Orca pool list load failed (bootstrap entries kept): {:#}", e),
        }
    }

    async fn fetch_vendor_list(&self) -> Result<usize> {
        let resp = self
            .http
            .get(&self.list_url)
            .timeout(SIDECAR_TIMEOUT + std::time::Duration::from_secs(2))
            .send()
            .await
            .context("orca whirlpool list request")?;
        if !resp.status().is_success() {
            return Err(anyhow!("orca list returned {}", resp.status()));
        }
        let body: Value = resp.json().await.context("orca list json")?;
        let whirlpools = body
            .get("whirlpools")
            .and_then(|w| w.as_array())
            .cloned()
            .unwrap_or_default();

        let mut map = self.map.write();
        for wp in &whirlpools {
            let addr = wp.get("address").and_then(|a| a.as_str()).unwrap_or("");
            let mint_a = wp.pointer("/tokenA/mint").and_then(|m| m.as_str()).unwrap_or("");
            let mint_b = wp.pointer("/tokenB/mint").and_then(|m| m.as_str()).unwrap_or("");
            let tvl = wp.get("tvl").and_then(|t| t.as_f64()).unwrap_or(0.0);
            if addr.is_empty() || mint_a.is_empty() || mint_b.is_empty() || tvl <= MIN_POOL_TVL_USD
            {
                continue;
            }
            map.insert((mint_a.to_string(), mint_b.to_string()), addr.to_string());
            map.insert((mint_b.to_string(), mint_a.to_string()), addr.to_string());
        }
        Ok(map.len())
    }

    pub fn get(&self, input_mint: &str, output_mint: &str) -> Option<String> {
        self.map
            .read()
            .get(&(input_mint.to_string(), output_mint.to_string()))
            .cloned()
    }

    pub fn insert(&self, mint_a: &str, mint_b: &str, pool: &str) {
        let mut map = self.map.write();
        map.insert((mint_a.to_string(), mint_b.to_string()), pool.to_string());
        map.insert((mint_b.to_string(), mint_a.to_string()), pool.to_string());
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Drop every mapping (bootstrap included).
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

// ── Sidecar HTTP client ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SidecarHealth {
    pub service: String,
    pub initialized: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBuildRequest<'a> {
    pool_address: &'a str,
    input_mint: &'a str,
    amount: String,
    user_wallet: &'a str,
    slippage_pct: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSwap {
    pub transaction: String,
    #[serde(default, deserialize_with = "string_or_u64")]
    pub estimated_amount_out: u64,
}

/// The sidecar reports amounts as either raw numbers or strings.
fn string_or_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

pub struct OrcaSidecarClient {
    http: reqwest::Client,
    base_url: String,
}

impl OrcaSidecarClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn health(&self) -> Result<SidecarHealth> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(SIDECAR_TIMEOUT)
            .send()
            .await
            .context("sidecar health request")?;
        resp.json().await.context("sidecar health parse")
    }

    pub async fn get_pool(&self, address: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/pool/{}", self.base_url, address))
            .timeout(SIDECAR_TIMEOUT)
            .send()
            .await
            .context("sidecar pool request")?;
        resp.json().await.context("sidecar pool parse")
    }

    pub async fn get_ticks(&self, address: &str, count: u32) -> Result<Value> {
        let resp = self
            .http
            .get(format!(
                "{}/pool/{}/ticks?count={}",
                self.base_url, address, count
            ))
            .timeout(SIDECAR_TIMEOUT)
            .send()
            .await
            .context("sidecar ticks request")?;
        resp.json().await.context("sidecar ticks parse")
    }

    /// Build an Orca swap through the sidecar. `None` means the sidecar is
    /// unreachable or declined - the caller falls through to the aggregator.
    pub async fn build_swap(
        &self,
        pool_address: &str,
        input_mint: &str,
        amount_in: u64,
        user_wallet: &str,
        slippage_bps: u16,
    ) -> Option<SidecarSwap> {
        let request = SwapBuildRequest {
            pool_address,
            input_mint,
            amount: amount_in.to_string(),
            user_wallet,
            slippage_pct: slippage_bps as f64 / 100.0,
        };
        let resp = self
            .http
            .post(format!("{}/build/swap", self.base_url))
            .timeout(SIDECAR_TIMEOUT)
            .json(&request)
            .send()
            .await;
        match resp {
            Ok(resp) if resp.status().is_success() => match resp.json::<SidecarSwap>().await {
                Ok(swap) if !swap.transaction.is_empty() && swap.estimated_amount_out > 0 => {
                    info!(
                        "🌀 Built Orca swap via sidecar: {} → ~{}",
                        amount_in, swap.estimated_amount_out
                    );
                    Some(swap)
                }
                Ok(_) => {
                    warn!("Orca sidecar returned an empty build");
                    None
                }
                Err(e) => {
                    warn!("Orca sidecar build parse failed: {}", e);
                    None
                }
            },
            Ok(resp) => {
                warn!("Orca sidecar returned {}", resp.status());
                None
            }
            Err(e) => {
                warn!("Orca sidecar unreachable - falling through: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_entries_both_directions() {
        let map = OrcaPoolMap::with_list_url("http://unused");
        assert_eq!(
            map.get(WSOL_MINT, USDC_MINT).as_deref(),
            Some("7qbRF6YsyGuLUVs6Y1q64bdVrfe4ZcUUz1JRdoVNUJnm")
        );
        assert_eq!(
            map.get(USDC_MINT, WSOL_MINT).as_deref(),
            Some("7qbRF6YsyGuLUVs6Y1q64bdVrfe4ZcUUz1JRdoVNUJnm")
        );
        assert!(map.get(WSOL_MINT, "SomeOtherMint").is_none());
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_insert_and_clear() {
        let map = OrcaPoolMap::with_list_url("http://unused");
        map.insert("MintA", "MintB", "Pool1");
        assert_eq!(map.get("MintB", "MintA").as_deref(), Some("Pool1"));
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_sidecar_swap_amount_parses_both_shapes() {
        let from_string: SidecarSwap =
            serde_json::from_str(r#"{"transaction": "dGVzdA==", "estimatedAmountOut": "12345"}"#)
                .unwrap();
        assert_eq!(from_string.estimated_amount_out, 12_345);

        let from_number: SidecarSwap =
            serde_json::from_str(r#"{"transaction": "dGVzdA==", "estimatedAmountOut": 678}"#)
                .unwrap();
        assert_eq!(from_number.estimated_amount_out, 678);
    }
}
