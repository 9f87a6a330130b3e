//! Raydium V4 pool registry.
//!
//! Discovers pools for configured mint pairs via the Raydium API, caches the
//! full account set needed to build swap instructions locally, and keeps
//! vault reserves fresh - streaming first, polling as reconciliation. The
//! hot path only ever reads from memory; RPC appears here solely in
//! discovery and in the gap-fill poller.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{
    POOL_REDISCOVERY_INTERVAL, RAYDIUM_POOLS_API, RAYDIUM_V4_PROGRAM_ID,
    REGISTRY_MAINTENANCE_INTERVAL, RESERVE_REFRESH_AFTER, RPC_TIMEOUT,
};
use crate::raydium_pool_state::{
    derive_market_vault_signer, parse_market_account, parse_pool_account,
    parse_token_account_amount, RaydiumPoolState,
};
use crate::rpc_client::RpcHttpClient;
use crate::stream_manager::{AccountUpdate, StreamManager};

#[derive(Debug, Clone, Copy)]
enum VaultSide {
    Coin,
    Pc,
}

#[derive(Default)]
struct RegistryState {
    pools: HashMap<Pubkey, RaydiumPoolState>,
    /// "mintA:mintB" (both directions) -> pool address
    pair_index: HashMap<(String, String), Pubkey>,
    /// vault address (b58) -> (pool, side), for O(1) stream updates
    vault_index: HashMap<String, (Pubkey, VaultSide)>,
    discovery_pairs: Vec<(String, String)>,
}

struct RegistryInner {
    http: reqwest::Client,
    rpc: RpcHttpClient,
    pools_api: String,
    state: Mutex<RegistryState>,
    running: AtomicBool,
    stream: Mutex<Option<StreamManager>>,
    maintenance_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RaydiumPoolRegistry {
    inner: Arc<RegistryInner>,
}

impl RaydiumPoolRegistry {
    /// `rpc_url` should be the staked RPC when one is configured.
    pub fn new(rpc_url: &str) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                http: reqwest::Client::new(),
                rpc: RpcHttpClient::new(rpc_url),
                pools_api: RAYDIUM_POOLS_API.to_string(),
                state: Mutex::new(RegistryState::default()),
                running: AtomicBool::new(false),
                stream: Mutex::new(None),
                maintenance_task: Mutex::new(None),
            }),
        }
    }

    // ── Service lifecycle ────────────────────────────────────────────

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *self.inner.maintenance_task.lock() = Some(tokio::spawn(maintenance_loop(inner)));
        info!("🏊 RaydiumPoolRegistry started");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.maintenance_task.lock().take() {
            task.abort();
        }
        info!("🏊 RaydiumPoolRegistry stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Wire the streaming fabric; vault accounts of already-discovered pools
    /// are subscribed immediately.
    pub fn set_stream_manager(&self, stream: StreamManager) {
        *self.inner.stream.lock() = Some(stream);
        self.subscribe_vaults();
        info!("🏊 RaydiumPoolRegistry: stream manager wired");
    }

    pub fn pool_count(&self) -> usize {
        self.inner.state.lock().pools.len()
    }

    // ── Pool discovery ───────────────────────────────────────────────

    /// Find V4 pools for the given mint pairs and install their state.
    /// Returns the number of newly discovered pools.
    pub async fn discover_pools(&self, mint_pairs: &[(String, String)]) -> usize {
        self.inner.state.lock().discovery_pairs = mint_pairs.to_vec();
        let mut discovered = 0;

        for (mint_a, mint_b) in mint_pairs {
            match self.discover_one(mint_a, mint_b).await {
                Ok(true) => discovered += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Pool discovery failed for {}../{}..: {:#}",
                    &mint_a[..8.min(mint_a.len())],
                    &mint_b[..8.min(mint_b.len())],
                    e
                ),
            }
        }

        if discovered > 0 {
            self.subscribe_vaults();
        }
        info!(
            "🏊 Raydium pool discovery complete: {} new pools ({} total)",
            discovered,
            self.pool_count()
        );
        discovered
    }

    async fn discover_one(&self, mint_a: &str, mint_b: &str) -> Result<bool> {
        let Some(pool_addr) = self.find_pool_via_api(mint_a, mint_b).await? else {
            return Ok(false);
        };
        let pool_pubkey = Pubkey::from_str(&pool_addr).context("pool address from API")?;
        if self.inner.state.lock().pools.contains_key(&pool_pubkey) {
            // Already known; just make sure the pair maps to it.
            let mut state = self.inner.state.lock();
            index_pair(&mut state.pair_index, mint_a, mint_b, pool_pubkey);
            return Ok(false);
        }

        let Some(pool) = self.fetch_pool_state(&pool_pubkey).await? else {
            return Ok(false);
        };
        self.install_pool(pool);
        {
            let mut state = self.inner.state.lock();
            index_pair(&mut state.pair_index, mint_a, mint_b, pool_pubkey);
        }
        info!(
            "🏊 Discovered Raydium V4 pool {}... for {}../{}..",
            &pool_addr[..8],
            &mint_a[..8.min(mint_a.len())],
            &mint_b[..8.min(mint_b.len())]
        );
        Ok(true)
    }

    async fn find_pool_via_api(&self, mint_a: &str, mint_b: &str) -> Result<Option<String>> {
        let url = format!(
            "{}?mint1={}&mint2={}&poolType=standard&poolSortField=liquidity&sortType=desc&pageSize=5&page=1",
            self.inner.pools_api, mint_a, mint_b
        );
        let resp = self
            .inner
            .http
            .get(&url)
            .timeout(RPC_TIMEOUT * 2)
            .send()
            .await
            .context("raydium pools api request")?;
        if !resp.status().is_success() {
            return Err(anyhow!("raydium pools api returned {}", resp.status()));
        }
        let body: Value = resp.json().await.context("raydium pools api json")?;
        let pools = body
            .pointer("/data/data")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        // Pools come back liquidity-descending; take the first V4 hit.
        for pool in &pools {
            let program_id = pool.get("programId").and_then(|p| p.as_str()).unwrap_or("");
            if program_id == RAYDIUM_V4_PROGRAM_ID {
                return Ok(pool.get("id").and_then(|i| i.as_str()).map(String::from));
            }
        }
        if !pools.is_empty() {
            debug!("no V4 pool for pair ({} non-V4 candidates)", pools.len());
        }
        Ok(None)
    }

    /// Fetch and assemble the full on-chain pool + market state.
    async fn fetch_pool_state(&self, pool_address: &Pubkey) -> Result<Option<RaydiumPoolState>> {
        let Some(pool_data) = self
            .inner
            .rpc
            .get_account_data(&pool_address.to_string())
            .await?
        else {
            warn!("pool account {} not found", pool_address);
            return Ok(None);
        };
        let parsed = parse_pool_account(&pool_data)?;

        let Some(market_data) = self
            .inner
            .rpc
            .get_account_data(&parsed.market_address.to_string())
            .await?
        else {
            warn!("market account {} not found", parsed.market_address);
            return Ok(None);
        };
        let market = parse_market_account(&market_data)?;
        let market_vault_signer =
            derive_market_vault_signer(&parsed.market_address, market.vault_signer_nonce)?;

        let coin_reserve = self
            .inner
            .rpc
            .get_token_balance(&parsed.coin_vault.to_string())
            .await
            .unwrap_or(0);
        let pc_reserve = self
            .inner
            .rpc
            .get_token_balance(&parsed.pc_vault.to_string())
            .await
            .unwrap_or(0);

        info!(
            "🏊 Pool {}: coin={}.. pc={}.. reserves={}/{} fee={}/{}",
            pool_address,
            &parsed.coin_mint.to_string()[..8],
            &parsed.pc_mint.to_string()[..8],
            coin_reserve,
            pc_reserve,
            parsed.trade_fee_numerator,
            parsed.trade_fee_denominator
        );

        Ok(Some(RaydiumPoolState {
            pool_address: *pool_address,
            coin_mint: parsed.coin_mint,
            pc_mint: parsed.pc_mint,
            coin_decimals: parsed.coin_decimals,
            pc_decimals: parsed.pc_decimals,
            coin_vault: parsed.coin_vault,
            pc_vault: parsed.pc_vault,
            open_orders: parsed.open_orders,
            target_orders: parsed.target_orders,
            market_address: parsed.market_address,
            serum_program: parsed.serum_program,
            market_bids: market.bids,
            market_asks: market.asks,
            market_event_queue: market.event_queue,
            market_coin_vault: market.base_vault,
            market_pc_vault: market.quote_vault,
            market_vault_signer,
            trade_fee_numerator: parsed.trade_fee_numerator,
            trade_fee_denominator: parsed.trade_fee_denominator,
            swap_fee_numerator: parsed.swap_fee_numerator,
            swap_fee_denominator: parsed.swap_fee_denominator,
            coin_reserve,
            pc_reserve,
            last_update_slot: 0,
            last_update_time: Some(Instant::now()),
        }))
    }

    /// Install a pool and index its pair in both directions.
    pub fn install_pool(&self, pool: RaydiumPoolState) {
        let mut state = self.inner.state.lock();
        let coin = pool.coin_mint.to_string();
        let pc = pool.pc_mint.to_string();
        index_pair(&mut state.pair_index, &coin, &pc, pool.pool_address);
        state
            .vault_index
            .insert(pool.coin_vault.to_string(), (pool.pool_address, VaultSide::Coin));
        state
            .vault_index
            .insert(pool.pc_vault.to_string(), (pool.pool_address, VaultSide::Pc));
        state.pools.insert(pool.pool_address, pool);
    }

    // ── Streaming vault reserves ─────────────────────────────────────

    fn subscribe_vaults(&self) {
        let stream = self.inner.stream.lock().clone();
        let Some(stream) = stream else {
            return;
        };
        let vault_addresses: Vec<String> = {
            let state = self.inner.state.lock();
            state.vault_index.keys().cloned().collect()
        };
        if vault_addresses.is_empty() {
            return;
        }
        let count = vault_addresses.len();
        let inner = Arc::clone(&self.inner);
        stream.subscribe_accounts("raydium_vaults", vault_addresses, move |update| {
            on_vault_update(&inner, update);
            Ok(())
        });
        info!("🏊 Subscribed to {} Raydium vault accounts via gRPC", count);
    }

    // ── Quotes ───────────────────────────────────────────────────────

    pub fn get_pool_for_pair(&self, mint_a: &str, mint_b: &str) -> Option<RaydiumPoolState> {
        let state = self.inner.state.lock();
        let pool_addr = state
            .pair_index
            .get(&(mint_a.to_string(), mint_b.to_string()))?;
        state.pools.get(pool_addr).cloned()
    }

    /// Constant-product output for `amount_in`, after the pool's trade fee.
    /// Returns 0 on unknown pool, empty reserves or a zero fee denominator.
    pub fn compute_amount_out(
        &self,
        pool_address: &Pubkey,
        amount_in: u64,
        coin_to_pc: bool,
    ) -> u64 {
        let state = self.inner.state.lock();
        let Some(pool) = state.pools.get(pool_address) else {
            return 0;
        };
        quote_amount_out(pool, amount_in, coin_to_pc)
    }
}

/// Pure constant-product quote with the trade fee applied to the input.
pub fn quote_amount_out(pool: &RaydiumPoolState, amount_in: u64, coin_to_pc: bool) -> u64 {
    if pool.coin_reserve == 0 || pool.pc_reserve == 0 || pool.trade_fee_denominator == 0 {
        return 0;
    }
    let numerator = pool.trade_fee_numerator as u128;
    let denominator = pool.trade_fee_denominator as u128;
    let amount_in_after_fee = amount_in as u128 * (denominator - numerator) / denominator;

    let (reserve_in, reserve_out) = if coin_to_pc {
        (pool.coin_reserve as u128, pool.pc_reserve as u128)
    } else {
        (pool.pc_reserve as u128, pool.coin_reserve as u128)
    };

    let amount_out = reserve_out * amount_in_after_fee / (reserve_in + amount_in_after_fee);
    amount_out.min(u64::MAX as u128) as u64
}

fn index_pair(
    index: &mut HashMap<(String, String), Pubkey>,
    mint_a: &str,
    mint_b: &str,
    pool: Pubkey,
) {
    index.insert((mint_a.to_string(), mint_b.to_string()), pool);
    index.insert((mint_b.to_string(), mint_a.to_string()), pool);
}

fn on_vault_update(inner: &Arc<RegistryInner>, update: AccountUpdate) {
    let Some(balance) = parse_token_account_amount(&update.data) else {
        debug!("vault update for {} too short - skipped", update.pubkey);
        return;
    };
    let mut state = inner.state.lock();
    let Some(&(pool_addr, side)) = state.vault_index.get(&update.pubkey) else {
        return;
    };
    if let Some(pool) = state.pools.get_mut(&pool_addr) {
        match side {
            VaultSide::Coin => pool.coin_reserve = balance,
            VaultSide::Pc => pool.pc_reserve = balance,
        }
        pool.last_update_slot = update.slot;
        pool.last_update_time = Some(Instant::now());
    }
}

// ── Maintenance ──────────────────────────────────────────────────────

async fn maintenance_loop(inner: Arc<RegistryInner>) {
    let mut last_discovery = Instant::now();
    let mut tick = tokio::time::interval(REGISTRY_MAINTENANCE_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }

        // Gap fill: poll reserves of pools the stream is not updating.
        let stale: Vec<(Pubkey, String, String)> = {
            let state = inner.state.lock();
            state
                .pools
                .values()
                .filter(|p| {
                    p.last_update_time
                        .map(|t| t.elapsed() > RESERVE_REFRESH_AFTER)
                        .unwrap_or(true)
                })
                .map(|p| {
                    (
                        p.pool_address,
                        p.coin_vault.to_string(),
                        p.pc_vault.to_string(),
                    )
                })
                .collect()
        };

        for (pool_addr, coin_vault, pc_vault) in stale {
            let coin_bal = inner.rpc.get_token_balance(&coin_vault).await;
            let pc_bal = inner.rpc.get_token_balance(&pc_vault).await;
            match (coin_bal, pc_bal) {
                (Ok(coin), Ok(pc)) => {
                    let mut state = inner.state.lock();
                    if let Some(pool) = state.pools.get_mut(&pool_addr) {
                        pool.coin_reserve = coin;
                        pool.pc_reserve = pc;
                        pool.last_update_time = Some(Instant::now());
                    }
                    debug!("reserves polled for pool {}", pool_addr);
                }
                _ => debug!("reserve refresh failed for pool {}", pool_addr),
            }
        }

        // Periodic rediscovery picks up newer, more-liquid pools.
        if last_discovery.elapsed() > POOL_REDISCOVERY_INTERVAL {
            let pairs = inner.state.lock().discovery_pairs.clone();
            if !pairs.is_empty() {
                let registry = RaydiumPoolRegistry {
                    inner: Arc::clone(&inner),
                };
                registry.discover_pools(&pairs).await;
            }
            last_discovery = Instant::now();
        }
    }
}

/// Test fixture shared by the swap-builder and router tests.
#[cfg(test)]
pub(crate) fn test_pool(
    coin_reserve: u64,
    pc_reserve: u64,
    fee_num: u64,
    fee_den: u64,
) -> RaydiumPoolState {
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
        trade_fee_numerator: fee_num,
        trade_fee_denominator: fee_den,
        swap_fee_numerator: fee_num,
        swap_fee_denominator: fee_den,
        coin_reserve,
        pc_reserve,
        last_update_slot: 0,
        last_update_time: Some(Instant::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_quote_constant_product_with_fee() {
        // 1000 SOL / 150_000 USDC pool, 25/10000 fee
        let pool = test_pool(1_000_000_000_000, 150_000_000_000, 25, 10_000);
        let out = quote_amount_out(&pool, 1_000_000_000, true); // 1 SOL in
        // after fee: 0.9975 SOL; out ≈ 150000e6 * 0.9975e9 / (1000e9 + 0.9975e9)
        assert!(out > 149_000_000 && out < 150_000_000, "out={}", out);
    }

    #[test]
    fn test_quote_zero_cases() {
        let empty = test_pool(0, 1, 25, 10_000);
        assert_eq!(quote_amount_out(&empty, 1_000, true), 0);
        let bad_fee = test_pool(1_000, 1_000, 25, 0);
        assert_eq!(quote_amount_out(&bad_fee, 1_000, true), 0);
    }

    #[test]
    fn test_quote_round_trip_never_profits() {
        // Swapping out and back can never beat the input: fees are not negative.
        let pool = test_pool(1_000_000_000_000, 150_000_000_000, 25, 10_000);
        for amount_in in [1_000u64, 1_000_000, 1_000_000_000, 50_000_000_000] {
            let forward = quote_amount_out(&pool, amount_in, true);
            let back = quote_amount_out(&pool, forward, false);
            assert!(back <= amount_in, "round trip profited: {} -> {}", amount_in, back);
        }
    }

    #[test]
    fn test_registry_pair_index_both_directions() {
        let registry = RaydiumPoolRegistry::new("http://localhost:8899");
        let pool = test_pool(10, 10, 25, 10_000);
        let coin = pool.coin_mint.to_string();
        let pc = pool.pc_mint.to_string();
        registry.install_pool(pool);

        assert!(registry.get_pool_for_pair(&coin, &pc).is_some());
        assert!(registry.get_pool_for_pair(&pc, &coin).is_some());
        assert!(registry
            .get_pool_for_pair(&coin, "UnknownMint111111111111111111111111111111111")
            .is_none());
        assert_eq!(registry.pool_count(), 1);
    }

    #[test]
    fn test_vault_update_routes_to_correct_side() {
        let registry = RaydiumPoolRegistry::new("http://localhost:8899");
        let pool = test_pool(100, 200, 25, 10_000);
        let pool_addr = pool.pool_address;
        let coin_vault = pool.coin_vault.to_string();
        registry.install_pool(pool);

        let mut data = vec![0u8; 165];
        data[64..72].copy_from_slice(&555u64.to_le_bytes());
        on_vault_update(
            &registry.inner,
            AccountUpdate {
                pubkey: coin_vault,
                lamports: 0,
                data,
                slot: 42,
            },
        );

        let state = registry.inner.state.lock();
        let pool = state.pools.get(&pool_addr).unwrap();
        assert_eq!(pool.coin_reserve, 555);
        assert_eq!(pool.pc_reserve, 200);
        assert_eq!(pool.last_update_slot, 42);
    }
}
