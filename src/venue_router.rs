//! Venue-aware swap builder - the routing ladder.
//!
//! The single point where build methods are chosen, so method tagging stays
//! uniform across every execution path:
//!
//!   1. Raydium + in-range registry entry  → direct on-chain synthesis
//!   2. Orca + known whirlpool             → local sidecar build
//!   3. anything else                      → aggregator fallback
//!
//! The venue set is closed and order-sensitive, so this is a tagged enum
//! with inlined branches, not a trait object hierarchy.

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::blockhash_cache::BlockhashCache;
use crate::constants::MAX_RESERVE_AGE_SLOTS;
use crate::jupiter_client::JupiterClient;
use crate::orca_sidecar::{OrcaPoolMap, OrcaSidecarClient};
use crate::raydium_registry::{quote_amount_out, RaydiumPoolRegistry};
use crate::raydium_swap_builder::build_swap_transaction;

/// Closed set of venues the router understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Venue {
    Raydium,
    Orca,
    Other(String),
}

impl Venue {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Raydium" => Venue::Raydium,
            "Orca" => Venue::Orca,
            other => Venue::Other(other.to_string()),
        }
    }

    /// No venue pin: the aggregator routes freely. Used for generic trades
    /// like position exits, where the best route may span venues.
    pub fn any() -> Self {
        Venue::Other(String::new())
    }

    pub fn name(&self) -> &str {
        match self {
            Venue::Raydium => "Raydium",
            Venue::Orca => "Orca",
            Venue::Other(name) => name,
        }
    }

    /// The `dexes` pin handed to the aggregator, if any.
    fn aggregator_pin(&self) -> Option<&str> {
        match self {
            Venue::Other(name) if name.is_empty() => None,
            v => Some(v.name()),
        }
    }
}

/// How a swap was ultimately built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapMethod {
    RaydiumDirect,
    OrcaSidecar,
    AggregatorFallback,
    Failed,
}

impl SwapMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapMethod::RaydiumDirect => "raydium_direct",
            SwapMethod::OrcaSidecar => "orca_sidecar",
            SwapMethod::AggregatorFallback => "aggregator_fallback",
            SwapMethod::Failed => "failed",
        }
    }
}

/// A built (but unsigned) swap leg.
#[derive(Debug, Clone)]
pub struct SwapBuild {
    pub transaction_b64: Option<String>,
    pub estimated_out: u64,
    pub method: SwapMethod,
}

impl SwapBuild {
    fn failed() -> Self {
        Self {
            transaction_b64: None,
            estimated_out: 0,
            method: SwapMethod::Failed,
        }
    }

    pub fn ok(&self) -> bool {
        self.method != SwapMethod::Failed && self.transaction_b64.is_some()
    }
}

pub struct VenueRouter {
    registry: Arc<RaydiumPoolRegistry>,
    blockhash: Arc<BlockhashCache>,
    orca_map: Arc<OrcaPoolMap>,
    sidecar: OrcaSidecarClient,
    jupiter: Arc<JupiterClient>,
}

impl VenueRouter {
    pub fn new(
        registry: Arc<RaydiumPoolRegistry>,
        blockhash: Arc<BlockhashCache>,
        orca_map: Arc<OrcaPoolMap>,
        sidecar: OrcaSidecarClient,
        jupiter: Arc<JupiterClient>,
    ) -> Self {
        Self {
            registry,
            blockhash,
            orca_map,
            sidecar,
            jupiter,
        }
    }

    /// Build one swap for a venue, walking the ladder until a rung holds.
    /// Never errors: total failure is reported as `SwapMethod::Failed`.
    pub async fn build_swap(
        &self,
        venue: &Venue,
        input_mint: &str,
        output_mint: &str,
        amount_in: u64,
        user: &Pubkey,
        blockhash: &str,
        slippage_bps: u16,
    ) -> SwapBuild {
        // 1. Direct on-chain synthesis (~1ms, no network)
        if *venue == Venue::Raydium {
            if let Some(build) = self.try_raydium_direct(
                input_mint,
                output_mint,
                amount_in,
                user,
                blockhash,
                slippage_bps,
            ) {
                return build;
            }
        }

        // 2. Local sidecar (~100ms loopback HTTP)
        if *venue == Venue::Orca {
            if let Some(build) = self
                .try_orca_sidecar(input_mint, output_mint, amount_in, user, slippage_bps)
                .await
            {
                return build;
            }
        }

        // 3. Aggregator fallback (any venue, ~500ms)
        self.build_via_aggregator(venue, input_mint, output_mint, amount_in, user, slippage_bps)
            .await
    }

    /// Raydium rung: requires a registry entry with fresh, non-empty
    /// reserves. Any miss falls through silently to the next rung.
    fn try_raydium_direct(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_in: u64,
        user: &Pubkey,
        blockhash: &str,
        slippage_bps: u16,
    ) -> Option<SwapBuild> {
        let pool = self.registry.get_pool_for_pair(input_mint, output_mint)?;

        let current_slot = self.blockhash.get_slot();
        if current_slot > 0 && pool.last_update_slot > 0 {
            let slot_delta = current_slot.saturating_sub(pool.last_update_slot);
            if slot_delta > MAX_RESERVE_AGE_SLOTS {
                warn!(
                    "Raydium reserves stale ({} slots) - falling through to aggregator",
                    slot_delta
                );
                return None;
            }
        }

        let coin_to_pc = input_mint == pool.coin_mint.to_string();
        let estimated_out = quote_amount_out(&pool, amount_in, coin_to_pc);
        if estimated_out == 0 {
            warn!("Raydium quote returned 0 - falling through");
            return None;
        }
        let min_out =
            (estimated_out as u128 * (10_000 - slippage_bps as u128) / 10_000) as u64;

        match build_swap_transaction(&pool, amount_in, min_out, coin_to_pc, user, blockhash) {
            Ok(tx_b64) => {
                info!(
                    "⚙️ Built Raydium swap directly: {} → ~{}",
                    amount_in, estimated_out
                );
                Some(SwapBuild {
                    transaction_b64: Some(tx_b64),
                    estimated_out,
                    method: SwapMethod::RaydiumDirect,
                })
            }
            Err(e) => {
                warn!("Raydium direct build failed: {:#} - falling through", e);
                None
            }
        }
    }

    async fn try_orca_sidecar(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_in: u64,
        user: &Pubkey,
        slippage_bps: u16,
    ) -> Option<SwapBuild> {
        let Some(pool_address) = self.orca_map.get(input_mint, output_mint) else {
            debug!(
                "No Orca pool mapping for {}../{}..",
                &input_mint[..8.min(input_mint.len())],
                &output_mint[..8.min(output_mint.len())]
            );
            return None;
        };
        let swap = self
            .sidecar
            .build_swap(
                &pool_address,
                input_mint,
                amount_in,
                &user.to_string(),
                slippage_bps,
            )
            .await?;
        Some(SwapBuild {
            transaction_b64: Some(swap.transaction),
            estimated_out: swap.estimated_amount_out,
            method: SwapMethod::OrcaSidecar,
        })
    }

    async fn build_via_aggregator(
        &self,
        venue: &Venue,
        input_mint: &str,
        output_mint: &str,
        amount_in: u64,
        user: &Pubkey,
        slippage_bps: u16,
    ) -> SwapBuild {
        let quote = match self
            .jupiter
            .quote_direct(
                input_mint,
                output_mint,
                amount_in,
                venue.aggregator_pin(),
                slippage_bps,
            )
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                warn!("Aggregator quote failed for {}: {:#}", venue.name(), e);
                return SwapBuild::failed();
            }
        };
        match self.jupiter.build_swap(&quote, &user.to_string()).await {
            Ok((tx_b64, estimated_out)) => SwapBuild {
                transaction_b64: Some(tx_b64),
                estimated_out,
                method: SwapMethod::AggregatorFallback,
            },
            Err(e) => {
                warn!("Aggregator build failed for {}: {:#}", venue.name(), e);
                SwapBuild::failed()
            }
        }
    }
}
