//! Generic single-swap trade path.
//!
//! Used by the sniper for buys, auto-sells and manual sells: build one leg
//! through the router, bundle it with a tip, submit, and (optionally) track
//! on-chain confirmation. The arb striker has its own two-leg path in
//! `arb_engine`.

use anyhow::{anyhow, Result};
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::blockhash_cache::BlockhashCache;
use crate::bundle_executor::BundleExecutor;
use crate::venue_router::{SwapMethod, Venue, VenueRouter};

/// How long a fast-mode buy waits for on-chain confirmation.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(15);
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TradeResult {
    pub signature: Option<String>,
    /// Relay accepted the bundle
    pub submitted: bool,
    /// Transaction observed successful on-chain (only when confirmation was
    /// requested)
    pub confirmed: bool,
    pub estimated_out: u64,
    pub method: SwapMethod,
}

pub struct TradeExecutor {
    router: Arc<VenueRouter>,
    bundles: Arc<BundleExecutor>,
    blockhash: Arc<BlockhashCache>,
    rpc: Arc<RpcClient>,
}

impl TradeExecutor {
    pub fn new(
        router: Arc<VenueRouter>,
        bundles: Arc<BundleExecutor>,
        blockhash: Arc<BlockhashCache>,
        rpc: Arc<RpcClient>,
    ) -> Self {
        Self {
            router,
            bundles,
            blockhash,
            rpc,
        }
    }

    /// Build, sign and submit one swap. `wait_for_confirmation` blocks until
    /// the transaction is visible on-chain or the wait times out.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_swap(
        &self,
        venue: &Venue,
        input_mint: &str,
        output_mint: &str,
        amount_in: u64,
        slippage_bps: u16,
        tip_lamports: u64,
        source: &str,
        wait_for_confirmation: bool,
    ) -> Result<TradeResult> {
        let Some((blockhash, _last_valid, remaining)) = self.blockhash.usable_blockhash() else {
            return Err(anyhow!(
                "no usable blockhash (unavailable or too close to expiry) - skipping {}",
                source
            ));
        };
        debug!("{}: using cached blockhash ({} blocks remaining)", source, remaining);

        let user = self.bundles.wallet().pubkey();
        let build = self
            .router
            .build_swap(
                venue,
                input_mint,
                output_mint,
                amount_in,
                &user,
                &blockhash,
                slippage_bps,
            )
            .await;
        let Some(leg) = build.transaction_b64.clone() else {
            return Err(anyhow!("{}: all build methods failed", source));
        };

        let outcome = self
            .bundles
            .execute(&[leg], tip_lamports, &blockhash)
            .await?;
        let signature = outcome.leg_signatures.first().cloned();

        if !outcome.success {
            warn!("{}: bundle rejected by relay", source);
            return Ok(TradeResult {
                signature,
                submitted: false,
                confirmed: false,
                estimated_out: build.estimated_out,
                method: build.method,
            });
        }

        info!(
            "⚡ {} submitted via {} (~{} out, tip {})",
            source,
            build.method.as_str(),
            build.estimated_out,
            tip_lamports
        );

        let confirmed = if wait_for_confirmation {
            match &signature {
                Some(sig) => self.await_confirmation(sig).await,
                None => false,
            }
        } else {
            false
        };

        Ok(TradeResult {
            signature,
            submitted: true,
            confirmed,
            estimated_out: build.estimated_out,
            method: build.method,
        })
    }

    /// Poll signature status until it lands, fails, or the wait times out.
    async fn await_confirmation(&self, signature: &str) -> bool {
        let Ok(sig) = Signature::from_str(signature) else {
            return false;
        };
        let deadline = tokio::time::Instant::now() + CONFIRM_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            match self.rpc.get_signature_status(&sig).await {
                Ok(Some(Ok(()))) => {
                    info!("✅ Confirmed on-chain: {}...", &signature[..16.min(signature.len())]);
                    return true;
                }
                Ok(Some(Err(tx_err))) => {
                    warn!("❌ Transaction failed on-chain: {:?}", tx_err);
                    return false;
                }
                Ok(None) => {}
                Err(e) => debug!("confirmation poll error: {}", e),
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
        warn!("⏰ Confirmation wait timed out for {}...", &signature[..16.min(signature.len())]);
        false
    }
}
