//! Shared atomic bundle executor.
//!
//! The one routine both the arb striker and the sniper go through: take an
//! ordered list of built-but-unsigned legs, sign each with the server key,
//! append a signed tip transaction, and hand the whole thing to the relay.
//! The relay enforces all-or-none on the ordered sequence.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::jito_client::{bundle_accepted, JitoBundleClient, RelaySubmission};
use crate::wallet_manager::WalletManager;

#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub success: bool,
    /// base58 signature of each signed leg, bundle order
    pub leg_signatures: Vec<String>,
    pub submissions: Vec<RelaySubmission>,
}

pub struct BundleExecutor {
    wallet: Arc<WalletManager>,
    jito: Arc<JitoBundleClient>,
}

impl BundleExecutor {
    pub fn new(wallet: Arc<WalletManager>, jito: Arc<JitoBundleClient>) -> Self {
        Self { wallet, jito }
    }

    pub fn wallet(&self) -> &Arc<WalletManager> {
        &self.wallet
    }

    /// Sign, tip, submit. Legs settle in the order given - callers are
    /// responsible for ordering legs whose outputs feed later legs.
    pub async fn execute(
        &self,
        unsigned_legs: &[String],
        tip_lamports: u64,
        blockhash: &str,
    ) -> Result<BundleOutcome> {
        let mut bundle = Vec::with_capacity(unsigned_legs.len() + 1);
        let mut leg_signatures = Vec::with_capacity(unsigned_legs.len());

        for (i, leg) in unsigned_legs.iter().enumerate() {
            let signed = self
                .wallet
                .sign_transaction_b64(leg)
                .with_context(|| format!("signing leg {}", i + 1))?;
            leg_signatures.push(WalletManager::extract_signature(&signed)?);
            bundle.push(signed);
        }

        let tip_tx = self
            .jito
            .build_tip_transaction(&self.wallet, tip_lamports, blockhash)
            .context("building tip transaction")?;
        bundle.push(tip_tx);

        let submissions = self.jito.send_bundle(&bundle).await?;
        let success = bundle_accepted(&submissions);
        info!(
            "📦 Bundle {}: {} legs + tip ({} lamports)",
            if success { "accepted" } else { "rejected" },
            unsigned_legs.len(),
            tip_lamports
        );

        Ok(BundleOutcome {
            success,
            leg_signatures,
            submissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Keypair;

    #[tokio::test]
    async fn test_unsignable_leg_is_rejected_before_submission() {
        let executor = BundleExecutor::new(
            Arc::new(WalletManager::from_keypair(Keypair::new())),
            Arc::new(JitoBundleClient::new(vec!["http://127.0.0.1:1".into()])),
        );
        let err = executor
            .execute(&["not base64!!".to_string()], 1_000, "hash")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("leg 1"));
    }
}
