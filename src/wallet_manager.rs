//! Server signing key.
//!
//! The process holds exactly one signing keypair, loaded once at startup.
//! It signs locally and is never sent anywhere; every built leg travels as
//! an unsigned base64 transaction until it reaches this module.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use solana_sdk::{
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Load the keypair from a file containing either a JSON byte array
    /// (`id.json` style) or a base58-encoded secret key.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("cannot read keypair file {}", path))?;
        let trimmed = raw.trim();

        let bytes: Vec<u8> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).context("keypair json array parse")?
        } else {
            bs58::decode(trimmed)
                .into_vec()
                .context("keypair base58 decode")?
        };
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| anyhow!("invalid keypair material: {}", e))?;

        let wallet = Self {
            keypair: Arc::new(keypair),
        };
        info!("🔑 Server wallet loaded: {}", wallet.pubkey());
        Ok(wallet)
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Sign an unsigned base64 transaction: the message is taken verbatim, a
    /// fresh transaction is built around it with the server signature, and
    /// re-encoded.
    pub fn sign_transaction_b64(&self, unsigned_b64: &str) -> Result<String> {
        let bytes = BASE64
            .decode(unsigned_b64)
            .context("transaction base64 decode")?;
        let tx: VersionedTransaction =
            bincode::deserialize(&bytes).context("transaction deserialize")?;
        let signed = VersionedTransaction::try_new(tx.message, &[self.keypair.as_ref()])
            .map_err(|e| anyhow!("signing failed: {}", e))?;
        let signed_bytes = bincode::serialize(&signed).context("signed transaction serialize")?;
        Ok(BASE64.encode(signed_bytes))
    }

    /// First signature of a signed base64 transaction, as base58.
    pub fn extract_signature(signed_b64: &str) -> Result<String> {
        let bytes = BASE64.decode(signed_b64).context("transaction base64")?;
        let tx: VersionedTransaction =
            bincode::deserialize(&bytes).context("transaction deserialize")?;
        tx.signatures
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("transaction carries no signatures"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        message::{v0, VersionedMessage},
        system_instruction,
    };

    fn unsigned_transfer_b64(payer: &Pubkey) -> String {
        let ix = system_instruction::transfer(payer, &Pubkey::new_unique(), 1_000);
        let msg = v0::Message::try_compile(payer, &[ix], &[], Hash::new_unique()).unwrap();
        let tx = VersionedTransaction {
            signatures: vec![],
            message: VersionedMessage::V0(msg),
        };
        BASE64.encode(bincode::serialize(&tx).unwrap())
    }

    #[test]
    fn test_sign_round_trip_preserves_message() {
        let wallet = WalletManager::from_keypair(Keypair::new());
        let unsigned = unsigned_transfer_b64(&wallet.pubkey());

        let signed_b64 = wallet.sign_transaction_b64(&unsigned).unwrap();
        let signed: VersionedTransaction =
            bincode::deserialize(&BASE64.decode(&signed_b64).unwrap()).unwrap();

        assert_eq!(signed.signatures.len(), 1);
        let unsigned_tx: VersionedTransaction =
            bincode::deserialize(&BASE64.decode(&unsigned).unwrap()).unwrap();
        assert_eq!(signed.message, unsigned_tx.message);
        // The signature verifies against the message payload.
        assert!(signed.verify_with_results().iter().all(|ok| *ok));
    }

    #[test]
    fn test_extract_signature() {
        let wallet = WalletManager::from_keypair(Keypair::new());
        let signed = wallet
            .sign_transaction_b64(&unsigned_transfer_b64(&wallet.pubkey()))
            .unwrap();
        let sig = WalletManager::extract_signature(&signed).unwrap();
        assert!(!sig.is_empty());
        assert!(bs58::decode(&sig).into_vec().is_ok());
    }

    #[test]
    fn test_load_from_json_array_file() {
        let keypair = Keypair::new();
        let dir = std::env::temp_dir().join("solstrike_wallet_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("id.json");
        let bytes: Vec<u8> = keypair.to_bytes().to_vec();
        std::fs::write(&path, serde_json::to_string(&bytes).unwrap()).unwrap();

        let wallet = WalletManager::load(path.to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(WalletManager::load("/nonexistent/keypair.json").is_err());
    }
}
