//! Environment-driven configuration.
//!
//! All endpoints, credentials and key material come from the environment
//! (a `.env` file is honored). Runtime strategy knobs live in
//! [`crate::settings`] instead - they are tunable while the process runs.

use anyhow::Result;
use std::env;

use crate::constants::{JITO_MAINNET_BLOCK_ENGINE, JITO_NY_BLOCK_ENGINE};

/// Default Jupiter endpoints (lite tier; an API key upgrades the host)
pub const DEFAULT_JUPITER_QUOTE_API: &str = "https://quote-api.jup.ag/v6/quote";
pub const DEFAULT_JUPITER_SWAP_API: &str = "https://quote-api.jup.ag/v6/swap";
pub const DEFAULT_JUPITER_PRICE_API: &str = "https://api.jup.ag/price/v2";

#[derive(Debug, Clone)]
pub struct Config {
    /// Yellowstone gRPC endpoint (post-execution accounts/slots/blocks)
    pub geyser_endpoint: Option<String>,
    /// Shred-level gRPC endpoint (pre-execution transactions)
    pub shred_endpoint: Option<String>,
    /// Bearer token for both streaming endpoints
    pub grpc_token: Option<String>,

    /// Plain RPC (fallback only - never on the hot path)
    pub rpc_url: String,
    /// Staked RPC, preferred for reserve polls when present
    pub staked_rpc_url: Option<String>,

    /// Path to the server signing keypair (id.json array or base58 secret)
    pub keypair_path: Option<String>,

    /// Aggregator (Jupiter-family) endpoints
    pub jupiter_quote_api: String,
    pub jupiter_swap_api: String,
    pub jupiter_price_api: String,
    pub jupiter_api_key: Option<String>,

    /// Orca whirlpool sidecar (local HTTP service)
    pub orca_sidecar_url: String,

    /// Block-builder relay endpoints, tried in order
    pub jito_block_engines: Vec<String>,

    /// Execution audit database path
    pub audit_db_path: String,

    // Consumed by the out-of-scope API layer but parsed here so a single
    // Config describes the whole deployment.
    pub allowed_origins: Vec<String>,
    pub auth_enabled: bool,
    pub ip_whitelist: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let jito_block_engines = match env::var("JITO_BLOCK_ENGINES") {
            Ok(v) => split_csv(&v),
            Err(_) => vec![
                JITO_MAINNET_BLOCK_ENGINE.to_string(),
                JITO_NY_BLOCK_ENGINE.to_string(),
            ],
        };

        Ok(Self {
            geyser_endpoint: env::var("GEYSER_GRPC_ENDPOINT").ok(),
            shred_endpoint: env::var("SHRED_GRPC_ENDPOINT").ok(),
            grpc_token: env::var("GRPC_X_TOKEN").ok(),
            rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            staked_rpc_url: env::var("STAKED_RPC_URL").ok(),
            keypair_path: env::var("SERVER_KEYPAIR_PATH").ok(),
            jupiter_quote_api: env::var("JUPITER_QUOTE_API")
                .unwrap_or_else(|_| DEFAULT_JUPITER_QUOTE_API.to_string()),
            jupiter_swap_api: env::var("JUPITER_SWAP_API")
                .unwrap_or_else(|_| DEFAULT_JUPITER_SWAP_API.to_string()),
            jupiter_price_api: env::var("JUPITER_PRICE_API")
                .unwrap_or_else(|_| DEFAULT_JUPITER_PRICE_API.to_string()),
            jupiter_api_key: env::var("JUPITER_API_KEY").ok(),
            orca_sidecar_url: env::var("ORCA_SIDECAR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5003".to_string()),
            jito_block_engines,
            audit_db_path: env::var("AUDIT_DB_PATH")
                .unwrap_or_else(|_| "solstrike_audit.db".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| split_csv(&v))
                .unwrap_or_default(),
            auth_enabled: env::var("AUTH_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            ip_whitelist: env::var("IP_WHITELIST")
                .map(|v| split_csv(&v))
                .unwrap_or_default(),
        })
    }

    /// RPC to use for reserve polls - staked when available.
    pub fn reserve_rpc_url(&self) -> &str {
        self.staked_rpc_url.as_deref().unwrap_or(&self.rpc_url)
    }

    /// True when the streaming fabric can be started at all.
    pub fn streaming_configured(&self) -> bool {
        self.grpc_token.is_some() && self.geyser_endpoint.is_some()
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv("a, b ,c"), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
        assert_eq!(split_csv("one"), vec!["one"]);
    }

    #[test]
    fn test_reserve_rpc_prefers_staked() {
        let mut cfg = Config {
            geyser_endpoint: None,
            shred_endpoint: None,
            grpc_token: None,
            rpc_url: "http://rpc".into(),
            staked_rpc_url: None,
            keypair_path: None,
            jupiter_quote_api: DEFAULT_JUPITER_QUOTE_API.into(),
            jupiter_swap_api: DEFAULT_JUPITER_SWAP_API.into(),
            jupiter_price_api: DEFAULT_JUPITER_PRICE_API.into(),
            jupiter_api_key: None,
            orca_sidecar_url: "http://127.0.0.1:5003".into(),
            jito_block_engines: vec![],
            audit_db_path: ":memory:".into(),
            allowed_origins: vec![],
            auth_enabled: false,
            ip_whitelist: vec![],
        };
        assert_eq!(cfg.reserve_rpc_url(), "http://rpc");
        cfg.staked_rpc_url = Some("http://staked".into());
        assert_eq!(cfg.reserve_rpc_url(), "http://staked");
        assert!(!cfg.streaming_configured());
    }
}
