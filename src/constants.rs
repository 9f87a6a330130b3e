/// Global constants for the solstrike execution core.
///
/// This module centralizes program ids, well-known mints and the hot-path
/// safety thresholds so the same values are used everywhere.
use once_cell::sync::Lazy;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// SOLANA BLOCKCHAIN CONSTANTS
// ============================================================================

/// 1 SOL = 1 billion lamports
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert lamports to SOL (floating point)
pub const fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Convert SOL to lamports
pub const fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64) as u64
}

/// Approximate slot time on mainnet
pub const SLOT_TIME_MS: u64 = 400;

// ============================================================================
// WELL-KNOWN MINTS
// ============================================================================

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

// ============================================================================
// DEX PROGRAM IDS
// ============================================================================

/// Raydium AMM V4 program ID
pub const RAYDIUM_V4_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Raydium AMM authority PDA (constant across all V4 pools)
pub const RAYDIUM_AUTHORITY_ID: &str = "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1";

/// OpenBook (Serum V3 successor) DEX program ID
pub const OPENBOOK_PROGRAM_ID: &str = "srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX";

/// Pump.fun launch program (touched on bonding-curve `create`)
pub const PUMPFUN_PROGRAM_ID: &str = "4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf";

/// Raydium swap instruction discriminator
pub const RAYDIUM_SWAP_DISCRIMINATOR: u8 = 9;

pub static RAYDIUM_V4_PROGRAM: Lazy<Pubkey> =
    Lazy::new(|| Pubkey::from_str(RAYDIUM_V4_PROGRAM_ID).expect("raydium v4 program id"));
pub static RAYDIUM_AUTHORITY: Lazy<Pubkey> =
    Lazy::new(|| Pubkey::from_str(RAYDIUM_AUTHORITY_ID).expect("raydium authority id"));
pub static OPENBOOK_PROGRAM: Lazy<Pubkey> =
    Lazy::new(|| Pubkey::from_str(OPENBOOK_PROGRAM_ID).expect("openbook program id"));
pub static WSOL: Lazy<Pubkey> = Lazy::new(|| Pubkey::from_str(WSOL_MINT).expect("wsol mint"));

// ============================================================================
// VENDOR APIS
// ============================================================================

/// Raydium V3 pools API (discovery only, never on the hot path)
pub const RAYDIUM_POOLS_API: &str = "https://api-v3.raydium.io/pools/info/mint";

/// Orca whirlpool list (advisory pool map bootstrap)
pub const ORCA_WHIRLPOOL_LIST_API: &str = "https://api.mainnet.orca.so/v1/whirlpool/list";

/// Jito tip floor percentile feed
pub const JITO_TIP_FLOOR_API: &str = "https://bundles.jito.wtf/api/v1/bundles/tip_floor";

/// Jito block engine endpoints (bundle relay)
pub const JITO_MAINNET_BLOCK_ENGINE: &str = "https://mainnet.block-engine.jito.wtf";
pub const JITO_NY_BLOCK_ENGINE: &str = "https://ny.mainnet.block-engine.jito.wtf";

// ============================================================================
// HOT-PATH SAFETY THRESHOLDS
// ============================================================================

/// A cached blockhash must have at least this many blocks of validity left
/// before a transaction may be built against it.
pub const MIN_BLOCKS_REMAINING: u64 = 20;

/// Pool reserves older than this many slots (~20s) are stale; direct swap
/// builds must fall through to the aggregator.
pub const MAX_RESERVE_AGE_SLOTS: u64 = 50;

/// Absolute floor for any Jito tip, regardless of feed or user settings.
pub const MIN_TIP_LAMPORTS: u64 = 1_000;

/// Flat per-strike fee estimate (USD) subtracted from gross arb profit.
pub const ARB_FLAT_FEE_USD: f64 = 0.25;

/// Minimum spread before an opportunity is even emitted.
pub const ARB_EMIT_SPREAD_PCT: f64 = 0.005;

/// Jito accepts 1 bundle/sec; submissions are spaced 1.1s for margin.
pub const BUNDLE_SUBMIT_INTERVAL_MS: u64 = 1_100;

// ============================================================================
// STREAMING CONSTANTS
// ============================================================================

/// Reconnect backoff: start, cap, multiplier
pub const STREAM_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const STREAM_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Keepalive ping interval on both gRPC streams
pub const STREAM_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Ceiling on the channel-ready handshake
pub const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Geyser updates can be large; raise the gRPC message ceiling to 64 MiB
pub const STREAM_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Fixed size of the callback dispatch pool
pub const CALLBACK_POOL_WORKERS: usize = 4;

// ============================================================================
// CACHE MAINTENANCE INTERVALS
// ============================================================================

/// Pool registry maintenance tick
pub const REGISTRY_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);

/// Reserves older than this are refreshed by polling (stream gap fill)
pub const RESERVE_REFRESH_AFTER: Duration = Duration::from_secs(30);

/// Full pool rediscovery interval
pub const POOL_REDISCOVERY_INTERVAL: Duration = Duration::from_secs(300);

/// Tip floor poll interval
pub const TIP_FLOOR_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Sniper detection poll interval
pub const SNIPER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// HFT position monitor tick
pub const HFT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// REQUEST TIMEOUTS
// ============================================================================

/// Price-matrix quote fan-out
pub const QUOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Orca sidecar build (loopback HTTP)
pub const SIDECAR_TIMEOUT: Duration = Duration::from_secs(3);

/// Aggregator quote request
pub const AGGREGATOR_QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregator swap-build request
pub const AGGREGATOR_SWAP_TIMEOUT: Duration = Duration::from_secs(10);

/// RPC helper calls (fallback path only)
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Asset metadata lookups
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_lamports_conversion() {
        assert_eq!(sol_to_lamports(1.0), LAMPORTS_PER_SOL);
        assert_eq!(lamports_to_sol(LAMPORTS_PER_SOL), 1.0);
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
    }

    #[test]
    fn test_program_ids_parse() {
        assert_eq!(RAYDIUM_V4_PROGRAM.to_string(), RAYDIUM_V4_PROGRAM_ID);
        assert_eq!(RAYDIUM_AUTHORITY.to_string(), RAYDIUM_AUTHORITY_ID);
        assert_eq!(OPENBOOK_PROGRAM.to_string(), OPENBOOK_PROGRAM_ID);
        assert_eq!(WSOL.to_string(), WSOL_MINT);
    }

    #[test]
    fn test_thresholds_are_sane() {
        assert!(MIN_BLOCKS_REMAINING >= 10);
        assert!(MAX_RESERVE_AGE_SLOTS * SLOT_TIME_MS / 1000 <= 30);
        assert!(MIN_TIP_LAMPORTS > 0);
        assert!(STREAM_INITIAL_BACKOFF < STREAM_MAX_BACKOFF);
    }
}
