//! Raydium AMM V4 account layouts.
//!
//! Fixed-offset parsing of the 752-byte V4 pool state, the OpenBook market
//! account it references, and SPL token vault balances. All integers are
//! little-endian.

use anyhow::{anyhow, Result};
use solana_sdk::pubkey::Pubkey;
use std::time::Instant;
use tracing::warn;

use crate::constants::OPENBOOK_PROGRAM;

/// Full V4 pool account size.
pub const POOL_STATE_SIZE: usize = 752;
/// Everything we read lives below this offset; shorter accounts are rejected.
pub const POOL_STATE_MIN_SIZE: usize = 712;
/// Minimum OpenBook market account size for the fields we read.
pub const MARKET_MIN_SIZE: usize = 380;
/// SPL token account: amount is a u64 at this offset.
pub const TOKEN_ACCOUNT_AMOUNT_OFFSET: usize = 64;
pub const TOKEN_ACCOUNT_MIN_SIZE: usize = 72;

// V4 pool state offsets
const OFF_BASE_DECIMAL: usize = 40;
const OFF_QUOTE_DECIMAL: usize = 48;
const OFF_TRADE_FEE_NUMERATOR: usize = 152;
const OFF_TRADE_FEE_DENOMINATOR: usize = 160;
const OFF_SWAP_FEE_NUMERATOR: usize = 184;
const OFF_SWAP_FEE_DENOMINATOR: usize = 192;
const OFF_POOL_COIN_TOKEN_ACCOUNT: usize = 320;
const OFF_POOL_PC_TOKEN_ACCOUNT: usize = 352;
const OFF_COIN_MINT_ADDRESS: usize = 384;
const OFF_PC_MINT_ADDRESS: usize = 416;
const OFF_OPEN_ORDERS: usize = 480;
const OFF_MARKET: usize = 512;
const OFF_SERUM_DEX: usize = 544;
const OFF_TARGET_ORDERS: usize = 576;

// OpenBook market offsets
const OFF_MKT_VAULT_SIGNER_NONCE: usize = 45;
const OFF_MKT_BASE_VAULT: usize = 117;
const OFF_MKT_QUOTE_VAULT: usize = 165;
const OFF_MKT_EVENT_QUEUE: usize = 253;
const OFF_MKT_BIDS: usize = 285;
const OFF_MKT_ASKS: usize = 317;

/// All accounts + live state needed to build a V4 swap instruction locally.
#[derive(Debug, Clone)]
pub struct RaydiumPoolState {
    pub pool_address: Pubkey,
    pub coin_mint: Pubkey,
    pub pc_mint: Pubkey,
    pub coin_decimals: u8,
    pub pc_decimals: u8,

    // Pool accounts
    pub coin_vault: Pubkey,
    pub pc_vault: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub market_address: Pubkey,
    pub serum_program: Pubkey,

    // OpenBook market accounts
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
    pub market_coin_vault: Pubkey,
    pub market_pc_vault: Pubkey,
    pub market_vault_signer: Pubkey,

    // Fee parameters
    pub trade_fee_numerator: u64,
    pub trade_fee_denominator: u64,
    pub swap_fee_numerator: u64,
    pub swap_fee_denominator: u64,

    // Live reserves (stream-fed, poll-reconciled)
    pub coin_reserve: u64,
    pub pc_reserve: u64,
    pub last_update_slot: u64,
    pub last_update_time: Option<Instant>,
}

/// Pool-account fields, before the market has been resolved.
#[derive(Debug, Clone)]
pub struct ParsedPoolAccount {
    pub coin_vault: Pubkey,
    pub pc_vault: Pubkey,
    pub coin_mint: Pubkey,
    pub pc_mint: Pubkey,
    pub open_orders: Pubkey,
    pub market_address: Pubkey,
    pub serum_program: Pubkey,
    pub target_orders: Pubkey,
    pub coin_decimals: u8,
    pub pc_decimals: u8,
    pub trade_fee_numerator: u64,
    pub trade_fee_denominator: u64,
    pub swap_fee_numerator: u64,
    pub swap_fee_denominator: u64,
}

#[derive(Debug, Clone)]
pub struct ParsedMarketAccount {
    pub vault_signer_nonce: u64,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let bytes: [u8; 8] = data
        .get(offset..offset + 8)
        .ok_or_else(|| anyhow!("u64 read past end at offset {}", offset))?
        .try_into()?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_pubkey(data: &[u8], offset: usize) -> Result<Pubkey> {
    let bytes: [u8; 32] = data
        .get(offset..offset + 32)
        .ok_or_else(|| anyhow!("pubkey read past end at offset {}", offset))?
        .try_into()?;
    Ok(Pubkey::new_from_array(bytes))
}

/// Parse the fixed-offset V4 pool account layout.
pub fn parse_pool_account(data: &[u8]) -> Result<ParsedPoolAccount> {
    if data.len() < POOL_STATE_MIN_SIZE {
        return Err(anyhow!(
            "pool account data too short: {} bytes (need {})",
            data.len(),
            POOL_STATE_MIN_SIZE
        ));
    }
    Ok(ParsedPoolAccount {
        coin_vault: read_pubkey(data, OFF_POOL_COIN_TOKEN_ACCOUNT)?,
        pc_vault: read_pubkey(data, OFF_POOL_PC_TOKEN_ACCOUNT)?,
        coin_mint: read_pubkey(data, OFF_COIN_MINT_ADDRESS)?,
        pc_mint: read_pubkey(data, OFF_PC_MINT_ADDRESS)?,
        open_orders: read_pubkey(data, OFF_OPEN_ORDERS)?,
        market_address: read_pubkey(data, OFF_MARKET)?,
        serum_program: read_pubkey(data, OFF_SERUM_DEX)?,
        target_orders: read_pubkey(data, OFF_TARGET_ORDERS)?,
        coin_decimals: read_u64(data, OFF_BASE_DECIMAL)? as u8,
        pc_decimals: read_u64(data, OFF_QUOTE_DECIMAL)? as u8,
        trade_fee_numerator: read_u64(data, OFF_TRADE_FEE_NUMERATOR)?,
        trade_fee_denominator: read_u64(data, OFF_TRADE_FEE_DENOMINATOR)?,
        swap_fee_numerator: read_u64(data, OFF_SWAP_FEE_NUMERATOR)?,
        swap_fee_denominator: read_u64(data, OFF_SWAP_FEE_DENOMINATOR)?,
    })
}

/// Parse the OpenBook market account fields the swap instruction needs.
pub fn parse_market_account(data: &[u8]) -> Result<ParsedMarketAccount> {
    if data.len() < MARKET_MIN_SIZE {
        return Err(anyhow!(
            "market account data too short: {} bytes (need {})",
            data.len(),
            MARKET_MIN_SIZE
        ));
    }
    Ok(ParsedMarketAccount {
        vault_signer_nonce: read_u64(data, OFF_MKT_VAULT_SIGNER_NONCE)?,
        base_vault: read_pubkey(data, OFF_MKT_BASE_VAULT)?,
        quote_vault: read_pubkey(data, OFF_MKT_QUOTE_VAULT)?,
        event_queue: read_pubkey(data, OFF_MKT_EVENT_QUEUE)?,
        bids: read_pubkey(data, OFF_MKT_BIDS)?,
        asks: read_pubkey(data, OFF_MKT_ASKS)?,
    })
}

/// SPL token account balance (u64 at offset 64), `None` for short data.
pub fn parse_token_account_amount(data: &[u8]) -> Option<u64> {
    if data.len() < TOKEN_ACCOUNT_MIN_SIZE {
        return None;
    }
    read_u64(data, TOKEN_ACCOUNT_AMOUNT_OFFSET).ok()
}

/// Derive the OpenBook market vault-signer PDA.
///
/// The on-chain convention is an 8-byte little-endian nonce seed. A
/// single-byte fallback exists in the wild but is unused in practice; it is
/// only tried (with a warning) if the primary derivation fails.
pub fn derive_market_vault_signer(market: &Pubkey, nonce: u64) -> Result<Pubkey> {
    let nonce_le = nonce.to_le_bytes();
    match Pubkey::create_program_address(&[market.as_ref(), &nonce_le], &OPENBOOK_PROGRAM) {
        Ok(pda) => Ok(pda),
        Err(primary_err) => {
            warn!(
                "vault signer derivation failed for market {} (nonce {}): {} - trying 1-byte fallback",
                market, nonce, primary_err
            );
            Pubkey::create_program_address(
                &[market.as_ref(), &[(nonce & 0xFF) as u8]],
                &OPENBOOK_PROGRAM,
            )
            .map_err(|e| anyhow!("vault signer fallback derivation failed: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pubkey(buf: &mut [u8], offset: usize, key: &Pubkey) {
        buf[offset..offset + 32].copy_from_slice(key.as_ref());
    }

    fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_parse_pool_account_offsets() {
        let mut data = vec![0u8; POOL_STATE_SIZE];
        let coin_mint = Pubkey::new_unique();
        let pc_mint = Pubkey::new_unique();
        let coin_vault = Pubkey::new_unique();
        let market = Pubkey::new_unique();

        write_u64(&mut data, 40, 9); // base decimals
        write_u64(&mut data, 48, 6); // quote decimals
        write_u64(&mut data, 152, 25);
        write_u64(&mut data, 160, 10_000);
        write_u64(&mut data, 184, 25);
        write_u64(&mut data, 192, 10_000);
        write_pubkey(&mut data, 320, &coin_vault);
        write_pubkey(&mut data, 384, &coin_mint);
        write_pubkey(&mut data, 416, &pc_mint);
        write_pubkey(&mut data, 512, &market);

        let parsed = parse_pool_account(&data).unwrap();
        assert_eq!(parsed.coin_decimals, 9);
        assert_eq!(parsed.pc_decimals, 6);
        assert_eq!(parsed.trade_fee_numerator, 25);
        assert_eq!(parsed.trade_fee_denominator, 10_000);
        assert_eq!(parsed.coin_vault, coin_vault);
        assert_eq!(parsed.coin_mint, coin_mint);
        assert_eq!(parsed.pc_mint, pc_mint);
        assert_eq!(parsed.market_address, market);
    }

    #[test]
    fn test_parse_pool_account_too_short() {
        let data = vec![0u8; 100];
        let err = parse_pool_account(&data).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_parse_market_account_offsets() {
        let mut data = vec![0u8; 400];
        let bids = Pubkey::new_unique();
        let asks = Pubkey::new_unique();
        let event_queue = Pubkey::new_unique();
        write_u64(&mut data, 45, 3);
        write_pubkey(&mut data, 253, &event_queue);
        write_pubkey(&mut data, 285, &bids);
        write_pubkey(&mut data, 317, &asks);

        let parsed = parse_market_account(&data).unwrap();
        assert_eq!(parsed.vault_signer_nonce, 3);
        assert_eq!(parsed.bids, bids);
        assert_eq!(parsed.asks, asks);
        assert_eq!(parsed.event_queue, event_queue);
    }

    #[test]
    fn test_parse_token_account_amount() {
        let mut data = vec![0u8; 165];
        write_u64(&mut data, 64, 123_456_789);
        assert_eq!(parse_token_account_amount(&data), Some(123_456_789));
        assert_eq!(parse_token_account_amount(&data[..70]), None);
    }

    #[test]
    fn test_vault_signer_derivation_finds_valid_nonce() {
        // A real market stores whichever nonce makes the PDA land off-curve;
        // emulate that by searching for one the same way the DEX does.
        let market = Pubkey::new_unique();
        let mut valid_nonce = None;
        for nonce in 0u64..255 {
            if Pubkey::create_program_address(
                &[market.as_ref(), &nonce.to_le_bytes()],
                &OPENBOOK_PROGRAM,
            )
            .is_ok()
            {
                valid_nonce = Some(nonce);
                break;
            }
        }
        let nonce = valid_nonce.expect("some nonce yields a valid PDA");
        let signer = derive_market_vault_signer(&market, nonce).unwrap();
        assert_ne!(signer, Pubkey::default());
    }
}
