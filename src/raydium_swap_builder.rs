//! Raydium AMM V4 swap transaction builder.
//!
//! Synthesizes the full swap as a version-0 transaction entirely from cached
//! pool state - no vendor round trip. Wrapped-SOL legs get the usual
//! wrap/sync/close choreography around the swap instruction.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    system_instruction,
    transaction::VersionedTransaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::str::FromStr;

use crate::constants::{RAYDIUM_AUTHORITY, RAYDIUM_SWAP_DISCRIMINATOR, RAYDIUM_V4_PROGRAM, WSOL};
use crate::raydium_pool_state::RaydiumPoolState;

/// Compute budget applied to every locally built swap.
const SWAP_COMPUTE_UNIT_LIMIT: u32 = 300_000;
const SWAP_COMPUTE_UNIT_PRICE: u64 = 10_000;

/// Build the V4 swap instruction: discriminator 9 + two LE u64s, and the
/// exact 18-account list the program requires, in order.
pub fn build_swap_instruction(
    pool: &RaydiumPoolState,
    user: &Pubkey,
    user_source: &Pubkey,
    user_dest: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(17);
    data.push(RAYDIUM_SWAP_DISCRIMINATOR);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&min_amount_out.to_le_bytes());

    let accounts = vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new(pool.pool_address, false),
        AccountMeta::new_readonly(*RAYDIUM_AUTHORITY, false),
        AccountMeta::new(pool.open_orders, false),
        AccountMeta::new(pool.target_orders, false),
        AccountMeta::new(pool.coin_vault, false),
        AccountMeta::new(pool.pc_vault, false),
        AccountMeta::new_readonly(pool.serum_program, false),
        AccountMeta::new(pool.market_address, false),
        AccountMeta::new(pool.market_bids, false),
        AccountMeta::new(pool.market_asks, false),
        AccountMeta::new(pool.market_event_queue, false),
        AccountMeta::new(pool.market_coin_vault, false),
        AccountMeta::new(pool.market_pc_vault, false),
        AccountMeta::new_readonly(pool.market_vault_signer, false),
        AccountMeta::new(*user_source, false),
        AccountMeta::new(*user_dest, false),
        AccountMeta::new_readonly(*user, true),
    ];

    Instruction {
        program_id: *RAYDIUM_V4_PROGRAM,
        accounts,
        data,
    }
}

/// Build the complete unsigned swap transaction.
///
/// Returns a base64-encoded version-0 transaction with zero signatures; the
/// executor attaches the server signature just before submission.
pub fn build_swap_transaction(
    pool: &RaydiumPoolState,
    amount_in: u64,
    min_amount_out: u64,
    coin_to_pc: bool,
    user: &Pubkey,
    blockhash: &str,
) -> Result<String> {
    let mut instructions = Vec::new();

    instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
        SWAP_COMPUTE_UNIT_LIMIT,
    ));
    instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
        SWAP_COMPUTE_UNIT_PRICE,
    ));

    let (input_mint, output_mint) = if coin_to_pc {
        (pool.coin_mint, pool.pc_mint)
    } else {
        (pool.pc_mint, pool.coin_mint)
    };
    let wraps_sol = input_mint == *WSOL;
    let unwraps_sol = output_mint == *WSOL;

    let user_source = get_associated_token_address(user, &input_mint);
    let user_dest = get_associated_token_address(user, &output_mint);

    // Wrapped-SOL input: fund the ATA with lamports and sync it.
    if wraps_sol {
        instructions.push(create_associated_token_account_idempotent(
            user,
            user,
            &input_mint,
            &spl_token::id(),
        ));
        instructions.push(system_instruction::transfer(user, &user_source, amount_in));
        instructions.push(
            spl_token::instruction::sync_native(&spl_token::id(), &user_source)
                .context("sync_native instruction")?,
        );
    }

    // Output ATA may not exist yet.
    instructions.push(create_associated_token_account_idempotent(
        user,
        user,
        &output_mint,
        &spl_token::id(),
    ));

    instructions.push(build_swap_instruction(
        pool,
        user,
        &user_source,
        &user_dest,
        amount_in,
        min_amount_out,
    ));

    // Return lamports locked in wSOL ATAs.
    if unwraps_sol {
        instructions.push(
            spl_token::instruction::close_account(&spl_token::id(), &user_dest, user, user, &[])
                .context("close output wsol account")?,
        );
    }
    if wraps_sol {
        instructions.push(
            spl_token::instruction::close_account(&spl_token::id(), &user_source, user, user, &[])
                .context("close source wsol account")?,
        );
    }

    let recent_blockhash = Hash::from_str(blockhash).context("blockhash parse")?;
    let message = v0::Message::try_compile(user, &instructions, &[], recent_blockhash)
        .context("v0 message compile")?;
    let tx = VersionedTransaction {
        signatures: vec![],
        message: VersionedMessage::V0(message),
    };
    let bytes = bincode::serialize(&tx).context("transaction serialize")?;
    Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raydium_registry::test_pool;

    #[test]
    fn test_swap_instruction_data_layout() {
        let pool = test_pool(1_000, 1_000, 25, 10_000);
        let user = Pubkey::new_unique();
        let source = Pubkey::new_unique();
        let dest = Pubkey::new_unique();

        let ix = build_swap_instruction(&pool, &user, &source, &dest, 1_000_000_000, 900_000_000);

        assert_eq!(ix.program_id, *RAYDIUM_V4_PROGRAM);
        assert_eq!(ix.data.len(), 17);
        assert_eq!(ix.data[0], RAYDIUM_SWAP_DISCRIMINATOR);
        assert_eq!(
            u64::from_le_bytes(ix.data[1..9].try_into().unwrap()),
            1_000_000_000
        );
        assert_eq!(
            u64::from_le_bytes(ix.data[9..17].try_into().unwrap()),
            900_000_000
        );
    }

    #[test]
    fn test_swap_instruction_account_list() {
        let pool = test_pool(1_000, 1_000, 25, 10_000);
        let user = Pubkey::new_unique();
        let source = Pubkey::new_unique();
        let dest = Pubkey::new_unique();

        let ix = build_swap_instruction(&pool, &user, &source, &dest, 1, 1);

        assert_eq!(ix.accounts.len(), 18);
        // Positional contract, spot-checked front to back.
        assert_eq!(ix.accounts[0].pubkey, spl_token::id());
        assert!(!ix.accounts[0].is_writable);
        assert_eq!(ix.accounts[1].pubkey, pool.pool_address);
        assert!(ix.accounts[1].is_writable);
        assert_eq!(ix.accounts[2].pubkey, *RAYDIUM_AUTHORITY);
        assert_eq!(ix.accounts[3].pubkey, pool.open_orders);
        assert_eq!(ix.accounts[4].pubkey, pool.target_orders);
        assert_eq!(ix.accounts[5].pubkey, pool.coin_vault);
        assert_eq!(ix.accounts[6].pubkey, pool.pc_vault);
        assert_eq!(ix.accounts[7].pubkey, pool.serum_program);
        assert_eq!(ix.accounts[8].pubkey, pool.market_address);
        assert_eq!(ix.accounts[9].pubkey, pool.market_bids);
        assert_eq!(ix.accounts[10].pubkey, pool.market_asks);
        assert_eq!(ix.accounts[11].pubkey, pool.market_event_queue);
        assert_eq!(ix.accounts[12].pubkey, pool.market_coin_vault);
        assert_eq!(ix.accounts[13].pubkey, pool.market_pc_vault);
        assert_eq!(ix.accounts[14].pubkey, pool.market_vault_signer);
        assert!(!ix.accounts[14].is_writable);
        assert_eq!(ix.accounts[15].pubkey, source);
        assert_eq!(ix.accounts[16].pubkey, dest);
        // Only the user signs.
        assert_eq!(ix.accounts[17].pubkey, user);
        assert!(ix.accounts[17].is_signer);
        assert_eq!(ix.accounts.iter().filter(|a| a.is_signer).count(), 1);
    }

    fn decode_tx(b64: &str) -> VersionedTransaction {
        let bytes = BASE64.decode(b64).unwrap();
        bincode::deserialize(&bytes).unwrap()
    }

    #[test]
    fn test_build_transaction_plain_pair() {
        // Neither side is wSOL: compute budget x2, create dest ATA, swap.
        let pool = test_pool(1_000, 1_000, 25, 10_000);
        let user = Pubkey::new_unique();
        let blockhash = Hash::new_unique().to_string();

        let b64 = build_swap_transaction(&pool, 5_000, 4_900, true, &user, &blockhash).unwrap();
        let tx = decode_tx(&b64);
        assert!(tx.signatures.is_empty());
        let VersionedMessage::V0(msg) = tx.message else {
            panic!("expected v0 message");
        };
        assert_eq!(msg.instructions.len(), 4);
        assert!(msg.address_table_lookups.is_empty());
    }

    #[test]
    fn test_build_transaction_wraps_and_closes_wsol_input() {
        let mut pool = test_pool(1_000, 1_000, 25, 10_000);
        pool.coin_mint = *WSOL;
        let user = Pubkey::new_unique();
        let blockhash = Hash::new_unique().to_string();

        let b64 = build_swap_transaction(&pool, 5_000, 4_900, true, &user, &blockhash).unwrap();
        let VersionedMessage::V0(msg) = decode_tx(&b64).message else {
            panic!("expected v0 message");
        };
        // budget x2 + create wsol ata + transfer + sync + create dest ata
        // + swap + close source
        assert_eq!(msg.instructions.len(), 8);
    }

    #[test]
    fn test_build_transaction_unwraps_wsol_output() {
        let mut pool = test_pool(1_000, 1_000, 25, 10_000);
        pool.pc_mint = *WSOL;
        let user = Pubkey::new_unique();
        let blockhash = Hash::new_unique().to_string();

        let b64 = build_swap_transaction(&pool, 5_000, 4_900, true, &user, &blockhash).unwrap();
        let VersionedMessage::V0(msg) = decode_tx(&b64).message else {
            panic!("expected v0 message");
        };
        // budget x2 + create dest ata + swap + close dest
        assert_eq!(msg.instructions.len(), 5);
    }

    #[test]
    fn test_bad_blockhash_rejected() {
        let pool = test_pool(1_000, 1_000, 25, 10_000);
        let user = Pubkey::new_unique();
        assert!(build_swap_transaction(&pool, 1, 1, true, &user, "not-a-hash").is_err());
    }
}
