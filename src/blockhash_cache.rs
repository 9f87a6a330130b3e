//! Blockhash cache - zero-RPC blockhash + slot reads for builders.
//!
//! Fed by the Geyser blocks-meta and slot subscriptions. Until the first
//! update lands the cache reports unavailable and no transaction may be
//! built.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::constants::MIN_BLOCKS_REMAINING;
use crate::stream_manager::{SlotCommitment, StreamManager};

#[derive(Debug, Default)]
struct State {
    blockhash: Option<String>,
    last_valid_block_height: u64,
    observed_slot: u64,
    current_slot: u64,
    updated_at: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockhashStatus {
    pub available: bool,
    pub current_slot: u64,
    pub last_valid_block_height: u64,
    pub blocks_remaining: Option<i64>,
    pub age_ms: Option<u64>,
}

/// Single-writer (stream callbacks), many-reader cache.
#[derive(Default)]
pub struct BlockhashCache {
    state: RwLock<State>,
}

impl BlockhashCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wire the cache into the streaming fabric.
    pub fn attach_stream(self: &Arc<Self>, stream: &StreamManager) {
        let cache = Arc::clone(self);
        stream.subscribe_blocks_meta("blockhash", move |slot, blockhash, block_height| {
            cache.on_blocks_meta(slot, blockhash, block_height);
            Ok(())
        });

        let cache = Arc::clone(self);
        stream.subscribe_slots("blockhash_slot", move |slot, commitment| {
            if commitment == SlotCommitment::Confirmed {
                cache.on_slot(slot);
            }
            Ok(())
        });
        info!("🧊 BlockhashCache wired into stream manager");
    }

    /// Stream-facing entry point: a blocks-meta update. Public so an
    /// alternative feed can drive the cache when the fabric is down.
    pub fn on_blocks_meta(&self, slot: u64, blockhash: String, block_height: u64) {
        let mut state = self.state.write();
        let first = state.blockhash.is_none();
        state.blockhash = Some(blockhash);
        // Standard validity window is 150 blocks past the observed height.
        state.last_valid_block_height = block_height + 150;
        state.observed_slot = slot;
        state.current_slot = state.current_slot.max(slot);
        state.updated_at = Some(Instant::now());
        if first {
            info!("🧊 BlockhashCache primed (slot {})", slot);
        } else {
            debug!("blockhash update at slot {}", slot);
        }
    }

    /// Stream-facing entry point: a confirmed slot observation.
    pub fn on_slot(&self, slot: u64) {
        let mut state = self.state.write();
        state.current_slot = state.current_slot.max(slot);
    }

    /// `(blockhash, last_valid_block_height)` - `None` while unavailable.
    pub fn get_blockhash(&self) -> Option<(String, u64)> {
        let state = self.state.read();
        state
            .blockhash
            .clone()
            .map(|h| (h, state.last_valid_block_height))
    }

    /// Most recent confirmed slot, 0 until the first update.
    pub fn get_slot(&self) -> u64 {
        self.state.read().current_slot
    }

    /// Blocks of validity left on the cached hash.
    pub fn blocks_remaining(&self) -> Option<i64> {
        let state = self.state.read();
        if state.blockhash.is_none() || state.current_slot == 0 {
            return None;
        }
        Some(state.last_valid_block_height as i64 - state.current_slot as i64)
    }

    /// Enforces the submission policy: a cached hash is only usable while at
    /// least [`MIN_BLOCKS_REMAINING`] blocks of validity remain.
    pub fn usable_blockhash(&self) -> Option<(String, u64, i64)> {
        let (hash, last_valid) = self.get_blockhash()?;
        let remaining = self.blocks_remaining()?;
        if remaining < MIN_BLOCKS_REMAINING as i64 {
            return None;
        }
        Some((hash, last_valid, remaining))
    }

    pub fn status(&self) -> BlockhashStatus {
        let state = self.state.read();
        BlockhashStatus {
            available: state.blockhash.is_some(),
            current_slot: state.current_slot,
            last_valid_block_height: state.last_valid_block_height,
            blocks_remaining: if state.blockhash.is_some() && state.current_slot > 0 {
                Some(state.last_valid_block_height as i64 - state.current_slot as i64)
            } else {
                None
            },
            age_ms: state.updated_at.map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_until_first_update() {
        let cache = BlockhashCache::new();
        assert!(cache.get_blockhash().is_none());
        assert!(cache.usable_blockhash().is_none());
        assert_eq!(cache.get_slot(), 0);
    }

    #[test]
    fn test_blocks_remaining_math() {
        let cache = BlockhashCache::new();
        cache.on_blocks_meta(1_000, "hash11111111111111111111111111111111".into(), 900);
        cache.on_slot(1_010);
        // last_valid = 900 + 150 = 1050, current = 1010
        assert_eq!(cache.blocks_remaining(), Some(40));
        let (_, last_valid, remaining) = cache.usable_blockhash().unwrap();
        assert_eq!(last_valid, 1_050);
        assert_eq!(remaining, 40);
    }

    #[test]
    fn test_near_expiry_hash_is_unusable() {
        let cache = BlockhashCache::new();
        cache.on_blocks_meta(1_000, "hash".into(), 900);
        cache.on_slot(1_035);
        // 1050 - 1035 = 15 < 20
        assert_eq!(cache.blocks_remaining(), Some(15));
        assert!(cache.usable_blockhash().is_none());
    }

    #[test]
    fn test_slot_never_goes_backwards() {
        let cache = BlockhashCache::new();
        cache.on_slot(500);
        cache.on_slot(490);
        assert_eq!(cache.get_slot(), 500);
    }
}
