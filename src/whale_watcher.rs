//! Whale transaction watcher.
//!
//! Rides the pre-execution shred stream: any transaction touching a tracked
//! wallet surfaces here 15-100ms before Geyser would deliver it. The shred
//! feed carries no logs or meta, so a bounded background task fetches the
//! full transaction before the event is emitted. Copy-execution strategy is
//! the API layer's concern; this module only detects and deduplicates.

use chrono::Utc;
use lru::LruCache;
use nonzero_ext::nonzero;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::events::{Event, EventBus, WhaleSwap};
use crate::rpc_client::RpcHttpClient;
use crate::stream_manager::{StreamManager, TransactionNotice};

struct WatcherInner {
    targets: RwLock<Vec<String>>,
    seen: Mutex<LruCache<String, ()>>,
    rpc: Arc<RpcHttpClient>,
    events: EventBus,
    running: AtomicBool,
    detections: AtomicU64,
}

#[derive(Clone)]
pub struct WhaleWatcher {
    inner: Arc<WatcherInner>,
}

impl WhaleWatcher {
    pub fn new(rpc: Arc<RpcHttpClient>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                targets: RwLock::new(Vec::new()),
                seen: Mutex::new(LruCache::new(nonzero!(1_000usize))),
                rpc,
                events,
                running: AtomicBool::new(false),
                detections: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_targets(&self, wallets: Vec<String>) {
        info!("🐋 Whale watcher tracking {} wallets", wallets.len());
        *self.inner.targets.write() = wallets;
    }

    pub fn targets(&self) -> Vec<String> {
        self.inner.targets.read().clone()
    }

    pub fn detections(&self) -> u64 {
        self.inner.detections.load(Ordering::Relaxed)
    }

    /// Register the shred-level transaction subscription for the current
    /// target set.
    pub fn attach_stream(&self, stream: &StreamManager) {
        let targets = self.targets();
        if targets.is_empty() {
            debug!("🐋 No whale targets configured - subscription skipped");
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        stream.subscribe_transactions("whale_watch", targets, move |notice| {
            on_transaction(&inner, notice);
            Ok(())
        });
        info!("🐋 Whale watcher wired into shred stream");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Dedup seam: true if the signature was fresh (and is now recorded).
    pub fn mark_seen(&self, signature: &str) -> bool {
        let mut seen = self.inner.seen.lock();
        if seen.contains(signature) {
            return false;
        }
        seen.put(signature.to_string(), ());
        true
    }
}

fn on_transaction(inner: &Arc<WatcherInner>, notice: TransactionNotice) {
    if !inner.running.load(Ordering::SeqCst) {
        return;
    }
    // Same signature arrives from both streams and from reconnect replays.
    {
        let mut seen = inner.seen.lock();
        if seen.contains(&notice.signature) {
            return;
        }
        seen.put(notice.signature.clone(), ());
    }

    let wallet = {
        let targets = inner.targets.read();
        notice
            .account_keys
            .iter()
            .find(|k| targets.contains(k))
            .cloned()
    };
    let Some(wallet) = wallet else {
        return;
    };
    inner.detections.fetch_add(1, Ordering::Relaxed);

    // Shreds carry no meta - fetch the full transaction off-thread, then
    // emit. The event goes out even if the fetch misses (pre-execution
    // signatures may not be queryable yet); the detection itself is the
    // time-critical signal.
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        match inner.rpc.get_transaction_json(&notice.signature).await {
            Ok(Some(_tx)) => debug!(
                "🐋 Whale tx decoded: {}...",
                &notice.signature[..16.min(notice.signature.len())]
            ),
            _ => debug!(
                "🐋 Whale tx not yet queryable: {}...",
                &notice.signature[..16.min(notice.signature.len())]
            ),
        }
        info!(
            "🐋 Whale swap detected: wallet {}... sig {}... slot {}",
            &wallet[..8.min(wallet.len())],
            &notice.signature[..16.min(notice.signature.len())],
            notice.slot
        );
        inner.events.emit(Event::WhaleSwapDetected(WhaleSwap {
            wallet,
            signature: notice.signature,
            slot: notice.slot,
            detected_at: Utc::now(),
        }));
    });
}
