//! Jito tip floor cache.
//!
//! Polls the block builder's landed-tip percentile feed every ~10s and
//! serves tip suggestions from memory. Consumers pick a percentile and get
//! `max(percentile_value, user_floor, absolute_minimum)` back.

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{
    JITO_TIP_FLOOR_API, MIN_TIP_LAMPORTS, RPC_TIMEOUT, TIP_FLOOR_POLL_INTERVAL,
};

/// One snapshot of the landed-tips percentile feed (values in SOL).
#[derive(Debug, Clone, Deserialize)]
pub struct TipFloorSnapshot {
    #[serde(rename = "landed_tips_25th_percentile")]
    pub landed_tips_25th: f64,
    #[serde(rename = "landed_tips_50th_percentile")]
    pub landed_tips_50th: f64,
    #[serde(rename = "landed_tips_75th_percentile")]
    pub landed_tips_75th: f64,
    #[serde(rename = "landed_tips_95th_percentile")]
    pub landed_tips_95th: f64,
    #[serde(rename = "landed_tips_99th_percentile")]
    pub landed_tips_99th: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipPercentile {
    P25,
    P50,
    P75,
    P95,
    P99,
}

impl FromStr for TipPercentile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "25" | "25th" => Ok(Self::P25),
            "50" | "50th" => Ok(Self::P50),
            "75" | "75th" => Ok(Self::P75),
            "95" | "95th" => Ok(Self::P95),
            "99" | "99th" => Ok(Self::P99),
            other => Err(anyhow!("unknown tip percentile: {}", other)),
        }
    }
}

impl TipFloorSnapshot {
    fn value_sol(&self, percentile: TipPercentile) -> f64 {
        match percentile {
            TipPercentile::P25 => self.landed_tips_25th,
            TipPercentile::P50 => self.landed_tips_50th,
            TipPercentile::P75 => self.landed_tips_75th,
            TipPercentile::P95 => self.landed_tips_95th,
            TipPercentile::P99 => self.landed_tips_99th,
        }
    }
}

struct CacheState {
    snapshot: Option<TipFloorSnapshot>,
    fetched_at: Option<Instant>,
}

pub struct TipFloorCache {
    http: reqwest::Client,
    url: String,
    state: RwLock<CacheState>,
    running: AtomicBool,
    poll_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TipFloorCache {
    pub fn new() -> Arc<Self> {
        Self::with_url(JITO_TIP_FLOOR_API)
    }

    pub fn with_url(url: &str) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
            state: RwLock::new(CacheState {
                snapshot: None,
                fetched_at: None,
            }),
            running: AtomicBool::new(false),
            poll_task: parking_lot::Mutex::new(None),
        })
    }

    /// Start the background poll loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = Arc::clone(self);
        *self.poll_task.lock() = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(TIP_FLOOR_POLL_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while cache.running.load(Ordering::SeqCst) {
                tick.tick().await;
                if let Err(e) = cache.refresh().await {
                    warn!("💰 Tip floor refresh failed: {:#}", e);
                }
            }
        }));
        info!("💰 TipFloorCache started ({}s poll)", TIP_FLOOR_POLL_INTERVAL.as_secs());
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
    }

    async fn refresh(&self) -> Result<()> {
        let resp = self
            .http
            .get(&self.url)
            .timeout(RPC_TIMEOUT)
            .send()
            .await
            .context("tip floor request")?;
        // The feed returns a one-element array of percentile snapshots.
        let snapshots: Vec<TipFloorSnapshot> =
            resp.json().await.context("tip floor response parse")?;
        let Some(snapshot) = snapshots.into_iter().next() else {
            return Err(anyhow!("tip floor feed returned an empty list"));
        };
        debug!(
            "💰 Tip floor refreshed: 75th = {:.6} SOL | 95th = {:.6} SOL",
            snapshot.landed_tips_75th, snapshot.landed_tips_95th
        );
        let mut state = self.state.write();
        state.snapshot = Some(snapshot);
        state.fetched_at = Some(Instant::now());
        Ok(())
    }

    /// Install a snapshot directly (used on startup before the first poll
    /// completes, and by tests).
    pub fn install_snapshot(&self, snapshot: TipFloorSnapshot) {
        let mut state = self.state.write();
        state.snapshot = Some(snapshot);
        state.fetched_at = Some(Instant::now());
    }

    /// Tip in lamports: the requested percentile, floored by the user's
    /// minimum and the absolute minimum. Pure in-memory read.
    pub fn get_optimal_tip(
        &self,
        percentile: TipPercentile,
        user_min_lamports: Option<u64>,
    ) -> u64 {
        let feed_lamports = {
            let state = self.state.read();
            state
                .snapshot
                .as_ref()
                .map(|s| (s.value_sol(percentile) * 1e9) as u64)
                .unwrap_or(0)
        };
        feed_lamports
            .max(user_min_lamports.unwrap_or(0))
            .max(MIN_TIP_LAMPORTS)
    }

    pub fn age(&self) -> Option<std::time::Duration> {
        self.state.read().fetched_at.map(|t| t.elapsed())
    }
}
