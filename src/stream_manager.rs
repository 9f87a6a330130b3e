//! Streaming ingest fabric - dual Yellowstone gRPC connections.
//!
//! Two persistent streams feed the whole pipeline:
//!   - Geyser (post-execution): account / slot / program / block-meta updates
//!     with full metadata.
//!   - Shred stream (pre-execution): transactions surfaced from shreds,
//!     15-100ms before Geyser sees the same signature, but with no logs/meta.
//!
//! Each connection runs in its own long-lived task with exponential-backoff
//! reconnect. Subscriber callbacks never run on the stream reader - they are
//! dispatched to a fixed pool of worker tasks so slow subscriber I/O cannot
//! stall ingestion.

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use yellowstone_grpc_client::{ClientTlsConfig, GeyserGrpcClient};
use yellowstone_grpc_proto::geyser::{
    subscribe_request_filter_accounts_filter::Filter as AccountsFilter,
    subscribe_update::UpdateOneof, CommitmentLevel, SlotStatus, SubscribeRequest,
    SubscribeRequestFilterAccounts, SubscribeRequestFilterAccountsFilter,
    SubscribeRequestFilterBlocksMeta, SubscribeRequestFilterSlots,
    SubscribeRequestFilterTransactions, SubscribeRequestPing, SubscribeUpdate,
    SubscribeUpdateTransaction,
};

use crate::config::Config;
use crate::constants::{
    CALLBACK_POOL_WORKERS, STREAM_CONNECT_TIMEOUT, STREAM_INITIAL_BACKOFF, STREAM_MAX_BACKOFF,
    STREAM_MAX_MESSAGE_BYTES, STREAM_PING_INTERVAL,
};
use crate::endpoint_manager::EndpointManager;

/// Slot commitment level reported to slot subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotCommitment {
    Processed,
    Confirmed,
    Finalized,
}

/// Direct account change delivered to an account subscriber.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub pubkey: String,
    pub lamports: u64,
    pub data: Vec<u8>,
    pub slot: u64,
}

/// Program-owned account change delivered to a program subscriber.
#[derive(Debug, Clone)]
pub struct ProgramAccountUpdate {
    pub pubkey: String,
    pub data: Vec<u8>,
    pub slot: u64,
}

/// Pre-execution transaction notice. No logs or meta are available yet,
/// only the signature and the static account keys.
#[derive(Debug, Clone)]
pub struct TransactionNotice {
    pub signature: String,
    pub account_keys: Vec<String>,
    pub slot: u64,
}

pub type SlotCallback = Arc<dyn Fn(u64, SlotCommitment) -> Result<()> + Send + Sync>;
pub type BlocksMetaCallback = Arc<dyn Fn(u64, String, u64) -> Result<()> + Send + Sync>;
pub type AccountCallback = Arc<dyn Fn(AccountUpdate) -> Result<()> + Send + Sync>;
pub type ProgramCallback = Arc<dyn Fn(ProgramAccountUpdate) -> Result<()> + Send + Sync>;
pub type TransactionCallback = Arc<dyn Fn(TransactionNotice) -> Result<()> + Send + Sync>;

struct AccountSub {
    accounts: HashSet<String>,
    callback: AccountCallback,
}

struct ProgramSub {
    program_id: String,
    data_size: Option<u64>,
    callback: ProgramCallback,
}

struct TxSub {
    account_include: HashSet<String>,
    callback: TransactionCallback,
}

#[derive(Default)]
struct SubscriptionTable {
    slot_subs: HashMap<String, SlotCallback>,
    blocks_meta_subs: HashMap<String, BlocksMetaCallback>,
    account_subs: HashMap<String, AccountSub>,
    program_subs: HashMap<String, ProgramSub>,
    tx_subs: HashMap<String, TxSub>,
}

impl SubscriptionTable {
    fn has_geyser_subs(&self) -> bool {
        !self.slot_subs.is_empty()
            || !self.blocks_meta_subs.is_empty()
            || !self.account_subs.is_empty()
            || !self.program_subs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Callback dispatch pool
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() -> Result<()> + Send>;

/// Fixed pool of worker tasks draining a shared queue. A failing callback is
/// logged and never propagates - the stream readers must not die because a
/// subscriber misbehaved.
struct CallbackPool {
    tx: mpsc::UnboundedSender<Job>,
}

impl CallbackPool {
    fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => {
                            if let Err(e) = job() {
                                error!("[Stream] Callback error (worker {}): {:#}", worker, e);
                            }
                        }
                        None => break,
                    }
                }
            });
        }
        Self { tx }
    }

    fn submit(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!("[Stream] Callback pool is gone - update dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Per-stream health counters
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StreamHealth {
    connected: AtomicBool,
    updates: AtomicU64,
    errors: AtomicU64,
    last_update_unix_ms: AtomicU64,
}

impl StreamHealth {
    fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.last_update_unix_ms.store(unix_ms(), Ordering::Relaxed);
    }

    fn age_ms(&self) -> Option<u64> {
        let last = self.last_update_unix_ms.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        Some(unix_ms().saturating_sub(last))
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Snapshot of fabric health for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub geyser_connected: bool,
    pub shred_connected: bool,
    pub geyser_updates: u64,
    pub shred_updates: u64,
    pub geyser_errors: u64,
    pub shred_errors: u64,
    pub geyser_age_ms: Option<u64>,
    pub shred_age_ms: Option<u64>,
    pub slot_subs: Vec<String>,
    pub blocks_meta_subs: Vec<String>,
    pub account_subs: Vec<String>,
    pub program_subs: Vec<String>,
    pub tx_subs: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stream manager
// ---------------------------------------------------------------------------

struct Inner {
    geyser_endpoint: Option<String>,
    shred_endpoint: Option<String>,
    token: Option<String>,
    endpoints: Arc<EndpointManager>,
    subs: parking_lot::RwLock<SubscriptionTable>,
    running: AtomicBool,
    stop_tx: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    geyser_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shred_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pool: CallbackPool,
    geyser: StreamHealth,
    shred: StreamHealth,
}

/// Manages the Geyser and shred-level gRPC connections.
///
/// Subscriptions registered before `start` are active at startup; a
/// subscription registered afterwards lazily spins up the stream it needs.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

impl StreamManager {
    pub fn new(config: &Config, endpoints: Arc<EndpointManager>) -> Self {
        if let Some(ep) = &config.geyser_endpoint {
            endpoints.register_group("geyser", vec![ep.clone()]);
        }
        if let Some(ep) = &config.shred_endpoint {
            endpoints.register_group("shred", vec![ep.clone()]);
        }
        Self {
            inner: Arc::new(Inner {
                geyser_endpoint: config.geyser_endpoint.clone(),
                shred_endpoint: config.shred_endpoint.clone(),
                token: config.grpc_token.clone(),
                endpoints,
                subs: parking_lot::RwLock::new(SubscriptionTable::default()),
                running: AtomicBool::new(false),
                stop_tx: parking_lot::Mutex::new(None),
                geyser_task: parking_lot::Mutex::new(None),
                shred_task: parking_lot::Mutex::new(None),
                pool: CallbackPool::new(CALLBACK_POOL_WORKERS),
                geyser: StreamHealth::default(),
                shred: StreamHealth::default(),
            }),
        }
    }

    // ── Subscription registration ────────────────────────────────────

    /// Slot updates (`processed` / `confirmed` / `finalized`).
    pub fn subscribe_slots<F>(&self, name: &str, callback: F)
    where
        F: Fn(u64, SlotCommitment) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .subs
            .write()
            .slot_subs
            .insert(name.to_string(), Arc::new(callback));
        info!("[Stream] Registered slot subscription: {}", name);
        self.maybe_start_geyser();
    }

    /// Block metadata: `(slot, blockhash, block_height)`.
    pub fn subscribe_blocks_meta<F>(&self, name: &str, callback: F)
    where
        F: Fn(u64, String, u64) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .subs
            .write()
            .blocks_meta_subs
            .insert(name.to_string(), Arc::new(callback));
        info!("[Stream] Registered blocks_meta subscription: {}", name);
        self.maybe_start_geyser();
    }

    /// Direct account changes for an explicit address list.
    pub fn subscribe_accounts<F>(&self, name: &str, accounts: Vec<String>, callback: F)
    where
        F: Fn(AccountUpdate) -> Result<()> + Send + Sync + 'static,
    {
        let count = accounts.len();
        self.inner.subs.write().account_subs.insert(
            name.to_string(),
            AccountSub {
                accounts: accounts.into_iter().collect(),
                callback: Arc::new(callback),
            },
        );
        info!(
            "[Stream] Registered account subscription: {} ({} accounts)",
            name, count
        );
        self.maybe_start_geyser();
    }

    /// Program-owned account changes, optionally filtered by account data
    /// size (pushed down to the server).
    pub fn subscribe_program<F>(
        &self,
        name: &str,
        program_id: &str,
        callback: F,
        data_size: Option<u64>,
    ) where
        F: Fn(ProgramAccountUpdate) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.subs.write().program_subs.insert(
            name.to_string(),
            ProgramSub {
                program_id: program_id.to_string(),
                data_size,
                callback: Arc::new(callback),
            },
        );
        info!(
            "[Stream] Registered program subscription: {} (program={}...)",
            name,
            &program_id[..8.min(program_id.len())]
        );
        self.maybe_start_geyser();
    }

    /// Pre-execution transactions touching any address in `account_include`.
    pub fn subscribe_transactions<F>(&self, name: &str, account_include: Vec<String>, callback: F)
    where
        F: Fn(TransactionNotice) -> Result<()> + Send + Sync + 'static,
    {
        let count = account_include.len();
        self.inner.subs.write().tx_subs.insert(
            name.to_string(),
            TxSub {
                account_include: account_include.into_iter().collect(),
                callback: Arc::new(callback),
            },
        );
        info!(
            "[Stream] Registered tx subscription: {} ({} accounts)",
            name, count
        );
        self.maybe_start_shred();
    }

    // ── Service lifecycle ────────────────────────────────────────────

    pub fn start(&self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.token.is_none() {
            error!("[Stream] No GRPC_X_TOKEN configured - streaming fabric refuses to start");
            return Err(anyhow!("missing streaming token"));
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let (stop_tx, _) = watch::channel(false);
        *self.inner.stop_tx.lock() = Some(stop_tx);

        let (has_geyser, has_shred) = {
            let table = self.inner.subs.read();
            (table.has_geyser_subs(), !table.tx_subs.is_empty())
        };
        if has_geyser {
            self.maybe_start_geyser();
        }
        if has_shred {
            self.maybe_start_shred();
        }
        if !has_geyser && !has_shred {
            info!("[Stream] Started (no subscriptions yet - streams start when subscriptions are added)");
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.inner.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        self.inner.geyser.connected.store(false, Ordering::SeqCst);
        self.inner.shred.connected.store(false, Ordering::SeqCst);
        *self.inner.geyser_task.lock() = None;
        *self.inner.shred_task.lock() = None;
        info!("[Stream] Stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> StreamStats {
        let table = self.inner.subs.read();
        StreamStats {
            is_running: self.is_running(),
            geyser_connected: self.inner.geyser.connected.load(Ordering::Relaxed),
            shred_connected: self.inner.shred.connected.load(Ordering::Relaxed),
            geyser_updates: self.inner.geyser.updates.load(Ordering::Relaxed),
            shred_updates: self.inner.shred.updates.load(Ordering::Relaxed),
            geyser_errors: self.inner.geyser.errors.load(Ordering::Relaxed),
            shred_errors: self.inner.shred.errors.load(Ordering::Relaxed),
            geyser_age_ms: self.inner.geyser.age_ms(),
            shred_age_ms: self.inner.shred.age_ms(),
            slot_subs: table.slot_subs.keys().cloned().collect(),
            blocks_meta_subs: table.blocks_meta_subs.keys().cloned().collect(),
            account_subs: table.account_subs.keys().cloned().collect(),
            program_subs: table.program_subs.keys().cloned().collect(),
            tx_subs: table.tx_subs.keys().cloned().collect(),
        }
    }

    // ── Lazy stream startup ──────────────────────────────────────────

    fn maybe_start_geyser(&self) {
        if !self.is_running() {
            return;
        }
        let mut task = self.inner.geyser_task.lock();
        if task.is_some() {
            return;
        }
        let Some(stop_rx) = self.stop_rx() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_geyser_loop(inner, stop_rx)));
        info!("[Stream] Geyser stream task started");
    }

    fn maybe_start_shred(&self) {
        if !self.is_running() {
            return;
        }
        let mut task = self.inner.shred_task.lock();
        if task.is_some() {
            return;
        }
        let Some(stop_rx) = self.stop_rx() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_shred_loop(inner, stop_rx)));
        info!("[Stream] Shred stream task started");
    }

    fn stop_rx(&self) -> Option<watch::Receiver<bool>> {
        self.inner.stop_tx.lock().as_ref().map(|tx| tx.subscribe())
    }
}

// ---------------------------------------------------------------------------
// Geyser connection
// ---------------------------------------------------------------------------

async fn run_geyser_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    let mut backoff = STREAM_INITIAL_BACKOFF;
    while inner.running.load(Ordering::SeqCst) {
        match run_geyser_session(&inner, &mut stop_rx, &mut backoff).await {
            Ok(()) => backoff = STREAM_INITIAL_BACKOFF,
            Err(e) => {
                inner.geyser.errors.fetch_add(1, Ordering::Relaxed);
                inner.endpoints.report_failure("geyser");
                warn!("[Stream] Geyser stream error: {:#}", e);
            }
        }
        inner.geyser.connected.store(false, Ordering::SeqCst);
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        info!("[Stream] Geyser reconnecting in {:.1}s", backoff.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop_rx.changed() => break,
        }
        backoff = (backoff * 2).min(STREAM_MAX_BACKOFF);
    }
    inner.geyser.connected.store(false, Ordering::SeqCst);
}

async fn run_geyser_session(
    inner: &Arc<Inner>,
    stop_rx: &mut watch::Receiver<bool>,
    backoff: &mut Duration,
) -> Result<()> {
    let endpoint = inner
        .endpoints
        .current("geyser")
        .or_else(|| inner.geyser_endpoint.clone())
        .ok_or_else(|| anyhow!("no geyser endpoint configured"))?;

    let request = build_geyser_request(&inner.subs.read());
    info!("[Stream] Subscribing to Geyser at {}", endpoint);

    let mut client = connect_grpc(&endpoint, inner.token.clone()).await?;
    info!("[Stream] Geyser channel ready");
    inner.endpoints.report_success("geyser");

    let (sink, mut stream) = client
        .subscribe_with_request(Some(request))
        .await
        .context("geyser subscribe failed")?;
    let ping_task = spawn_ping_task(sink, stop_rx.clone());

    let mut first = true;
    let result = loop {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = stop_rx.changed() => break Ok(()),
        };
        match item {
            Some(Ok(update)) => {
                if first {
                    first = false;
                    inner.geyser.connected.store(true, Ordering::SeqCst);
                    *backoff = STREAM_INITIAL_BACKOFF;
                    info!("[Stream] Geyser connected - first update received");
                }
                dispatch_geyser_update(inner, update);
            }
            Some(Err(status)) => break Err(anyhow!("geyser stream error: {}", status)),
            None => break Ok(()),
        }
        if !inner.running.load(Ordering::SeqCst) {
            break Ok(());
        }
    };
    ping_task.abort();
    result
}

// ---------------------------------------------------------------------------
// Shred-level connection (transactions only, pre-execution)
// ---------------------------------------------------------------------------

async fn run_shred_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    let mut backoff = STREAM_INITIAL_BACKOFF;
    while inner.running.load(Ordering::SeqCst) {
        match run_shred_session(&inner, &mut stop_rx, &mut backoff).await {
            Ok(()) => backoff = STREAM_INITIAL_BACKOFF,
            Err(e) => {
                inner.shred.errors.fetch_add(1, Ordering::Relaxed);
                inner.endpoints.report_failure("shred");
                warn!("[Stream] Shred stream error: {:#}", e);
            }
        }
        inner.shred.connected.store(false, Ordering::SeqCst);
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        info!("[Stream] Shred stream reconnecting in {:.1}s", backoff.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop_rx.changed() => break,
        }
        backoff = (backoff * 2).min(STREAM_MAX_BACKOFF);
    }
    inner.shred.connected.store(false, Ordering::SeqCst);
}

async fn run_shred_session(
    inner: &Arc<Inner>,
    stop_rx: &mut watch::Receiver<bool>,
    backoff: &mut Duration,
) -> Result<()> {
    let endpoint = inner
        .endpoints
        .current("shred")
        .or_else(|| inner.shred_endpoint.clone())
        .ok_or_else(|| anyhow!("no shred endpoint configured"))?;

    let request = build_shred_request(&inner.subs.read());
    info!("[Stream] Subscribing to shred stream at {}", endpoint);

    let mut client = connect_grpc(&endpoint, inner.token.clone()).await?;
    info!("[Stream] Shred channel ready");
    inner.endpoints.report_success("shred");

    let (sink, mut stream) = client
        .subscribe_with_request(Some(request))
        .await
        .context("shred subscribe failed")?;
    let ping_task = spawn_ping_task(sink, stop_rx.clone());

    let mut first = true;
    let result = loop {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = stop_rx.changed() => break Ok(()),
        };
        match item {
            Some(Ok(update)) => match update.update_oneof {
                Some(UpdateOneof::Transaction(tx)) => {
                    if first {
                        first = false;
                        inner.shred.connected.store(true, Ordering::SeqCst);
                        *backoff = STREAM_INITIAL_BACKOFF;
                        info!("[Stream] Shred stream connected - first update received");
                    }
                    inner.shred.record_update();
                    dispatch_tx_update(inner, tx);
                }
                Some(UpdateOneof::Ping(_)) | Some(UpdateOneof::Pong(_)) => {
                    // The shred feed can be quiet for a while; a keepalive is
                    // still proof of a live channel.
                    if first {
                        first = false;
                        inner.shred.connected.store(true, Ordering::SeqCst);
                        *backoff = STREAM_INITIAL_BACKOFF;
                        info!("[Stream] Shred stream connected (ping/pong)");
                    }
                }
                _ => {}
            },
            Some(Err(status)) => break Err(anyhow!("shred stream error: {}", status)),
            None => break Ok(()),
        }
        if !inner.running.load(Ordering::SeqCst) {
            break Ok(());
        }
    };
    ping_task.abort();
    result
}

// ---------------------------------------------------------------------------
// Shared connection plumbing
// ---------------------------------------------------------------------------

async fn connect_grpc(
    endpoint: &str,
    token: Option<String>,
) -> Result<GeyserGrpcClient<impl tonic::service::Interceptor>> {
    let builder = GeyserGrpcClient::build_from_shared(endpoint.to_string())?
        .x_token(token)?
        .tls_config(ClientTlsConfig::new().with_native_roots())?
        .max_decoding_message_size(STREAM_MAX_MESSAGE_BYTES)
        .connect_timeout(STREAM_CONNECT_TIMEOUT);
    tokio::time::timeout(STREAM_CONNECT_TIMEOUT, builder.connect())
        .await
        .map_err(|_| {
            anyhow!(
                "channel connect timeout ({}s) to {}",
                STREAM_CONNECT_TIMEOUT.as_secs(),
                endpoint
            )
        })?
        .context("grpc connect failed")
}

fn spawn_ping_task<S>(mut sink: S, mut stop_rx: watch::Receiver<bool>) -> JoinHandle<()>
where
    S: futures::Sink<SubscribeRequest> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ping_id = 0i32;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STREAM_PING_INTERVAL) => {}
                _ = stop_rx.changed() => return,
            }
            ping_id += 1;
            let ping = SubscribeRequest {
                ping: Some(SubscribeRequestPing { id: ping_id }),
                ..Default::default()
            };
            if sink.send(ping).await.is_err() {
                return;
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Filter composition
// ---------------------------------------------------------------------------

fn build_geyser_request(table: &SubscriptionTable) -> SubscribeRequest {
    let mut accounts = HashMap::new();
    let mut slots = HashMap::new();
    let mut blocks_meta = HashMap::new();

    // All slot subscribers share a single server-side filter.
    if !table.slot_subs.is_empty() {
        slots.insert(
            "slot_sub".to_string(),
            SubscribeRequestFilterSlots {
                filter_by_commitment: Some(true),
                interslot_updates: Some(false),
            },
        );
    }

    if !table.blocks_meta_subs.is_empty() {
        blocks_meta.insert(
            "blocks_meta_sub".to_string(),
            SubscribeRequestFilterBlocksMeta::default(),
        );
    }

    // Direct account subscriptions union their address lists.
    let all_addrs: Vec<String> = table
        .account_subs
        .values()
        .flat_map(|s| s.accounts.iter().cloned())
        .collect();
    if !all_addrs.is_empty() {
        accounts.insert(
            "account_sub".to_string(),
            SubscribeRequestFilterAccounts {
                account: all_addrs,
                owner: vec![],
                filters: vec![],
                nonempty_txn_signature: None,
            },
        );
    }

    // Each program subscription is its own filter because data_size varies.
    for (name, sub) in &table.program_subs {
        let mut filters = Vec::new();
        if let Some(size) = sub.data_size {
            filters.push(SubscribeRequestFilterAccountsFilter {
                filter: Some(AccountsFilter::Datasize(size)),
            });
        }
        accounts.insert(
            format!("program_{}", name),
            SubscribeRequestFilterAccounts {
                account: vec![],
                owner: vec![sub.program_id.clone()],
                filters,
                nonempty_txn_signature: None,
            },
        );
    }

    SubscribeRequest {
        accounts,
        slots,
        blocks_meta,
        commitment: Some(CommitmentLevel::Confirmed as i32),
        ..Default::default()
    }
}

fn build_shred_request(table: &SubscriptionTable) -> SubscribeRequest {
    let mut transactions = HashMap::new();
    let all_accounts: BTreeSet<String> = table
        .tx_subs
        .values()
        .flat_map(|s| s.account_include.iter().cloned())
        .collect();

    if !all_accounts.is_empty() {
        transactions.insert(
            "tx_sub".to_string(),
            SubscribeRequestFilterTransactions {
                vote: Some(false),
                failed: Some(false),
                signature: None,
                account_include: all_accounts.into_iter().collect(),
                account_exclude: vec![],
                account_required: vec![],
            },
        );
    }

    SubscribeRequest {
        transactions,
        commitment: Some(CommitmentLevel::Confirmed as i32),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Update dispatch
// ---------------------------------------------------------------------------

fn dispatch_geyser_update(inner: &Arc<Inner>, update: SubscribeUpdate) {
    inner.geyser.record_update();
    let filters = update.filters;

    match update.update_oneof {
        Some(UpdateOneof::Slot(slot_update)) => {
            let commitment = match SlotStatus::try_from(slot_update.status) {
                Ok(SlotStatus::SlotProcessed) => SlotCommitment::Processed,
                Ok(SlotStatus::SlotConfirmed) => SlotCommitment::Confirmed,
                Ok(SlotStatus::SlotFinalized) => SlotCommitment::Finalized,
                _ => return,
            };
            let table = inner.subs.read();
            for callback in table.slot_subs.values() {
                let cb = Arc::clone(callback);
                let slot = slot_update.slot;
                inner.pool.submit(Box::new(move || cb(slot, commitment)));
            }
        }

        Some(UpdateOneof::Account(acct_update)) => {
            let Some(info) = acct_update.account else {
                return;
            };
            let slot = acct_update.slot;
            let pubkey = encode_key(&info.pubkey);
            let table = inner.subs.read();

            for sub in table.account_subs.values() {
                if sub.accounts.contains(&pubkey) {
                    let cb = Arc::clone(&sub.callback);
                    let update = AccountUpdate {
                        pubkey: pubkey.clone(),
                        lamports: info.lamports,
                        data: info.data.clone(),
                        slot,
                    };
                    inner.pool.submit(Box::new(move || cb(update)));
                }
            }

            // Program subscribers are matched by the server filter name.
            for (name, sub) in &table.program_subs {
                let filter_key = format!("program_{}", name);
                if filters.iter().any(|f| f == &filter_key) {
                    let cb = Arc::clone(&sub.callback);
                    let update = ProgramAccountUpdate {
                        pubkey: pubkey.clone(),
                        data: info.data.clone(),
                        slot,
                    };
                    inner.pool.submit(Box::new(move || cb(update)));
                }
            }
        }

        Some(UpdateOneof::Transaction(tx_update)) => {
            dispatch_tx_update(inner, tx_update);
        }

        Some(UpdateOneof::BlockMeta(meta)) => {
            let block_height = meta.block_height.map(|h| h.block_height).unwrap_or(0);
            let table = inner.subs.read();
            for callback in table.blocks_meta_subs.values() {
                let cb = Arc::clone(callback);
                let blockhash = meta.blockhash.clone();
                let slot = meta.slot;
                inner
                    .pool
                    .submit(Box::new(move || cb(slot, blockhash, block_height)));
            }
        }

        Some(UpdateOneof::Ping(_)) | Some(UpdateOneof::Pong(_)) => {}
        _ => debug!("[Stream] Unhandled geyser update variant"),
    }
}

fn dispatch_tx_update(inner: &Arc<Inner>, tx_update: SubscribeUpdateTransaction) {
    let Some(info) = tx_update.transaction else {
        return;
    };
    let slot = tx_update.slot;
    let signature = bs58::encode(&info.signature).into_string();

    let account_keys: Vec<String> = info
        .transaction
        .and_then(|tx| tx.message)
        .map(|msg| msg.account_keys.iter().map(|k| encode_key(k)).collect())
        .unwrap_or_default();

    let table = inner.subs.read();
    for sub in table.tx_subs.values() {
        if account_keys.iter().any(|k| sub.account_include.contains(k)) {
            let cb = Arc::clone(&sub.callback);
            let notice = TransactionNotice {
                signature: signature.clone(),
                account_keys: account_keys.clone(),
                slot,
            };
            inner.pool.submit(Box::new(move || cb(notice)));
        }
    }
}

fn encode_key(bytes: &[u8]) -> String {
    if bytes.len() == 32 {
        bs58::encode(bytes).into_string()
    } else {
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(
        slots: &[&str],
        accounts: &[(&str, &[&str])],
        programs: &[(&str, &str, Option<u64>)],
        txs: &[(&str, &[&str])],
    ) -> SubscriptionTable {
        let mut table = SubscriptionTable::default();
        for name in slots {
            table
                .slot_subs
                .insert(name.to_string(), Arc::new(|_, _| Ok(())));
        }
        for (name, addrs) in accounts {
            table.account_subs.insert(
                name.to_string(),
                AccountSub {
                    accounts: addrs.iter().map(|s| s.to_string()).collect(),
                    callback: Arc::new(|_| Ok(())),
                },
            );
        }
        for (name, program, size) in programs {
            table.program_subs.insert(
                name.to_string(),
                ProgramSub {
                    program_id: program.to_string(),
                    data_size: *size,
                    callback: Arc::new(|_| Ok(())),
                },
            );
        }
        for (name, addrs) in txs {
            table.tx_subs.insert(
                name.to_string(),
                TxSub {
                    account_include: addrs.iter().map(|s| s.to_string()).collect(),
                    callback: Arc::new(|_| Ok(())),
                },
            );
        }
        table
    }

    #[test]
    fn test_geyser_request_unions_account_filters() {
        let table = table_with(
            &["slots"],
            &[("vaults", &["A", "B"]), ("wallets", &["C"])],
            &[("skr", "Prog1111", Some(169)), ("other", "Prog2222", None)],
            &[],
        );
        let req = build_geyser_request(&table);

        assert!(req.slots.contains_key("slot_sub"));
        let union = &req.accounts["account_sub"];
        let mut addrs = union.account.clone();
        addrs.sort();
        assert_eq!(addrs, vec!["A", "B", "C"]);

        // Program filters stay separate because data_size varies per sub.
        assert_eq!(req.accounts["program_skr"].owner, vec!["Prog1111"]);
        assert_eq!(req.accounts["program_skr"].filters.len(), 1);
        assert!(req.accounts["program_other"].filters.is_empty());
        assert_eq!(req.commitment, Some(CommitmentLevel::Confirmed as i32));
    }

    #[test]
    fn test_shred_request_unions_tx_includes() {
        let table = table_with(&[], &[], &[], &[("w1", &["X", "Y"]), ("w2", &["Y", "Z"])]);
        let req = build_shred_request(&table);
        let filter = &req.transactions["tx_sub"];
        let mut include = filter.account_include.clone();
        include.sort();
        assert_eq!(include, vec!["X", "Y", "Z"]);
        assert_eq!(filter.vote, Some(false));
        assert_eq!(filter.failed, Some(false));
    }

    #[test]
    fn test_empty_table_builds_empty_request() {
        let table = SubscriptionTable::default();
        let req = build_geyser_request(&table);
        assert!(req.accounts.is_empty());
        assert!(req.slots.is_empty());
        assert!(req.blocks_meta.is_empty());
        assert!(build_shred_request(&table).transactions.is_empty());
    }

    #[test]
    fn test_encode_key_fallback() {
        let key = [1u8; 32];
        assert_eq!(encode_key(&key), bs58::encode(&key).into_string());
        // malformed key falls back to hex instead of panicking
        assert_eq!(encode_key(&[0xab, 0xcd]), "abcd");
    }

    #[tokio::test]
    async fn test_callback_pool_runs_jobs_and_swallows_errors() {
        let pool = CallbackPool::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        pool.submit(Box::new(move || {
            tx.send(1u32).unwrap();
            Ok(())
        }));
        pool.submit(Box::new(move || {
            tx2.send(2u32).unwrap();
            Err(anyhow!("subscriber blew up"))
        }));
        let mut got = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        got.sort();
        assert_eq!(got, vec![1, 2]);
    }
}
