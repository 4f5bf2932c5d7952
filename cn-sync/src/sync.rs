//! Block download, buffering and checkpointing

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use memuse::DynamicUsage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};

use cnconfig::{
    WalletConfig, CANCELLED_TRANSACTION_MAX_MISSES, DROP_BLOCK_REFETCH_INTERVAL,
    LAST_KNOWN_BLOCK_HASHES_SIZE, MAX_FAIL_COUNT_BEFORE_BACKOFF,
};

use crate::client::Daemon;
use crate::crypto::CryptoOracle;
use crate::error::SyncError;
use crate::primitives::{Block, Hash, PublicKey, TransactionData, TransactionInput};
use crate::scan;
use crate::status::SynchronizationStatus;
use crate::traits::SyncWallet;

/// Notifications emitted by the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The daemon has not delivered blocks, or its network height has not moved, for longer
    /// than the configured interval
    DeadNode,
    /// The synced height jumped to the daemon's top block
    HeightChange(u64),
    /// A timestamp based sync start was resolved to a block height
    SyncStartConverted {
        /// The timestamp the wallet was told to scan from
        timestamp: u64,
        /// Height of the first block the daemon returned for it
        height: u64,
    },
}

/// Result of a [`WalletSynchronizer::download_blocks`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Another download is in flight, nothing was done
    AlreadyInProgress,
    /// The local daemon is behind the wallet, nothing was requested
    DaemonBehind,
    /// The request failed, the buffer is unchanged
    Failed,
    /// The daemon has nothing newer than its top block
    Synced,
    /// The daemon returned no blocks and no top block
    NoBlocks,
    /// This many blocks were appended to the buffer
    Downloaded(usize),
}

/// Persisted state of the synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizerState {
    /// Height scanning started from
    pub start_height: u64,
    /// Timestamp scanning starts from, 0 once resolved to a height
    pub start_timestamp: u64,
    /// Checkpoints of processed blocks
    pub synchronization_status: SynchronizationStatus,
}

#[derive(Debug)]
struct SyncBuffers {
    start_height: u64,
    start_timestamp: u64,
    status: SynchronizationStatus,
    stored_blocks: VecDeque<Block>,
    fail_count: u32,
    last_downloaded_blocks: Instant,
    last_network_height: u64,
    last_network_height_change: Instant,
    cancelled_transactions_fail_count: HashMap<Hash, u32>,
}

impl SyncBuffers {
    fn new(start_height: u64, start_timestamp: u64, status: SynchronizationStatus) -> Self {
        Self {
            start_height,
            start_timestamp,
            status,
            stored_blocks: VecDeque::new(),
            fail_count: 0,
            last_downloaded_blocks: Instant::now(),
            last_network_height: 0,
            last_network_height_change: Instant::now(),
            cancelled_transactions_fail_count: HashMap::new(),
        }
    }

    fn stored_blocks_usage(&self) -> usize {
        self.stored_blocks.capacity() * std::mem::size_of::<Block>()
            + self
                .stored_blocks
                .iter()
                .map(DynamicUsage::dynamic_usage)
                .sum::<usize>()
    }

    /// Unprocessed buffered hashes then recently processed hashes, newest first, capped, followed
    /// by the long interval checkpoints.
    fn block_checkpoints(&self) -> Vec<Hash> {
        let unprocessed = self.stored_blocks.iter().rev().map(|block| block.block_hash);
        let processed = self.status.recent_block_hashes();

        unprocessed
            .chain(processed)
            .take(LAST_KNOWN_BLOCK_HASHES_SIZE)
            .chain(self.status.block_checkpoints())
            .collect()
    }
}

/// Downloads blocks ahead of processing and tracks how far the wallet has synced.
///
/// Clones share state. At most one daemon fetch is in flight at a time; [`Self::reset`] and
/// [`Self::rewind`] wait for an in-flight fetch to finish before discarding the buffer.
pub struct WalletSynchronizer<D> {
    daemon: Arc<D>,
    config: Arc<WalletConfig>,
    buffers: Arc<RwLock<SyncBuffers>>,
    fetch_lock: Arc<Mutex<()>>,
    event_sender: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl<D> Clone for WalletSynchronizer<D> {
    fn clone(&self) -> Self {
        Self {
            daemon: self.daemon.clone(),
            config: self.config.clone(),
            buffers: self.buffers.clone(),
            fetch_lock: self.fetch_lock.clone(),
            event_sender: self.event_sender.clone(),
        }
    }
}

impl<D> WalletSynchronizer<D>
where
    D: Daemon + 'static,
{
    /// Creates a synchronizer scanning from `start_height`, or from `start_timestamp` when it is
    /// non zero
    pub fn new(
        daemon: Arc<D>,
        config: Arc<WalletConfig>,
        start_height: u64,
        start_timestamp: u64,
    ) -> Self {
        let status = SynchronizationStatus::new(start_height.saturating_sub(1));
        Self::from_state(
            daemon,
            config,
            SynchronizerState {
                start_height,
                start_timestamp,
                synchronization_status: status,
            },
        )
    }

    /// Restores a synchronizer from persisted state
    pub fn from_state(daemon: Arc<D>, config: Arc<WalletConfig>, state: SynchronizerState) -> Self {
        Self {
            daemon,
            config,
            buffers: Arc::new(RwLock::new(SyncBuffers::new(
                state.start_height,
                state.start_timestamp,
                state.synchronization_status,
            ))),
            fetch_lock: Arc::new(Mutex::new(())),
            event_sender: None,
        }
    }

    /// Returns a receiver for [`SyncEvent`]s, replacing any previous one
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.event_sender = Some(sender);
        receiver
    }

    /// Use a different daemon from now on
    pub fn swap_node(&mut self, daemon: Arc<D>) {
        self.daemon = daemon;
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(sender) = &self.event_sender {
            // a dropped receiver only means nobody is listening
            let _ = sender.send(event);
        }
    }

    /// Snapshot of the persisted state
    pub async fn state(&self) -> SynchronizerState {
        let buffers = self.buffers.read().await;
        SynchronizerState {
            start_height: buffers.start_height,
            start_timestamp: buffers.start_timestamp,
            synchronization_status: buffers.status.clone(),
        }
    }

    /// Height of the last processed block
    pub async fn height(&self) -> u64 {
        self.buffers.read().await.status.height()
    }

    /// The `(start_height, start_timestamp)` the wallet scans from
    pub async fn scan_heights(&self) -> (u64, u64) {
        let buffers = self.buffers.read().await;
        (buffers.start_height, buffers.start_timestamp)
    }

    /// Consecutive failed downloads
    pub async fn fail_count(&self) -> u32 {
        self.buffers.read().await.fail_count
    }

    /// Number of downloaded blocks waiting to be processed
    pub async fn stored_block_count(&self) -> usize {
        self.buffers.read().await.stored_blocks.len()
    }

    /// Returns true while a daemon fetch is outstanding
    pub fn is_fetching(&self) -> bool {
        self.fetch_lock.try_lock().is_err()
    }

    /// Checkpoints sent to the daemon so it can find our position on its chain
    pub async fn block_checkpoints(&self) -> Vec<Hash> {
        self.buffers.read().await.block_checkpoints()
    }

    /// Returns up to `block_count` buffered blocks without removing them, downloading first if
    /// the buffer is empty. Also returns the current fail count.
    pub async fn fetch_blocks(&self, block_count: usize) -> (Vec<Block>, u32) {
        if self.buffers.read().await.stored_blocks.is_empty() {
            tracing::debug!("No blocks stored, attempting to fetch more.");
            self.download_blocks().await;
        }

        let buffers = self.buffers.read().await;
        (
            buffers
                .stored_blocks
                .iter()
                .take(block_count)
                .cloned()
                .collect(),
            buffers.fail_count,
        )
    }

    /// Requests the next batch of blocks from the daemon and appends it to the buffer.
    ///
    /// Single flight: returns [`DownloadOutcome::AlreadyInProgress`] without doing anything if
    /// another download is outstanding.
    pub async fn download_blocks(&self) -> DownloadOutcome {
        let Ok(_fetching) = self.fetch_lock.try_lock() else {
            return DownloadOutcome::AlreadyInProgress;
        };

        let (block_checkpoints, start_height, start_timestamp) = {
            let buffers = self.buffers.read().await;
            if self.daemon.get_local_daemon_block_count() < buffers.status.height() {
                return DownloadOutcome::DaemonBehind;
            }
            (
                buffers.block_checkpoints(),
                buffers.start_height,
                buffers.start_timestamp,
            )
        };

        let response = self
            .daemon
            .get_wallet_sync_data(
                &block_checkpoints,
                start_height,
                start_timestamp,
                self.config.blocks_per_daemon_request_clamped(),
                !self.config.scan_coinbase_transactions,
            )
            .await;

        let mut buffers = self.buffers.write().await;
        self.check_network_height(&mut buffers);

        let sync_data = match response {
            Ok(sync_data) => sync_data,
            Err(e) => {
                tracing::debug!("Failed to get blocks from daemon. {}", e);
                buffers.fail_count += 1;
                if buffers.last_downloaded_blocks.elapsed()
                    > self.config.max_last_fetched_block_interval()
                {
                    self.emit(SyncEvent::DeadNode);
                }
                return DownloadOutcome::Failed;
            }
        };

        buffers.fail_count = 0;
        buffers.last_downloaded_blocks = Instant::now();

        if sync_data.blocks.is_empty() {
            let Some(top_block) = sync_data.top_block else {
                tracing::debug!("Zero blocks received from daemon, possibly fully synced");
                return DownloadOutcome::NoBlocks;
            };

            // only jump to the top block once every stored block has been processed
            if buffers.stored_blocks.is_empty() {
                self.emit(SyncEvent::HeightChange(top_block.height));
                buffers
                    .status
                    .store_block_hash(top_block.height, top_block.hash);
            }
            tracing::debug!("Zero blocks received from daemon, fully synced");
            return DownloadOutcome::Synced;
        }

        // timestamps are a daemon side approximation, heights are authoritative
        if buffers.start_timestamp != 0 {
            let height = sync_data.blocks[0].block_height;
            let timestamp = buffers.start_timestamp;
            buffers.start_timestamp = 0;
            buffers.start_height = height;
            tracing::info!("Converted sync start timestamp {} to height {}", timestamp, height);
            self.emit(SyncEvent::SyncStartConverted { timestamp, height });
        }

        let downloaded = sync_data.blocks.len();
        buffers.stored_blocks.extend(sync_data.blocks);

        DownloadOutcome::Downloaded(downloaded)
    }

    fn check_network_height(&self, buffers: &mut SyncBuffers) {
        let network_height = self.daemon.get_network_block_count();
        if network_height != buffers.last_network_height {
            buffers.last_network_height = network_height;
            buffers.last_network_height_change = Instant::now();
        } else if buffers.last_network_height_change.elapsed()
            > self.config.max_last_updated_network_height_interval()
        {
            self.emit(SyncEvent::DeadNode);
        }
    }

    /// Only fetch more blocks when not already fetching, not repeatedly failing, and below the
    /// memory ceiling
    pub async fn should_fetch_more_blocks(&self) -> bool {
        if self.is_fetching() {
            return false;
        }

        let buffers = self.buffers.read().await;
        if buffers.fail_count > MAX_FAIL_COUNT_BEFORE_BACKOFF {
            return false;
        }

        let ram_usage = buffers.stored_blocks_usage();
        if ram_usage < self.config.block_store_memory_limit {
            tracing::debug!(
                "Approximate ram usage of stored blocks: {} bytes, fetching more.",
                ram_usage
            );
            return true;
        }

        false
    }

    /// Removes the processed head block from the buffer and checkpoints it.
    ///
    /// Only removes the head block if it is the one at `block_height` with `block_hash`, so
    /// calling this twice for the same block is harmless. Every tenth block a background
    /// download tops the buffer up if memory allows.
    pub async fn drop_block(&self, block_height: u64, block_hash: Hash) {
        {
            let mut buffers = self.buffers.write().await;
            let is_head = buffers
                .stored_blocks
                .front()
                .is_some_and(|block| block.block_height == block_height && block.block_hash == block_hash);
            if is_head {
                buffers.stored_blocks.pop_front();
                buffers.status.store_block_hash(block_height, block_hash);
            }
        }

        if block_height % DROP_BLOCK_REFETCH_INTERVAL == 0 && self.should_fetch_more_blocks().await
        {
            let synchronizer = self.clone();
            tokio::spawn(async move {
                synchronizer.download_blocks().await;
            });
        }
    }

    /// Discards buffered blocks and restarts scanning from `scan_height` or `scan_timestamp`.
    ///
    /// Waits for an in-flight download to complete first, so its result can not land in the
    /// freshly cleared buffer.
    pub async fn reset(&self, scan_height: u64, scan_timestamp: u64) {
        let _fetching = self.fetch_lock.lock().await;
        let mut buffers = self.buffers.write().await;
        buffers.start_height = scan_height;
        buffers.start_timestamp = scan_timestamp;
        buffers.status = SynchronizationStatus::new(scan_height.saturating_sub(1));
        buffers.stored_blocks.clear();
    }

    /// Discards buffered blocks and restarts scanning from `scan_height`
    pub async fn rewind(&self, scan_height: u64) {
        self.reset(scan_height, 0).await;
    }

    /// Returns the hashes among `transaction_hashes` that the daemon has not known about for
    /// [`CANCELLED_TRANSACTION_MAX_MISSES`] consecutive queries.
    pub async fn find_cancelled_transactions(
        &self,
        transaction_hashes: &[Hash],
    ) -> Result<Vec<Hash>, SyncError> {
        if transaction_hashes.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!("Checking locked transactions");
        let unknown = self
            .daemon
            .get_cancelled_transactions(transaction_hashes)
            .await?;

        let mut buffers = self.buffers.write().await;
        let fail_counts = &mut buffers.cancelled_transactions_fail_count;
        let mut cancelled = Vec::new();

        fail_counts.retain(|hash, fail_count| {
            if !unknown.contains(hash) {
                tracing::debug!(
                    "Unconfirmed transaction {} is known by daemon, no longer possibly cancelled.",
                    hash
                );
                return false;
            }
            *fail_count += 1;
            if *fail_count >= CANCELLED_TRANSACTION_MAX_MISSES {
                tracing::info!(
                    "Unconfirmed transaction {} is still not known by daemon after {} queries, returning funds.",
                    hash,
                    fail_count
                );
                cancelled.push(*hash);
                return false;
            }
            tracing::debug!(
                "Unconfirmed transaction {} is not known by daemon, query {}.",
                hash,
                fail_count
            );
            true
        });

        for hash in unknown {
            if !cancelled.contains(&hash) {
                fail_counts.entry(hash).or_insert_with(|| {
                    tracing::debug!(
                        "Unconfirmed transaction {} is not known by daemon, query 1.",
                        hash
                    );
                    1
                });
            }
        }

        Ok(cancelled)
    }

    /// Consecutive misses currently recorded for `hash`
    pub async fn cancelled_transaction_misses(&self, hash: &Hash) -> Option<u32> {
        self.buffers
            .read()
            .await
            .cancelled_transactions_fail_count
            .get(hash)
            .copied()
    }

    /// Finds the outputs of `block` owned by `wallet`
    pub fn process_block_outputs<O, W>(
        &self,
        oracle: &O,
        wallet: &W,
        block: &Block,
    ) -> Result<Vec<(PublicKey, TransactionInput)>, SyncError>
    where
        O: CryptoOracle,
        W: SyncWallet + Sync,
    {
        scan::process_block_outputs(
            oracle,
            wallet,
            block,
            self.config.scan_coinbase_transactions,
        )
    }

    /// Turns a block and the outputs we own in it into wallet deltas
    pub fn process_block<W: SyncWallet>(
        &self,
        wallet: &W,
        block: &Block,
        our_inputs: Vec<(PublicKey, TransactionInput)>,
    ) -> Result<TransactionData, SyncError> {
        scan::process_block(
            wallet,
            block,
            our_inputs,
            self.config.scan_coinbase_transactions,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mocks::{mock_block, mock_block_hash, MockDaemon};
    use crate::primitives::TopBlock;

    fn synchronizer(daemon: &Arc<MockDaemon>) -> WalletSynchronizer<MockDaemon> {
        WalletSynchronizer::new(daemon.clone(), Arc::new(WalletConfig::default()), 1, 0)
    }

    #[tokio::test]
    async fn fetch_downloads_when_empty_and_does_not_consume() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_blocks((1..=5).map(|h| mock_block(h, vec![])).collect());
        let synchronizer = synchronizer(&daemon);

        let (blocks, fail_count) = synchronizer.fetch_blocks(3).await;
        assert_eq!(blocks.len(), 3);
        assert_eq!(fail_count, 0);
        assert_eq!(synchronizer.stored_block_count().await, 5);

        let (again, _) = synchronizer.fetch_blocks(10).await;
        assert_eq!(again.len(), 5);
        assert_eq!(daemon.sync_request_count(), 1);

        let request = &daemon.sync_requests()[0];
        assert_eq!(request.start_height, 1);
        assert_eq!(request.block_count, 100);
        assert!(request.skip_coinbase_transactions);
    }

    #[tokio::test]
    async fn download_is_single_flight() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_blocks(vec![mock_block(1, vec![])]);
        let synchronizer = synchronizer(&daemon);

        let gate = daemon.hold_sync_requests().await;
        let in_flight = {
            let synchronizer = synchronizer.clone();
            tokio::spawn(async move { synchronizer.download_blocks().await })
        };
        while daemon.sync_request_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(synchronizer.is_fetching());
        assert_eq!(
            synchronizer.download_blocks().await,
            DownloadOutcome::AlreadyInProgress
        );
        assert!(!synchronizer.should_fetch_more_blocks().await);

        drop(gate);
        assert_eq!(in_flight.await.unwrap(), DownloadOutcome::Downloaded(1));
        assert_eq!(daemon.sync_request_count(), 1);
    }

    #[tokio::test]
    async fn failures_increment_fail_count_and_leave_buffer() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_failure();
        daemon.push_failure();
        let synchronizer = synchronizer(&daemon);

        assert_eq!(synchronizer.download_blocks().await, DownloadOutcome::Failed);
        let (blocks, fail_count) = synchronizer.fetch_blocks(1).await;
        assert!(blocks.is_empty());
        assert_eq!(fail_count, 2);

        daemon.push_blocks(vec![mock_block(1, vec![])]);
        let (_, fail_count) = synchronizer.fetch_blocks(1).await;
        assert_eq!(fail_count, 0);
    }

    #[tokio::test]
    async fn dead_node_after_fetch_interval() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_failure();
        let config = WalletConfig {
            max_last_fetched_block_interval: 0,
            ..Default::default()
        };
        let mut synchronizer = WalletSynchronizer::new(daemon.clone(), Arc::new(config), 1, 0);
        let mut events = synchronizer.subscribe();

        tokio::time::sleep(Duration::from_millis(5)).await;
        synchronizer.download_blocks().await;
        assert_eq!(events.try_recv().unwrap(), SyncEvent::DeadNode);
    }

    #[tokio::test]
    async fn synced_response_stores_top_block() {
        let daemon = Arc::new(MockDaemon::new());
        let top = TopBlock {
            height: 500,
            hash: mock_block_hash(500),
        };
        daemon.push_synced(top);
        let mut synchronizer = synchronizer(&daemon);
        let mut events = synchronizer.subscribe();

        assert_eq!(synchronizer.download_blocks().await, DownloadOutcome::Synced);
        assert_eq!(synchronizer.height().await, 500);
        assert_eq!(synchronizer.stored_block_count().await, 0);
        assert_eq!(events.try_recv().unwrap(), SyncEvent::HeightChange(500));
        assert_eq!(synchronizer.block_checkpoints().await[0], top.hash);
    }

    #[tokio::test]
    async fn timestamp_start_converts_to_first_block_height() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_blocks(vec![mock_block(1234, vec![]), mock_block(1235, vec![])]);
        let mut synchronizer =
            WalletSynchronizer::new(daemon.clone(), Arc::new(WalletConfig::default()), 0, 1_600_000_000);
        let mut events = synchronizer.subscribe();

        synchronizer.download_blocks().await;
        assert_eq!(synchronizer.scan_heights().await, (1234, 0));
        assert_eq!(
            events.try_recv().unwrap(),
            SyncEvent::SyncStartConverted {
                timestamp: 1_600_000_000,
                height: 1234
            }
        );
        assert_eq!(daemon.sync_requests()[0].start_timestamp, 1_600_000_000);
    }

    #[tokio::test]
    async fn daemon_behind_wallet_is_not_queried() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.set_block_counts(10, 10);
        let synchronizer =
            WalletSynchronizer::new(daemon.clone(), Arc::new(WalletConfig::default()), 50, 0);

        assert_eq!(synchronizer.download_blocks().await, DownloadOutcome::DaemonBehind);
        assert_eq!(daemon.sync_request_count(), 0);
    }

    #[tokio::test]
    async fn drop_block_is_idempotent() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_blocks((1..=3).map(|h| mock_block(h, vec![])).collect());
        let synchronizer = synchronizer(&daemon);
        synchronizer.fetch_blocks(1).await;

        synchronizer.drop_block(1, mock_block_hash(1)).await;
        synchronizer.drop_block(1, mock_block_hash(1)).await;
        assert_eq!(synchronizer.stored_block_count().await, 2);
        assert_eq!(synchronizer.height().await, 1);

        // not the head block
        synchronizer.drop_block(3, mock_block_hash(3)).await;
        assert_eq!(synchronizer.stored_block_count().await, 2);
    }

    #[tokio::test]
    async fn checkpoints_list_unprocessed_then_processed_then_long_interval() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_blocks((1..=60).map(|h| mock_block(h, vec![])).collect());
        let synchronizer = synchronizer(&daemon);
        synchronizer.fetch_blocks(1).await;
        for height in 1..=20 {
            synchronizer.drop_block(height, mock_block_hash(height)).await;
        }
        // let any background download triggered by drop_block settle
        while synchronizer.is_fetching() {
            tokio::task::yield_now().await;
        }

        let checkpoints = synchronizer.block_checkpoints().await;
        assert_eq!(checkpoints.len(), LAST_KNOWN_BLOCK_HASHES_SIZE);
        assert_eq!(checkpoints[0], mock_block_hash(60));
        assert_eq!(checkpoints[39], mock_block_hash(21));
        assert_eq!(checkpoints[40], mock_block_hash(20));
        assert_eq!(checkpoints[49], mock_block_hash(11));
    }

    #[tokio::test]
    async fn reset_waits_for_in_flight_download() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.push_blocks(vec![mock_block(1, vec![]), mock_block(2, vec![])]);
        let synchronizer = synchronizer(&daemon);

        let gate = daemon.hold_sync_requests().await;
        let in_flight = {
            let synchronizer = synchronizer.clone();
            tokio::spawn(async move { synchronizer.download_blocks().await })
        };
        while daemon.sync_request_count() == 0 {
            tokio::task::yield_now().await;
        }

        let reset = {
            let synchronizer = synchronizer.clone();
            tokio::spawn(async move { synchronizer.reset(100, 0).await })
        };
        tokio::task::yield_now().await;
        assert!(!reset.is_finished());

        drop(gate);
        in_flight.await.unwrap();
        reset.await.unwrap();

        assert_eq!(synchronizer.stored_block_count().await, 0);
        assert_eq!(synchronizer.height().await, 99);
        assert_eq!(synchronizer.scan_heights().await, (100, 0));
    }

    #[tokio::test]
    async fn cancelled_transaction_released_on_tenth_miss() {
        let daemon = Arc::new(MockDaemon::new());
        let synchronizer = synchronizer(&daemon);
        let hash = Hash::from_bytes([42; 32]);
        daemon.set_transaction_unknown(hash, true);

        for miss in 1..=9 {
            let cancelled = synchronizer.find_cancelled_transactions(&[hash]).await.unwrap();
            assert!(cancelled.is_empty(), "released on miss {}", miss);
            assert_eq!(synchronizer.cancelled_transaction_misses(&hash).await, Some(miss));
        }

        let cancelled = synchronizer.find_cancelled_transactions(&[hash]).await.unwrap();
        assert_eq!(cancelled, vec![hash]);
        assert_eq!(synchronizer.cancelled_transaction_misses(&hash).await, None);
    }

    #[tokio::test]
    async fn known_transaction_resets_miss_counter() {
        let daemon = Arc::new(MockDaemon::new());
        let synchronizer = synchronizer(&daemon);
        let hash = Hash::from_bytes([43; 32]);
        daemon.set_transaction_unknown(hash, true);

        for _ in 0..5 {
            synchronizer.find_cancelled_transactions(&[hash]).await.unwrap();
        }
        assert_eq!(synchronizer.cancelled_transaction_misses(&hash).await, Some(5));

        daemon.set_transaction_unknown(hash, false);
        synchronizer.find_cancelled_transactions(&[hash]).await.unwrap();
        assert_eq!(synchronizer.cancelled_transaction_misses(&hash).await, None);

        daemon.set_transaction_unknown(hash, true);
        synchronizer.find_cancelled_transactions(&[hash]).await.unwrap();
        assert_eq!(synchronizer.cancelled_transaction_misses(&hash).await, Some(1));
    }

    #[tokio::test]
    async fn no_hashes_means_no_daemon_query() {
        let daemon = Arc::new(MockDaemon::new());
        let synchronizer = synchronizer(&daemon);
        assert!(synchronizer
            .find_cancelled_transactions(&[])
            .await
            .unwrap()
            .is_empty());
    }
}
