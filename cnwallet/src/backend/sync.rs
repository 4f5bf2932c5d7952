//! Processing downloaded blocks into the wallet, and the background loops driving it

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use cn_sync::client::Daemon;
use cn_sync::crypto::CryptoOracle;
use cn_sync::error::SyncError;
use cn_sync::primitives::{
    Block, Hash, PublicKey, Transaction, TransactionData, TransactionInput,
};
use cn_sync::sync::SyncEvent;
use cnconfig::{BLOCK_HASH_CHECKPOINTS_INTERVAL, PRUNE_SPENT_INPUTS_DEPTH};
use tokio::time::MissedTickBehavior;

use super::{WalletBackend, WalletEvent};
use crate::error::WalletError;
use crate::wallet::utils::obscured_global_index_range;
use crate::wallet::SubWallets;

impl<D, O> WalletBackend<D, O>
where
    D: Daemon + 'static,
    O: CryptoOracle + 'static,
{
    /// Processes up to `blocks_per_tick` buffered blocks, downloading first if the buffer is
    /// empty. Returns the number of blocks processed.
    ///
    /// A block that fails to process stays buffered and is retried on the next tick.
    pub async fn sync_tick(&self) -> Result<usize, WalletError> {
        let _syncing = self.sync_lock.lock().await;
        let synchronizer = self.synchronizer().await;

        let (blocks, fail_count) = synchronizer
            .fetch_blocks(self.config.blocks_per_tick as usize)
            .await;
        self.handle_sync_events().await;

        if blocks.is_empty() {
            log::trace!("No blocks to process, fail count {}", fail_count);
            return Ok(0);
        }

        let mut processed = 0;
        for block in blocks {
            self.process_block(&block).await?;
            synchronizer
                .drop_block(block.block_height, block.block_hash)
                .await;
            processed += 1;

            if block.block_height % BLOCK_HASH_CHECKPOINTS_INTERVAL == 0
                && block.block_height > PRUNE_SPENT_INPUTS_DEPTH
            {
                let prune_height = block.block_height - PRUNE_SPENT_INPUTS_DEPTH;
                log::debug!("Pruning inputs spent before {}", prune_height);
                self.wallet.write().await.prune_spent_inputs(prune_height);
            }
        }

        Ok(processed)
    }

    /// Runs ticks until the daemon has nothing more to give
    pub async fn sync(&self) -> Result<u64, WalletError> {
        while self.sync_tick().await? > 0 {}
        Ok(self.synchronizer().await.height().await)
    }

    async fn process_block(&self, block: &Block) -> Result<(), WalletError> {
        let synchronizer = self.synchronizer().await;
        let sync_height = synchronizer.height().await;

        if block.block_height <= sync_height {
            log::warn!(
                "Block {} is at or below the synced height {}, removing forked transactions",
                block.block_height,
                sync_height
            );
            self.wallet
                .write()
                .await
                .remove_forked_transactions(block.block_height);
        }

        let mut our_inputs = {
            let wallet = self.wallet.read().await;
            synchronizer.process_block_outputs(self.oracle.as_ref(), &*wallet, block)?
        };

        if our_inputs
            .iter()
            .any(|(_, input)| input.global_output_index.is_none())
        {
            self.fill_global_indexes(block.block_height, &mut our_inputs)
                .await?;
        }

        let mut wallet = self.wallet.write().await;
        let data = synchronizer.process_block(&*wallet, block, our_inputs)?;
        let transactions = apply_transaction_data(&mut wallet, data, block.block_height)?;
        drop(wallet);

        for transaction in transactions {
            self.emit(WalletEvent::Transaction(transaction));
        }
        Ok(())
    }

    /// Looks up missing global indexes over a range of blocks around `block_height`, so the
    /// daemon does not learn which block holds our outputs
    async fn fill_global_indexes(
        &self,
        block_height: u64,
        inputs: &mut [(PublicKey, TransactionInput)],
    ) -> Result<(), WalletError> {
        let (start_height, end_height) = obscured_global_index_range(block_height);
        log::debug!(
            "Fetching global indexes for blocks {} to {}",
            start_height,
            end_height
        );
        let indexes: HashMap<Hash, Vec<u64>> = self
            .daemon()
            .await
            .get_global_indexes_for_range(start_height, end_height)
            .await?;

        for (_, input) in inputs.iter_mut() {
            if input.global_output_index.is_some() {
                continue;
            }
            let global_index = indexes
                .get(&input.parent_transaction_hash)
                .and_then(|transaction_indexes| {
                    transaction_indexes.get(input.transaction_index as usize)
                })
                .ok_or_else(|| {
                    SyncError::Serialization(format!(
                        "daemon did not return a global index for output {} of {}",
                        input.transaction_index, input.parent_transaction_hash
                    ))
                })?;
            input.global_output_index = Some(*global_index);
        }
        Ok(())
    }

    async fn handle_sync_events(&self) {
        let mut sync_events = self.sync_events.lock().await;
        while let Ok(event) = sync_events.try_recv() {
            match event {
                SyncEvent::SyncStartConverted { timestamp, height } => {
                    log::info!(
                        "Sync start timestamp {} is block {}, updating subwallets",
                        timestamp,
                        height
                    );
                    self.wallet
                        .write()
                        .await
                        .convert_sync_timestamp_to_height(height);
                }
                SyncEvent::DeadNode => self.emit(WalletEvent::DeadNode),
                SyncEvent::HeightChange(_) => self.update_daemon_info().await,
            }
        }
    }

    /// Asks the daemon whether our unconfirmed transactions still exist and returns the inputs
    /// of those that were dropped. Returns the cancelled hashes.
    pub async fn check_locked_transactions(&self) -> Result<Vec<Hash>, WalletError> {
        let locked = self.wallet.read().await.locked_transaction_hashes();
        if locked.is_empty() {
            return Ok(Vec::new());
        }

        let cancelled = self
            .synchronizer()
            .await
            .find_cancelled_transactions(&locked)
            .await?;

        if !cancelled.is_empty() {
            let mut wallet = self.wallet.write().await;
            for hash in &cancelled {
                log::info!("Transaction {} was cancelled, returning its inputs", hash);
                wallet.remove_cancelled_transaction(hash);
            }
        }
        for hash in &cancelled {
            self.emit(WalletEvent::CancelledTransaction(*hash));
        }
        Ok(cancelled)
    }

    /// `(wallet_height, local_daemon_height, network_height)`
    pub async fn get_sync_status(&self) -> (u64, u64, u64) {
        let wallet_height = self.synchronizer().await.height().await;
        let daemon = self.daemon().await;
        (
            wallet_height,
            daemon.get_local_daemon_block_count(),
            daemon.get_network_block_count(),
        )
    }

    /// Reports the current heights and whether the wallet caught up with, or fell behind, the
    /// network
    pub async fn update_daemon_info(&self) {
        let (wallet_height, local_daemon_height, network_height) = self.get_sync_status().await;
        self.emit(WalletEvent::HeightChange {
            wallet_height,
            local_daemon_height,
            network_height,
        });

        let synced = wallet_height >= network_height;
        let was_synced = self.is_synced.swap(synced, Ordering::SeqCst);
        match (was_synced, synced) {
            (false, true) => self.emit(WalletEvent::Synced {
                wallet_height,
                network_height,
            }),
            (true, false) => self.emit(WalletEvent::Desync {
                wallet_height,
                network_height,
            }),
            _ => {}
        }
    }

    /// Forgets all transactions and inputs and scans again from the given point
    pub async fn reset(&self, scan_height: u64, scan_timestamp: u64) {
        let _syncing = self.sync_lock.lock().await;
        self.synchronizer()
            .await
            .reset(scan_height, scan_timestamp)
            .await;
        self.wallet.write().await.reset(scan_height, scan_timestamp);
        log::info!(
            "Reset wallet to height {} timestamp {}",
            scan_height,
            scan_timestamp
        );
    }

    /// Forgets everything from `scan_height` onwards and scans it again
    pub async fn rewind(&self, scan_height: u64) {
        let _syncing = self.sync_lock.lock().await;
        self.synchronizer().await.rewind(scan_height).await;
        self.wallet.write().await.rewind(scan_height);
        log::info!("Rewound wallet to height {}", scan_height);
    }

    /// Rescans from where the wallet was originally created
    pub async fn rescan(&self) {
        let (scan_height, scan_timestamp) = self.wallet.read().await.earliest_scan_start();
        self.reset(scan_height, scan_timestamp).await;
    }

    /// Spawns the sync, daemon info and locked transaction loops. Does nothing if they are
    /// already running.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.background_tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        self.interrupt_sync.send_replace(false);

        let backend = self.clone();
        tasks.push(tokio::spawn(async move {
            let period = backend.config.sync_thread_interval();
            backend
                .run_every(period, |backend| async move {
                    if let Err(e) = backend.sync_tick().await {
                        log::warn!("Sync tick failed. {}", e);
                    }
                })
                .await;
        }));

        let backend = self.clone();
        tasks.push(tokio::spawn(async move {
            let period = backend.config.daemon_update_interval();
            backend
                .run_every(period, |backend| async move {
                    backend.update_daemon_info().await;
                })
                .await;
        }));

        let backend = self.clone();
        tasks.push(tokio::spawn(async move {
            let period = backend.config.locked_transactions_check_interval();
            backend
                .run_every(period, |backend| async move {
                    if let Err(e) = backend.check_locked_transactions().await {
                        log::debug!("Failed to check locked transactions. {}", e);
                    }
                })
                .await;
        }));

        log::info!("Started background sync");
    }

    async fn run_every<F, Fut>(self: &Arc<Self>, period: Duration, mut job: F)
    where
        F: FnMut(Arc<Self>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interrupt = self.interrupt_sync.subscribe();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let interrupted = *interrupt.borrow_and_update();
            if interrupted {
                break;
            }
            tokio::select! {
                _ = interval.tick() => job(self.clone()).await,
                _ = interrupt.changed() => {}
            }
        }
    }

    /// Stops the background loops, letting the current iteration of each finish
    pub async fn stop(&self) {
        self.interrupt_sync.send_replace(true);
        let tasks: Vec<_> = self.background_tasks.lock().await.drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                log::error!("Background task failed. {}", e);
            }
        }
        log::info!("Stopped background sync");
    }
}

/// Applies one block's deltas, returning the transactions that were added.
///
/// Duplicate inputs and unknown spent key images point at a daemon or sync bug. They are
/// logged and skipped so one bad output does not stall the wallet.
fn apply_transaction_data(
    wallet: &mut SubWallets,
    data: TransactionData,
    block_height: u64,
) -> Result<Vec<Transaction>, WalletError> {
    for transaction in &data.transactions_to_add {
        wallet.add_transaction(transaction.clone());
    }

    for (public_spend_key, input) in data.inputs_to_add {
        match wallet.store_transaction_input(&public_spend_key, input) {
            Ok(()) => {}
            Err(WalletError::DuplicateInput(key)) => {
                log::warn!("Input with output key {} is already stored, skipping", key);
            }
            Err(e) => return Err(e),
        }
    }

    for (public_spend_key, key_image) in data.key_images_to_mark_spent {
        if let Err(e) = wallet.mark_input_as_spent(&public_spend_key, &key_image, block_height) {
            log::error!("Could not mark input as spent. {}", e);
        }
    }

    Ok(data.transactions_to_add)
}
