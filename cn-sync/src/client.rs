//! Module for handling all connections to the daemon
//!
//! Transport is left to implementors of [`Daemon`]: the sync engine and the wallet only depend
//! on the request/response shapes below.

use std::collections::HashMap;
use std::future::Future;

use crate::primitives::{Block, Hash, RandomOutput, TopBlock};

/// Errors associated with daemon requests
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DaemonError {
    /// Transient network or RPC failure
    #[error("Daemon request failed. {0}")]
    Request(String),
    /// The daemon refused a relayed transaction
    #[error("Daemon rejected the transaction. {0}")]
    Rejected(String),
    /// The daemon answered with data we could not understand
    #[error("Malformed daemon response. {0}")]
    MalformedResponse(String),
}

/// Response to a wallet sync data request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSyncData {
    /// Blocks following the newest checkpoint the daemon recognised
    pub blocks: Vec<Block>,
    /// Present when the daemon reports there is nothing left to sync
    pub top_block: Option<TopBlock>,
}

/// Remote blockchain data source
pub trait Daemon: Send + Sync {
    /// Blocks after the most recent checkpoint known to the daemon, or after the start height
    /// or timestamp when no checkpoint matches
    fn get_wallet_sync_data(
        &self,
        block_checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
        block_count: u64,
        skip_coinbase_transactions: bool,
    ) -> impl Future<Output = Result<WalletSyncData, DaemonError>> + Send;

    /// Global output indexes of every transaction in `[start_height, end_height)`
    fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> impl Future<Output = Result<HashMap<Hash, Vec<u64>>, DaemonError>> + Send;

    /// The subset of `transaction_hashes` the daemon does not know about
    fn get_cancelled_transactions(
        &self,
        transaction_hashes: &[Hash],
    ) -> impl Future<Output = Result<Vec<Hash>, DaemonError>> + Send;

    /// `requested_outputs` decoy candidates for each amount
    fn get_random_outputs_by_amount(
        &self,
        amounts: &[u64],
        requested_outputs: u64,
    ) -> impl Future<Output = Result<Vec<(u64, Vec<RandomOutput>)>, DaemonError>> + Send;

    /// Relays a hex encoded transaction
    fn send_transaction(
        &self,
        raw_transaction: &str,
    ) -> impl Future<Output = Result<(), DaemonError>> + Send;

    /// Block count of the daemon we are connected to
    fn get_local_daemon_block_count(&self) -> u64;

    /// Block count of the network, as reported by the daemon
    fn get_network_block_count(&self) -> u64;
}
