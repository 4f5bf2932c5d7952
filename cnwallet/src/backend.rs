//! The handle applications hold: a wallet, its synchronizer and the daemon it talks to.
//!
//! Behaviour is split the way it is used: [`sync`] processes blocks and watches unconfirmed
//! transactions, [`send`] builds and relays transactions, [`save`] persists the wallet.

pub mod save;
pub mod send;
pub mod sync;

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use cn_sync::client::Daemon;
use cn_sync::crypto::CryptoOracle;
use cn_sync::primitives::{Hash, PublicKey, SecretKey, Transaction};
use cn_sync::sync::{SyncEvent, WalletSynchronizer};
use cnconfig::WalletConfig;

use crate::builder::validation::validate_address;
use crate::error::{ValidationError, WalletError};
use crate::wallet::disk::WalletDocument;
use crate::wallet::SubWallets;

/// Notifications emitted by [`WalletBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// A confirmed transaction touching the wallet was processed
    Transaction(Transaction),
    /// We relayed a transaction
    CreatedTransaction(Transaction),
    /// We relayed a fusion transaction
    CreatedFusionTransaction(Transaction),
    /// A transaction we sent was dropped by the network and its inputs returned
    CancelledTransaction(Hash),
    HeightChange {
        wallet_height: u64,
        local_daemon_height: u64,
        network_height: u64,
    },
    /// The wallet caught up with the network
    Synced { wallet_height: u64, network_height: u64 },
    /// The wallet fell behind the network again
    Desync { wallet_height: u64, network_height: u64 },
    /// The daemon stopped delivering blocks or network heights
    DeadNode,
}

/// A CryptoNote wallet kept in sync with a daemon
pub struct WalletBackend<D, O> {
    pub(crate) config: Arc<WalletConfig>,
    pub(crate) oracle: Arc<O>,
    daemon: RwLock<Arc<D>>,
    pub(crate) wallet: Arc<RwLock<SubWallets>>,
    synchronizer: RwLock<WalletSynchronizer<D>>,
    sync_events: Mutex<mpsc::UnboundedReceiver<SyncEvent>>,
    event_sender: Option<mpsc::UnboundedSender<WalletEvent>>,
    /// Held while blocks are processed or the wallet is reset
    sync_lock: Mutex<()>,
    /// Held while a transaction is built and recorded
    send_lock: Mutex<()>,
    is_synced: std::sync::atomic::AtomicBool,
    /// Set to true to stop the background loops
    interrupt_sync: watch::Sender<bool>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<D, O> WalletBackend<D, O>
where
    D: Daemon + 'static,
    O: CryptoOracle + 'static,
{
    fn from_parts(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        wallet: SubWallets,
        mut synchronizer: WalletSynchronizer<D>,
    ) -> Self {
        let sync_events = synchronizer.subscribe();
        Self {
            config,
            oracle,
            daemon: RwLock::new(daemon),
            wallet: Arc::new(RwLock::new(wallet)),
            synchronizer: RwLock::new(synchronizer),
            sync_events: Mutex::new(sync_events),
            event_sender: None,
            sync_lock: Mutex::new(()),
            send_lock: Mutex::new(()),
            is_synced: std::sync::atomic::AtomicBool::new(false),
            interrupt_sync: watch::channel(false).0,
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    fn with_wallet(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        wallet: SubWallets,
    ) -> Self {
        let (start_height, start_timestamp) = wallet.earliest_scan_start();
        let synchronizer =
            WalletSynchronizer::new(daemon.clone(), config.clone(), start_height, start_timestamp);
        Self::from_parts(config, daemon, oracle, wallet, synchronizer)
    }

    /// A wallet with fresh keys, scanning from shortly before now
    pub fn create_wallet(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
    ) -> Result<Self, WalletError> {
        let spend_keys = oracle.generate_keys()?;
        let view_keys = oracle.generate_keys()?;
        let wallet = SubWallets::new(
            oracle.as_ref(),
            config.address_prefix,
            spend_keys.secret_key,
            view_keys.secret_key,
            0,
            true,
            config.block_target_time,
        )?;
        log::info!("Created wallet {:?}", wallet.primary_address());
        Ok(Self::with_wallet(config, daemon, oracle, wallet))
    }

    /// Restores a spend wallet from its private keys, scanning from `scan_height`
    pub fn import_wallet_from_keys(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        private_spend_key: SecretKey,
        private_view_key: SecretKey,
        scan_height: u64,
    ) -> Result<Self, WalletError> {
        let wallet = SubWallets::new(
            oracle.as_ref(),
            config.address_prefix,
            private_spend_key,
            private_view_key,
            scan_height,
            false,
            config.block_target_time,
        )?;
        Ok(Self::with_wallet(config, daemon, oracle, wallet))
    }

    /// A view wallet for `address`, which must belong to `private_view_key`
    pub fn import_view_wallet(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        private_view_key: SecretKey,
        address: &str,
        scan_height: u64,
    ) -> Result<Self, WalletError> {
        let (public_spend_key, public_view_key) =
            validate_address(oracle.as_ref(), address, config.address_prefix)?;
        if oracle.secret_key_to_public_key(&private_view_key)? != public_view_key {
            return Err(ValidationError::InvalidAddress(address.to_string()).into());
        }

        let wallet = SubWallets::new_view_wallet(
            oracle.as_ref(),
            config.address_prefix,
            public_spend_key,
            private_view_key,
            scan_height,
            false,
            config.block_target_time,
        )?;
        Ok(Self::with_wallet(config, daemon, oracle, wallet))
    }

    pub fn from_document(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        document: WalletDocument,
    ) -> Self {
        let synchronizer =
            WalletSynchronizer::from_state(daemon.clone(), config.clone(), document.synchronizer);
        Self::from_parts(config, daemon, oracle, document.sub_wallets, synchronizer)
    }

    pub fn load_wallet_from_json(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        json: &str,
    ) -> Result<Self, WalletError> {
        let document = WalletDocument::from_json(json)?;
        Ok(Self::from_document(config, daemon, oracle, document))
    }

    pub fn open_wallet_from_file(
        config: Arc<WalletConfig>,
        daemon: Arc<D>,
        oracle: Arc<O>,
        path: &Path,
    ) -> Result<Self, WalletError> {
        let document = WalletDocument::load_from_file(path)?;
        Ok(Self::from_document(config, daemon, oracle, document))
    }

    /// Returns a receiver for [`WalletEvent`]s, replacing any previous one
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<WalletEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.event_sender = Some(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: WalletEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    pub(crate) async fn daemon(&self) -> Arc<D> {
        self.daemon.read().await.clone()
    }

    pub(crate) async fn synchronizer(&self) -> WalletSynchronizer<D> {
        self.synchronizer.read().await.clone()
    }

    /// Use a different daemon from now on, keeping sync progress
    pub async fn swap_node(&self, daemon: Arc<D>) {
        let _syncing = self.sync_lock.lock().await;
        *self.daemon.write().await = daemon.clone();
        self.synchronizer.write().await.swap_node(daemon);
        log::info!("Swapped daemon");
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Sends `log` output to the rolling log file in the wallet directory. Fails if a logger is
    /// already installed.
    pub fn init_logging(&self) -> io::Result<()> {
        self.config.init_logging()?;
        log::info!("Logging to {}", self.config.get_log_path()?.display());
        Ok(())
    }

    pub async fn get_primary_address(&self) -> Option<String> {
        self.wallet.read().await.primary_address()
    }

    pub async fn get_addresses(&self) -> Vec<String> {
        self.wallet.read().await.addresses()
    }

    pub async fn get_wallet_count(&self) -> usize {
        self.wallet.read().await.sub_wallet_count()
    }

    pub async fn get_private_view_key(&self) -> SecretKey {
        self.wallet.read().await.private_view_key()
    }

    pub async fn is_view_wallet(&self) -> bool {
        self.wallet.read().await.is_view_wallet()
    }

    /// Public and private spend key of `address`, the private key is `None` in a view wallet
    pub async fn get_spend_keys(
        &self,
        address: &str,
    ) -> Result<(PublicKey, Option<SecretKey>), WalletError> {
        let wallet = self.wallet.read().await;
        let public_spend_key = wallet.public_spend_key_of(address)?;
        Ok((public_spend_key, wallet.private_spend_key(&public_spend_key)?))
    }

    /// `(unlocked, locked)` balance of `addresses`, or of the whole wallet
    pub async fn get_balance(
        &self,
        addresses: Option<&[String]>,
    ) -> Result<(u64, u64), WalletError> {
        let height = self.synchronizer().await.height().await;
        self.wallet.read().await.get_balance(height, addresses)
    }

    /// Unconfirmed transactions first, then confirmed ones from the newest block down
    pub async fn get_transactions(
        &self,
        start_index: usize,
        transaction_count: Option<usize>,
        include_fusions: bool,
        address: Option<&str>,
    ) -> Result<Vec<Transaction>, WalletError> {
        let wallet = self.wallet.read().await;
        let mut confirmed = wallet.get_transactions(address)?;
        confirmed.sort_by(|a, b| b.block_height().cmp(&a.block_height()));

        Ok(wallet
            .get_unconfirmed_transactions(address)?
            .into_iter()
            .chain(confirmed)
            .filter(|transaction| include_fusions || !transaction.is_fusion_transaction())
            .skip(start_index)
            .take(transaction_count.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    pub async fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        let wallet = self.wallet.read().await;
        wallet
            .locked_transactions()
            .iter()
            .chain(wallet.transactions())
            .find(|transaction| transaction.hash() == *hash)
            .cloned()
    }

    pub async fn get_num_transactions(&self, address: Option<&str>) -> Result<usize, WalletError> {
        let wallet = self.wallet.read().await;
        Ok(wallet.get_transactions(address)?.len()
            + wallet.get_unconfirmed_transactions(address)?.len())
    }

    /// Adds a subwallet with fresh keys, returning its address
    pub async fn add_sub_wallet(&self) -> Result<String, WalletError> {
        let height = self.synchronizer().await.height().await;
        self.wallet
            .write()
            .await
            .add_sub_wallet(self.oracle.as_ref(), height)
    }

    /// Imports a subwallet, rewinding the wallet if it has to be scanned from further back
    pub async fn import_sub_wallet(
        &self,
        private_spend_key: SecretKey,
        scan_height: Option<u64>,
    ) -> Result<String, WalletError> {
        let current_height = self.synchronizer().await.height().await;
        let scan_height = scan_height.unwrap_or(current_height);
        let address = self.wallet.write().await.import_sub_wallet(
            self.oracle.as_ref(),
            private_spend_key,
            scan_height,
        )?;
        if scan_height < current_height {
            self.rewind(scan_height).await;
        }
        Ok(address)
    }

    /// Imports a view only subwallet, rewinding the wallet if needed
    pub async fn import_view_sub_wallet(
        &self,
        public_spend_key: PublicKey,
        scan_height: Option<u64>,
    ) -> Result<String, WalletError> {
        let current_height = self.synchronizer().await.height().await;
        let scan_height = scan_height.unwrap_or(current_height);
        let address = self.wallet.write().await.import_view_sub_wallet(
            self.oracle.as_ref(),
            public_spend_key,
            scan_height,
        )?;
        if scan_height < current_height {
            self.rewind(scan_height).await;
        }
        Ok(address)
    }

    pub async fn delete_sub_wallet(&self, address: &str) -> Result<(), WalletError> {
        self.wallet.write().await.delete_sub_wallet(address)
    }
}
