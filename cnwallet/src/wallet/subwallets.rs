//! The container of every subwallet, the transaction history and the key image index

use std::collections::{BTreeMap, HashMap, HashSet};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use cn_sync::crypto::CryptoOracle;
use cn_sync::primitives::{
    Hash, KeyImage, PublicKey, SecretKey, Transaction, TransactionInput, UnconfirmedInput,
};
use cn_sync::traits::SyncWallet;

use crate::error::WalletError;
use crate::wallet::subwallet::SubWallet;
use crate::wallet::utils::{current_timestamp_adjusted, is_input_unlocked};

/// Every subwallet of a wallet, sharing one view key.
///
/// For spend wallets `key_image_owners` always holds exactly the key images found in the unspent,
/// locked and spent containers of every subwallet. View wallets can not compute key images and
/// keep the index empty.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SubWalletsParts")]
pub struct SubWallets {
    /// Primary first, then in order of creation
    #[getset(get = "pub")]
    public_spend_keys: Vec<PublicKey>,
    sub_wallets: BTreeMap<PublicKey, SubWallet>,
    /// Confirmed transactions touching the wallet
    #[getset(get = "pub")]
    transactions: Vec<Transaction>,
    /// Transactions we sent that are not in a block yet
    #[getset(get = "pub")]
    locked_transactions: Vec<Transaction>,
    #[getset(get_copy = "pub")]
    private_view_key: SecretKey,
    #[getset(get_copy = "pub")]
    public_view_key: PublicKey,
    #[getset(get_copy = "pub")]
    is_view_wallet: bool,
    #[getset(get_copy = "pub")]
    address_prefix: u64,
    #[getset(get = "pub")]
    transaction_private_keys: BTreeMap<Hash, SecretKey>,
    #[serde(skip)]
    key_image_owners: HashMap<KeyImage, PublicKey>,
}

impl SubWallets {
    /// Creates a spend wallet whose primary address belongs to `private_spend_key`.
    ///
    /// A new wallet scans from a timestamp shortly before now instead of `scan_height`.
    pub fn new<O: CryptoOracle>(
        oracle: &O,
        address_prefix: u64,
        private_spend_key: SecretKey,
        private_view_key: SecretKey,
        scan_height: u64,
        new_wallet: bool,
        block_target_time: u64,
    ) -> Result<Self, WalletError> {
        let public_spend_key = oracle.secret_key_to_public_key(&private_spend_key)?;
        Self::with_primary(
            oracle,
            address_prefix,
            public_spend_key,
            Some(private_spend_key),
            private_view_key,
            scan_height,
            new_wallet.then(|| current_timestamp_adjusted(block_target_time)),
        )
    }

    /// Creates a view wallet for the address with `public_spend_key`
    pub fn new_view_wallet<O: CryptoOracle>(
        oracle: &O,
        address_prefix: u64,
        public_spend_key: PublicKey,
        private_view_key: SecretKey,
        scan_height: u64,
        new_wallet: bool,
        block_target_time: u64,
    ) -> Result<Self, WalletError> {
        Self::with_primary(
            oracle,
            address_prefix,
            public_spend_key,
            None,
            private_view_key,
            scan_height,
            new_wallet.then(|| current_timestamp_adjusted(block_target_time)),
        )
    }

    fn with_primary<O: CryptoOracle>(
        oracle: &O,
        address_prefix: u64,
        public_spend_key: PublicKey,
        private_spend_key: Option<SecretKey>,
        private_view_key: SecretKey,
        scan_height: u64,
        scan_timestamp: Option<u64>,
    ) -> Result<Self, WalletError> {
        let public_view_key = oracle.secret_key_to_public_key(&private_view_key)?;
        let address = oracle.encode_address(&public_spend_key, &public_view_key, address_prefix);
        let primary = SubWallet::new(
            address,
            public_spend_key,
            private_spend_key,
            scan_height,
            scan_timestamp.unwrap_or(0),
            true,
        );

        Ok(Self {
            public_spend_keys: vec![public_spend_key],
            sub_wallets: BTreeMap::from([(public_spend_key, primary)]),
            transactions: Vec::new(),
            locked_transactions: Vec::new(),
            private_view_key,
            public_view_key,
            is_view_wallet: private_spend_key.is_none(),
            address_prefix,
            transaction_private_keys: BTreeMap::new(),
            key_image_owners: HashMap::new(),
        })
    }

    fn insert_sub_wallet<O: CryptoOracle>(
        &mut self,
        oracle: &O,
        public_spend_key: PublicKey,
        private_spend_key: Option<SecretKey>,
        scan_height: u64,
    ) -> Result<String, WalletError> {
        if self.sub_wallets.contains_key(&public_spend_key) {
            return Err(WalletError::SubwalletAlreadyExists);
        }

        let address =
            oracle.encode_address(&public_spend_key, &self.public_view_key, self.address_prefix);
        self.public_spend_keys.push(public_spend_key);
        self.sub_wallets.insert(
            public_spend_key,
            SubWallet::new(
                address.clone(),
                public_spend_key,
                private_spend_key,
                scan_height,
                0,
                false,
            ),
        );

        log::info!("Added subwallet {}", address);
        Ok(address)
    }

    /// Adds a subwallet with fresh random keys, returning its address
    pub fn add_sub_wallet<O: CryptoOracle>(
        &mut self,
        oracle: &O,
        scan_height: u64,
    ) -> Result<String, WalletError> {
        if self.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        let keys = oracle.generate_keys()?;
        self.insert_sub_wallet(oracle, keys.public_key, Some(keys.secret_key), scan_height)
    }

    /// Adds the subwallet belonging to `private_spend_key`, returning its address
    pub fn import_sub_wallet<O: CryptoOracle>(
        &mut self,
        oracle: &O,
        private_spend_key: SecretKey,
        scan_height: u64,
    ) -> Result<String, WalletError> {
        if self.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        let public_spend_key = oracle.secret_key_to_public_key(&private_spend_key)?;
        self.insert_sub_wallet(oracle, public_spend_key, Some(private_spend_key), scan_height)
    }

    /// Adds a view only subwallet for `public_spend_key`, returning its address
    pub fn import_view_sub_wallet<O: CryptoOracle>(
        &mut self,
        oracle: &O,
        public_spend_key: PublicKey,
        scan_height: u64,
    ) -> Result<String, WalletError> {
        if !self.is_view_wallet {
            return Err(WalletError::IllegalNonViewWalletOperation);
        }
        self.insert_sub_wallet(oracle, public_spend_key, None, scan_height)
    }

    /// Removes a subwallet and its share of the transaction history.
    ///
    /// Transactions only touching the deleted subwallet are removed entirely.
    pub fn delete_sub_wallet(&mut self, address: &str) -> Result<(), WalletError> {
        let public_spend_key = self.public_spend_key_of(address)?;
        let is_primary = self
            .sub_wallets
            .get(&public_spend_key)
            .is_some_and(SubWallet::is_primary_address);
        if is_primary {
            return Err(WalletError::CannotDeletePrimaryAddress);
        }

        if let Some(sub_wallet) = self.sub_wallets.remove(&public_spend_key) {
            for key_image in sub_wallet.key_images() {
                self.key_image_owners.remove(&key_image);
            }
        }
        self.public_spend_keys.retain(|key| *key != public_spend_key);

        for transactions in [&mut self.transactions, &mut self.locked_transactions] {
            transactions.retain_mut(|transaction| {
                !(transaction.remove_transfer(&public_spend_key) && transaction.transfers().is_empty())
            });
        }

        log::info!("Deleted subwallet {}", address);
        Ok(())
    }

    pub fn sub_wallet_count(&self) -> usize {
        self.sub_wallets.len()
    }

    pub fn sub_wallet(&self, public_spend_key: &PublicKey) -> Option<&SubWallet> {
        self.sub_wallets.get(public_spend_key)
    }

    pub fn sub_wallets(&self) -> impl Iterator<Item = &SubWallet> {
        self.sub_wallets.values()
    }

    fn sub_wallet_mut(&mut self, public_spend_key: &PublicKey) -> Result<&mut SubWallet, WalletError> {
        self.sub_wallets
            .get_mut(public_spend_key)
            .ok_or(WalletError::SubWalletNotFound(*public_spend_key))
    }

    /// Public spend key of the subwallet with `address`
    pub fn public_spend_key_of(&self, address: &str) -> Result<PublicKey, WalletError> {
        self.sub_wallets
            .values()
            .find(|sub_wallet| sub_wallet.address() == address)
            .map(SubWallet::public_spend_key)
            .ok_or_else(|| WalletError::AddressNotInWallet(address.to_string()))
    }

    /// Public spend keys of `addresses`, or of every subwallet when `None`
    pub fn public_spend_keys_of(
        &self,
        addresses: Option<&[String]>,
    ) -> Result<Vec<PublicKey>, WalletError> {
        match addresses {
            Some(addresses) => addresses
                .iter()
                .map(|address| self.public_spend_key_of(address))
                .collect(),
            None => Ok(self.public_spend_keys.clone()),
        }
    }

    /// Addresses of every subwallet, primary first
    pub fn addresses(&self) -> Vec<String> {
        self.public_spend_keys
            .iter()
            .filter_map(|key| self.sub_wallets.get(key))
            .map(|sub_wallet| sub_wallet.address().clone())
            .collect()
    }

    pub fn primary_sub_wallet(&self) -> Option<&SubWallet> {
        self.sub_wallets
            .values()
            .find(|sub_wallet| sub_wallet.is_primary_address())
    }

    pub fn primary_address(&self) -> Option<String> {
        self.primary_sub_wallet()
            .map(|sub_wallet| sub_wallet.address().clone())
    }

    /// Private spend key of a subwallet, `None` for view wallets
    pub fn private_spend_key(
        &self,
        public_spend_key: &PublicKey,
    ) -> Result<Option<SecretKey>, WalletError> {
        self.sub_wallets
            .get(public_spend_key)
            .map(SubWallet::private_spend_key)
            .ok_or(WalletError::SubWalletNotFound(*public_spend_key))
    }

    /// `(public, private)` spend keys of every subwallet
    pub fn all_spend_keys(&self) -> Vec<(PublicKey, Option<SecretKey>)> {
        self.sub_wallets
            .iter()
            .map(|(public_spend_key, sub_wallet)| (*public_spend_key, sub_wallet.private_spend_key()))
            .collect()
    }

    pub fn key_image_owner(&self, key_image: &KeyImage) -> Option<PublicKey> {
        if self.is_view_wallet {
            return None;
        }
        self.key_image_owners.get(key_image).copied()
    }

    /// Number of key images in the ownership index
    pub fn key_image_count(&self) -> usize {
        self.key_image_owners.len()
    }

    /// Records a confirmed transaction, replacing the locked copy we stored when sending it
    pub fn add_transaction(&mut self, transaction: Transaction) {
        log::trace!("Transaction details: {:?}", transaction);
        self.locked_transactions
            .retain(|locked| locked.hash() != transaction.hash());

        if self
            .transactions
            .iter()
            .any(|stored| stored.hash() == transaction.hash())
        {
            log::debug!("Already seen transaction {}, ignoring.", transaction.hash());
            return;
        }
        self.transactions.push(transaction);
    }

    /// Records a transaction we sent
    pub fn add_unconfirmed_transaction(&mut self, transaction: Transaction) {
        log::trace!("Unconfirmed transaction details: {:?}", transaction);
        if self
            .locked_transactions
            .iter()
            .any(|stored| stored.hash() == transaction.hash())
        {
            log::debug!(
                "Already seen unconfirmed transaction {}, ignoring.",
                transaction.hash()
            );
            return;
        }
        self.locked_transactions.push(transaction);
    }

    pub fn locked_transaction_hashes(&self) -> Vec<Hash> {
        self.locked_transactions
            .iter()
            .map(Transaction::hash)
            .collect()
    }

    /// Confirmed transactions touching `address`, or every transaction when `None`
    pub fn get_transactions(&self, address: Option<&str>) -> Result<Vec<&Transaction>, WalletError> {
        Ok(Self::filter_transactions(
            &self.transactions,
            self.address_filter(address)?,
        ))
    }

    /// Unconfirmed transactions touching `address`, or every one when `None`
    pub fn get_unconfirmed_transactions(
        &self,
        address: Option<&str>,
    ) -> Result<Vec<&Transaction>, WalletError> {
        Ok(Self::filter_transactions(
            &self.locked_transactions,
            self.address_filter(address)?,
        ))
    }

    fn address_filter(&self, address: Option<&str>) -> Result<Option<PublicKey>, WalletError> {
        address
            .map(|address| self.public_spend_key_of(address))
            .transpose()
    }

    fn filter_transactions(
        transactions: &[Transaction],
        public_spend_key: Option<PublicKey>,
    ) -> Vec<&Transaction> {
        transactions
            .iter()
            .filter(|transaction| {
                public_spend_key.map_or(true, |key| transaction.transfers().contains_key(&key))
            })
            .collect()
    }

    /// Stores a received input in the subwallet owning it
    pub fn store_transaction_input(
        &mut self,
        public_spend_key: &PublicKey,
        input: TransactionInput,
    ) -> Result<(), WalletError> {
        log::trace!("Input details: {:?}", input);
        let key_image = input.key_image;
        let is_view_wallet = self.is_view_wallet;
        if !is_view_wallet && self.key_image_owners.contains_key(&key_image) {
            return Err(WalletError::DuplicateInput(input.key));
        }
        self.sub_wallet_mut(public_spend_key)?
            .store_transaction_input(input)?;

        if !is_view_wallet {
            self.key_image_owners.insert(key_image, *public_spend_key);
        }
        Ok(())
    }

    pub fn store_unconfirmed_incoming_input(
        &mut self,
        public_spend_key: &PublicKey,
        input: UnconfirmedInput,
    ) -> Result<(), WalletError> {
        self.sub_wallet_mut(public_spend_key)?
            .store_unconfirmed_incoming_input(input);
        Ok(())
    }

    pub fn store_tx_private_key(&mut self, transaction_hash: Hash, private_key: SecretKey) {
        self.transaction_private_keys
            .insert(transaction_hash, private_key);
    }

    pub fn mark_input_as_spent(
        &mut self,
        public_spend_key: &PublicKey,
        key_image: &KeyImage,
        spend_height: u64,
    ) -> Result<(), WalletError> {
        self.sub_wallet_mut(public_spend_key)?
            .mark_input_as_spent(key_image, spend_height)
    }

    pub fn mark_input_as_locked(
        &mut self,
        public_spend_key: &PublicKey,
        key_image: &KeyImage,
        spending_transaction_hash: Hash,
    ) -> Result<(), WalletError> {
        self.sub_wallet_mut(public_spend_key)?
            .mark_input_as_locked(key_image, spending_transaction_hash)
    }

    /// Forgets a sent transaction that never made it into a block and unlocks its inputs
    pub fn remove_cancelled_transaction(&mut self, transaction_hash: &Hash) {
        self.locked_transactions
            .retain(|locked| locked.hash() != *transaction_hash);
        for sub_wallet in self.sub_wallets.values_mut() {
            sub_wallet.remove_cancelled_transaction(transaction_hash);
        }
    }

    /// Removes transactions and inputs at or after `fork_height`, they will be added again if
    /// they are in the new chain
    pub fn remove_forked_transactions(&mut self, fork_height: u64) {
        self.transactions
            .retain(|transaction| transaction.block_height() < fork_height);

        let removed: Vec<KeyImage> = self
            .sub_wallets
            .values_mut()
            .flat_map(|sub_wallet| sub_wallet.remove_forked_transactions(fork_height))
            .collect();

        if !self.is_view_wallet {
            for key_image in removed {
                self.key_image_owners.remove(&key_image);
            }
        }
    }

    /// Discards spent inputs spent before `prune_height`
    pub fn prune_spent_inputs(&mut self, prune_height: u64) {
        let pruned: Vec<KeyImage> = self
            .sub_wallets
            .values_mut()
            .flat_map(|sub_wallet| sub_wallet.prune_spent_inputs(prune_height))
            .collect();

        if !self.is_view_wallet {
            for key_image in pruned {
                self.key_image_owners.remove(&key_image);
            }
        }
    }

    /// Forgets every transaction and input and rescans from the given point
    pub fn reset(&mut self, scan_height: u64, scan_timestamp: u64) {
        self.transactions.clear();
        self.locked_transactions.clear();
        self.transaction_private_keys.clear();
        self.key_image_owners.clear();
        for sub_wallet in self.sub_wallets.values_mut() {
            sub_wallet.reset(scan_height, scan_timestamp);
        }
    }

    /// Forgets unconfirmed transactions and everything at or after `scan_height`
    pub fn rewind(&mut self, scan_height: u64) {
        self.locked_transactions.clear();
        self.remove_forked_transactions(scan_height);
    }

    pub fn convert_sync_timestamp_to_height(&mut self, height: u64) {
        for sub_wallet in self.sub_wallets.values_mut() {
            sub_wallet.convert_sync_timestamp_to_height(height);
        }
    }

    /// Lowest scan start of any subwallet, as `(height, timestamp)`
    pub fn earliest_scan_start(&self) -> (u64, u64) {
        let height = self
            .sub_wallets
            .values()
            .map(SubWallet::sync_start_height)
            .min()
            .unwrap_or(0);
        let timestamp = self
            .sub_wallets
            .values()
            .map(SubWallet::sync_start_timestamp)
            .filter(|timestamp| *timestamp != 0)
            .min()
            .unwrap_or(0);
        (height, timestamp)
    }

    /// `(unlocked, locked)` balance of `addresses`, or of every subwallet when `None`.
    ///
    /// Unconfirmed outgoing transactions count against the unlocked balance straight away and
    /// the change they will return is shown as locked.
    pub fn get_balance(
        &self,
        current_height: u64,
        addresses: Option<&[String]>,
    ) -> Result<(u64, u64), WalletError> {
        let public_spend_keys: HashSet<PublicKey> =
            self.public_spend_keys_of(addresses)?.into_iter().collect();

        let mut unlocked: i64 = 0;
        let mut locked: i64 = 0;

        for transaction in &self.transactions {
            let is_unlocked = is_input_unlocked(transaction.unlock_time(), current_height);
            for (public_spend_key, amount) in transaction.transfers() {
                if public_spend_keys.contains(public_spend_key) {
                    if is_unlocked {
                        unlocked = unlocked.saturating_add(*amount);
                    } else {
                        locked = locked.saturating_add(*amount);
                    }
                }
            }
        }

        for transaction in &self.locked_transactions {
            for (public_spend_key, amount) in transaction.transfers() {
                if public_spend_keys.contains(public_spend_key) {
                    unlocked = unlocked.saturating_add(*amount);
                }
            }
        }

        let unconfirmed_change: u64 = public_spend_keys
            .iter()
            .filter_map(|key| self.sub_wallets.get(key))
            .map(SubWallet::get_unconfirmed_change)
            .fold(0u64, u64::saturating_add);
        let unconfirmed_change = i64::try_from(unconfirmed_change).unwrap_or(i64::MAX);
        locked = locked.saturating_add(unconfirmed_change);
        unlocked = unlocked.saturating_sub(unconfirmed_change);

        Ok((clamp_balance(unlocked), clamp_balance(locked)))
    }

    fn rebuild_key_image_index(&mut self) {
        self.key_image_owners.clear();
        if self.is_view_wallet {
            return;
        }
        for (public_spend_key, sub_wallet) in &self.sub_wallets {
            for key_image in sub_wallet.key_images() {
                self.key_image_owners.insert(key_image, *public_spend_key);
            }
        }
    }

    /// Returns true if the key image index matches the inputs held by the subwallets
    pub fn key_image_index_is_consistent(&self) -> bool {
        if self.is_view_wallet {
            return self.key_image_owners.is_empty();
        }
        let mut expected = HashMap::new();
        for (public_spend_key, sub_wallet) in &self.sub_wallets {
            for key_image in sub_wallet.key_images() {
                expected.insert(key_image, *public_spend_key);
            }
        }
        expected == self.key_image_owners
    }
}

fn clamp_balance(amount: i64) -> u64 {
    u64::try_from(amount).unwrap_or(0)
}

impl SyncWallet for SubWallets {
    type Error = WalletError;

    fn get_private_view_key(&self) -> Result<SecretKey, Self::Error> {
        Ok(self.private_view_key)
    }

    fn is_view_wallet(&self) -> Result<bool, Self::Error> {
        Ok(self.is_view_wallet)
    }

    fn get_public_spend_keys(&self) -> Result<Vec<PublicKey>, Self::Error> {
        Ok(self.public_spend_keys.clone())
    }

    fn get_private_spend_key(
        &self,
        public_spend_key: &PublicKey,
    ) -> Result<Option<SecretKey>, Self::Error> {
        self.private_spend_key(public_spend_key)
    }

    fn get_key_image_owner(&self, key_image: &KeyImage) -> Result<Option<PublicKey>, Self::Error> {
        Ok(self.key_image_owner(key_image))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubWalletsParts {
    public_spend_keys: Vec<PublicKey>,
    sub_wallets: BTreeMap<PublicKey, SubWallet>,
    transactions: Vec<Transaction>,
    locked_transactions: Vec<Transaction>,
    private_view_key: SecretKey,
    public_view_key: PublicKey,
    is_view_wallet: bool,
    address_prefix: u64,
    transaction_private_keys: BTreeMap<Hash, SecretKey>,
}

impl TryFrom<SubWalletsParts> for SubWallets {
    type Error = WalletError;

    fn try_from(parts: SubWalletsParts) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| -> Result<Self, WalletError> {
            Err(WalletError::Serialization(reason.to_string()))
        };

        let primary_count = parts
            .sub_wallets
            .values()
            .filter(|sub_wallet| sub_wallet.is_primary_address())
            .count();
        if primary_count != 1 {
            return invalid("wallet must have exactly one primary address");
        }

        let listed: HashSet<&PublicKey> = parts.public_spend_keys.iter().collect();
        if listed.len() != parts.public_spend_keys.len()
            || listed.len() != parts.sub_wallets.len()
            || parts
                .sub_wallets
                .iter()
                .any(|(key, sub_wallet)| !listed.contains(key) || sub_wallet.public_spend_key() != *key)
        {
            return invalid("public spend keys do not match the subwallets");
        }

        if parts
            .sub_wallets
            .values()
            .any(|sub_wallet| sub_wallet.is_view_wallet() != parts.is_view_wallet)
        {
            return invalid("view and spend subwallets can not be mixed");
        }

        if !parts.is_view_wallet {
            let mut key_images = HashSet::new();
            let unique = parts
                .sub_wallets
                .values()
                .flat_map(SubWallet::key_images)
                .all(|key_image| key_images.insert(key_image));
            if !unique {
                return invalid("a key image is owned by more than one input");
            }
        }

        let mut sub_wallets = SubWallets {
            public_spend_keys: parts.public_spend_keys,
            sub_wallets: parts.sub_wallets,
            transactions: parts.transactions,
            locked_transactions: parts.locked_transactions,
            private_view_key: parts.private_view_key,
            public_view_key: parts.public_view_key,
            is_view_wallet: parts.is_view_wallet,
            address_prefix: parts.address_prefix,
            transaction_private_keys: parts.transaction_private_keys,
            key_image_owners: HashMap::new(),
        };
        sub_wallets.rebuild_key_image_index();
        Ok(sub_wallets)
    }
}
