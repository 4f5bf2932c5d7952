//! A single address and the inputs it owns

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use cn_sync::primitives::{Hash, KeyImage, PublicKey, SecretKey, TransactionInput, UnconfirmedInput};

use crate::error::WalletError;
use crate::wallet::utils::is_input_unlocked;

/// A spendable input together with the subwallet keys that own it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInputAndOwner {
    pub input: TransactionInput,
    pub public_spend_key: PublicKey,
    pub private_spend_key: Option<SecretKey>,
}

/// One address of the wallet.
///
/// Every input lives in exactly one of the unspent, locked and spent containers. Inputs move
/// `unspent -> locked -> spent`, back from locked to unspent when the spending transaction is
/// cancelled, and back from spent to unspent when the block spending them is forked away.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SubWalletParts")]
pub struct SubWallet {
    #[getset(get = "pub")]
    address: String,
    #[getset(get_copy = "pub")]
    public_spend_key: PublicKey,
    /// Absent for view wallets
    #[getset(get_copy = "pub")]
    private_spend_key: Option<SecretKey>,
    #[getset(get = "pub")]
    unspent_inputs: Vec<TransactionInput>,
    /// Inputs spent by one of our transactions that has not been confirmed yet
    #[getset(get = "pub")]
    locked_inputs: Vec<TransactionInput>,
    #[getset(get = "pub")]
    spent_inputs: Vec<TransactionInput>,
    /// Change returning to us from our unconfirmed transactions
    #[getset(get = "pub")]
    unconfirmed_incoming_amounts: Vec<UnconfirmedInput>,
    #[getset(get_copy = "pub")]
    sync_start_height: u64,
    #[getset(get_copy = "pub")]
    sync_start_timestamp: u64,
    #[getset(get_copy = "pub")]
    is_primary_address: bool,
}

impl SubWallet {
    pub fn new(
        address: String,
        public_spend_key: PublicKey,
        private_spend_key: Option<SecretKey>,
        sync_start_height: u64,
        sync_start_timestamp: u64,
        is_primary_address: bool,
    ) -> Self {
        Self {
            address,
            public_spend_key,
            private_spend_key,
            unspent_inputs: Vec::new(),
            locked_inputs: Vec::new(),
            spent_inputs: Vec::new(),
            unconfirmed_incoming_amounts: Vec::new(),
            sync_start_height,
            sync_start_timestamp,
            is_primary_address,
        }
    }

    pub fn is_view_wallet(&self) -> bool {
        self.private_spend_key.is_none()
    }

    fn all_inputs(&self) -> impl Iterator<Item = &TransactionInput> {
        self.unspent_inputs
            .iter()
            .chain(self.locked_inputs.iter())
            .chain(self.spent_inputs.iter())
    }

    /// Key images of every input in the three containers
    pub fn key_images(&self) -> impl Iterator<Item = KeyImage> + '_ {
        self.all_inputs().map(|input| input.key_image)
    }

    pub fn has_key_image(&self, key_image: &KeyImage) -> bool {
        self.all_inputs().any(|input| input.key_image == *key_image)
    }

    /// Stores a newly received input as unspent.
    ///
    /// An input whose output key is already known is rejected: the same output was scanned twice.
    pub fn store_transaction_input(&mut self, input: TransactionInput) -> Result<(), WalletError> {
        if self.all_inputs().any(|stored| stored.key == input.key) {
            return Err(WalletError::DuplicateInput(input.key));
        }

        if !self.is_view_wallet() {
            // change from one of our own transactions has arrived
            self.unconfirmed_incoming_amounts
                .retain(|unconfirmed| unconfirmed.key != input.key);
        }

        self.unspent_inputs.push(input);
        Ok(())
    }

    pub fn store_unconfirmed_incoming_input(&mut self, input: UnconfirmedInput) {
        self.unconfirmed_incoming_amounts.push(input);
    }

    /// Moves an unspent or locked input to the spent container
    pub fn mark_input_as_spent(
        &mut self,
        key_image: &KeyImage,
        spend_height: u64,
    ) -> Result<(), WalletError> {
        let mut input = match take_input(&mut self.unspent_inputs, key_image) {
            Some(input) => input,
            None => take_input(&mut self.locked_inputs, key_image)
                .ok_or(WalletError::InputNotFound(*key_image))?,
        };

        input.spend_height = spend_height;
        self.spent_inputs.push(input);
        Ok(())
    }

    /// Moves an unspent input to the locked container, remembering the transaction spending it
    pub fn mark_input_as_locked(
        &mut self,
        key_image: &KeyImage,
        spending_transaction_hash: Hash,
    ) -> Result<(), WalletError> {
        let mut input = take_input(&mut self.unspent_inputs, key_image)
            .ok_or(WalletError::InputNotFound(*key_image))?;

        input.spending_transaction_hash = Some(spending_transaction_hash);
        self.locked_inputs.push(input);
        Ok(())
    }

    /// Returns the locked inputs of a transaction that never made it into a block to the
    /// unspent container and forgets the change it would have returned
    pub fn remove_cancelled_transaction(&mut self, transaction_hash: &Hash) {
        let (released, still_locked): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.locked_inputs)
                .into_iter()
                .partition(|input| {
                    input.parent_transaction_hash == *transaction_hash
                        || input.spending_transaction_hash == Some(*transaction_hash)
                });
        self.locked_inputs = still_locked;

        self.unspent_inputs
            .extend(released.into_iter().map(|mut input| {
                input.spend_height = 0;
                input.spending_transaction_hash = None;
                input
            }));

        self.unconfirmed_incoming_amounts
            .retain(|unconfirmed| unconfirmed.parent_transaction_hash != *transaction_hash);
    }

    /// Removes everything that happened at or after `fork_height`.
    ///
    /// Inputs received at or after the fork are removed and their key images returned. Inputs
    /// received before the fork but spent after it become unspent again.
    pub fn remove_forked_transactions(&mut self, fork_height: u64) -> Vec<KeyImage> {
        self.unconfirmed_incoming_amounts.clear();

        let mut removed = Vec::new();
        for container in [
            &mut self.locked_inputs,
            &mut self.unspent_inputs,
            &mut self.spent_inputs,
        ] {
            container.retain(|input| {
                if input.block_height >= fork_height {
                    removed.push(input.key_image);
                    false
                } else {
                    true
                }
            });
        }

        let (now_unspent, still_spent): (Vec<_>, Vec<_>) = std::mem::take(&mut self.spent_inputs)
            .into_iter()
            .partition(|input| input.spend_height >= fork_height);
        self.spent_inputs = still_spent;
        self.unspent_inputs
            .extend(now_unspent.into_iter().map(|mut input| {
                input.spend_height = 0;
                input.spending_transaction_hash = None;
                input
            }));

        removed
    }

    /// Discards spent inputs spent before `prune_height`, returning their key images
    pub fn prune_spent_inputs(&mut self, prune_height: u64) -> Vec<KeyImage> {
        let mut pruned = Vec::new();
        self.spent_inputs.retain(|input| {
            if input.spend_height < prune_height {
                pruned.push(input.key_image);
                false
            } else {
                true
            }
        });

        if !pruned.is_empty() {
            log::debug!("Pruned {} spent inputs", pruned.len());
        }
        pruned
    }

    /// Forgets every input and restarts scanning from the given point
    pub fn reset(&mut self, scan_height: u64, scan_timestamp: u64) {
        self.sync_start_height = scan_height;
        self.sync_start_timestamp = scan_timestamp;
        self.unspent_inputs.clear();
        self.locked_inputs.clear();
        self.spent_inputs.clear();
        self.unconfirmed_incoming_amounts.clear();
    }

    /// Switches a timestamp based scan start to `height`, once the daemon has resolved it
    pub fn convert_sync_timestamp_to_height(&mut self, height: u64) {
        if self.sync_start_timestamp != 0 {
            self.sync_start_timestamp = 0;
            self.sync_start_height = height;
        }
    }

    /// `(unlocked, locked)` balance at `current_height`, unconfirmed change counted as locked
    pub fn get_balance(&self, current_height: u64) -> (u64, u64) {
        let (unlocked, mut locked) =
            self.unspent_inputs
                .iter()
                .fold((0u64, 0u64), |(unlocked, locked), input| {
                    if is_input_unlocked(input.unlock_time, current_height) {
                        (unlocked.saturating_add(input.amount), locked)
                    } else {
                        (unlocked, locked.saturating_add(input.amount))
                    }
                });

        locked = locked.saturating_add(self.get_unconfirmed_change());
        (unlocked, locked)
    }

    /// Change returning to us from unconfirmed outgoing transactions
    pub fn get_unconfirmed_change(&self) -> u64 {
        self.unconfirmed_incoming_amounts
            .iter()
            .fold(0u64, |sum, unconfirmed| sum.saturating_add(unconfirmed.amount))
    }

    /// Unspent inputs that are unlocked at `current_height`
    pub fn get_spendable_inputs(&self, current_height: u64) -> Vec<TxInputAndOwner> {
        self.unspent_inputs
            .iter()
            .filter(|input| is_input_unlocked(input.unlock_time, current_height))
            .map(|input| TxInputAndOwner {
                input: input.clone(),
                public_spend_key: self.public_spend_key,
                private_spend_key: self.private_spend_key,
            })
            .collect()
    }
}

fn take_input(inputs: &mut Vec<TransactionInput>, key_image: &KeyImage) -> Option<TransactionInput> {
    inputs
        .iter()
        .position(|input| input.key_image == *key_image)
        .map(|index| inputs.remove(index))
}

/// Serialized form of a [`SubWallet`], checked before it becomes one
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubWalletParts {
    address: String,
    public_spend_key: PublicKey,
    private_spend_key: Option<SecretKey>,
    unspent_inputs: Vec<TransactionInput>,
    locked_inputs: Vec<TransactionInput>,
    spent_inputs: Vec<TransactionInput>,
    unconfirmed_incoming_amounts: Vec<UnconfirmedInput>,
    sync_start_height: u64,
    sync_start_timestamp: u64,
    is_primary_address: bool,
}

impl TryFrom<SubWalletParts> for SubWallet {
    type Error = WalletError;

    fn try_from(parts: SubWalletParts) -> Result<Self, Self::Error> {
        let subwallet = SubWallet {
            address: parts.address,
            public_spend_key: parts.public_spend_key,
            // older files store a null key for view wallets
            private_spend_key: parts.private_spend_key.filter(|key| !key.is_null()),
            unspent_inputs: parts.unspent_inputs,
            locked_inputs: parts.locked_inputs,
            spent_inputs: parts.spent_inputs,
            unconfirmed_incoming_amounts: parts.unconfirmed_incoming_amounts,
            sync_start_height: parts.sync_start_height,
            sync_start_timestamp: parts.sync_start_timestamp,
            is_primary_address: parts.is_primary_address,
        };

        if subwallet.all_inputs().any(|input| input.amount == 0)
            || subwallet
                .unconfirmed_incoming_amounts
                .iter()
                .any(|unconfirmed| unconfirmed.amount == 0)
        {
            return Err(WalletError::Serialization(format!(
                "subwallet {} has an input without an amount",
                subwallet.address
            )));
        }

        if !subwallet.is_view_wallet() {
            let mut key_images = std::collections::HashSet::new();
            if !subwallet.key_images().all(|key_image| key_images.insert(key_image)) {
                return Err(WalletError::Serialization(format!(
                    "subwallet {} stores the same key image twice",
                    subwallet.address
                )));
            }
        }

        Ok(subwallet)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn input(seed: u8, amount: u64, block_height: u64) -> TransactionInput {
        TransactionInput {
            key_image: KeyImage::from_bytes([seed; 32]),
            amount,
            block_height,
            transaction_public_key: PublicKey::from_bytes([seed.wrapping_add(1); 32]),
            transaction_index: 0,
            global_output_index: Some(seed as u64),
            key: PublicKey::from_bytes([seed; 32]),
            spend_height: 0,
            unlock_time: 0,
            parent_transaction_hash: Hash::from_bytes([seed; 32]),
            private_ephemeral: Some(SecretKey::from_bytes([seed; 32])),
            spending_transaction_hash: None,
        }
    }

    pub(crate) fn subwallet(seed: u8) -> SubWallet {
        SubWallet::new(
            format!("address-{}", seed),
            PublicKey::from_bytes([seed; 32]),
            Some(SecretKey::from_bytes([seed; 32])),
            0,
            0,
            seed == 0,
        )
    }

    #[test]
    fn duplicate_output_keys_are_rejected() {
        let mut subwallet = subwallet(0);
        subwallet.store_transaction_input(input(1, 100, 10)).unwrap();
        let error = subwallet
            .store_transaction_input(input(1, 100, 10))
            .unwrap_err();
        assert!(matches!(error, WalletError::DuplicateInput(_)));
        assert_eq!(subwallet.unspent_inputs().len(), 1);
    }

    #[test]
    fn returning_change_clears_unconfirmed_amount() {
        let mut subwallet = subwallet(0);
        let change = input(3, 40, 12);
        subwallet.store_unconfirmed_incoming_input(UnconfirmedInput {
            amount: 40,
            key: change.key,
            parent_transaction_hash: change.parent_transaction_hash,
        });
        assert_eq!(subwallet.get_balance(20), (0, 40));

        subwallet.store_transaction_input(change).unwrap();
        assert!(subwallet.unconfirmed_incoming_amounts().is_empty());
        assert_eq!(subwallet.get_balance(20), (40, 0));
    }

    #[test]
    fn lock_then_spend() {
        let mut subwallet = subwallet(0);
        let stored = input(1, 100, 10);
        subwallet.store_transaction_input(stored.clone()).unwrap();

        subwallet
            .mark_input_as_locked(&stored.key_image, Hash::from_bytes([77; 32]))
            .unwrap();
        assert!(subwallet.unspent_inputs().is_empty());
        assert_eq!(subwallet.locked_inputs().len(), 1);

        subwallet.mark_input_as_spent(&stored.key_image, 20).unwrap();
        assert!(subwallet.locked_inputs().is_empty());
        assert_eq!(subwallet.spent_inputs()[0].spend_height, 20);
    }

    #[test]
    fn spending_an_unknown_input_is_an_error() {
        let mut subwallet = subwallet(0);
        let missing = KeyImage::from_bytes([9; 32]);
        assert!(matches!(
            subwallet.mark_input_as_spent(&missing, 5),
            Err(WalletError::InputNotFound(key_image)) if key_image == missing
        ));
        assert!(subwallet
            .mark_input_as_locked(&missing, Hash::null())
            .is_err());
    }

    #[test]
    fn cancelled_transaction_releases_its_inputs() {
        let mut subwallet = subwallet(0);
        let spent_by_cancelled = input(1, 100, 10);
        let spent_by_other = input(2, 50, 10);
        let cancelled = Hash::from_bytes([77; 32]);
        for stored in [&spent_by_cancelled, &spent_by_other] {
            subwallet.store_transaction_input(stored.clone()).unwrap();
        }
        subwallet
            .mark_input_as_locked(&spent_by_cancelled.key_image, cancelled)
            .unwrap();
        subwallet
            .mark_input_as_locked(&spent_by_other.key_image, Hash::from_bytes([78; 32]))
            .unwrap();
        subwallet.store_unconfirmed_incoming_input(UnconfirmedInput {
            amount: 30,
            key: PublicKey::from_bytes([50; 32]),
            parent_transaction_hash: cancelled,
        });

        subwallet.remove_cancelled_transaction(&cancelled);

        assert_eq!(subwallet.unspent_inputs().len(), 1);
        assert_eq!(subwallet.unspent_inputs()[0].key_image, spent_by_cancelled.key_image);
        assert_eq!(subwallet.unspent_inputs()[0].spend_height, 0);
        assert_eq!(subwallet.locked_inputs().len(), 1);
        assert!(subwallet.unconfirmed_incoming_amounts().is_empty());
    }

    #[test]
    fn fork_removes_late_inputs_and_unspends_late_spends() {
        let mut subwallet = subwallet(0);
        let early = input(1, 100, 10);
        let late = input(2, 50, 30);
        let early_spent_late = input(3, 70, 5);
        let early_spent_early = input(4, 20, 5);
        for stored in [&early, &late, &early_spent_late, &early_spent_early] {
            subwallet.store_transaction_input(stored.clone()).unwrap();
        }
        subwallet
            .mark_input_as_spent(&early_spent_late.key_image, 25)
            .unwrap();
        subwallet
            .mark_input_as_spent(&early_spent_early.key_image, 15)
            .unwrap();

        let removed = subwallet.remove_forked_transactions(20);

        assert_eq!(removed, vec![late.key_image]);
        let unspent: Vec<_> = subwallet
            .unspent_inputs()
            .iter()
            .map(|input| (input.key_image, input.spend_height))
            .collect();
        assert!(unspent.contains(&(early.key_image, 0)));
        assert!(unspent.contains(&(early_spent_late.key_image, 0)));
        assert_eq!(subwallet.spent_inputs().len(), 1);
        assert_eq!(subwallet.spent_inputs()[0].key_image, early_spent_early.key_image);
    }

    #[test]
    fn prune_keeps_recent_spends() {
        let mut subwallet = subwallet(0);
        for (seed, spend_height) in [(1, 100), (2, 6000)] {
            let stored = input(seed, 10, 50);
            subwallet.store_transaction_input(stored.clone()).unwrap();
            subwallet
                .mark_input_as_spent(&stored.key_image, spend_height)
                .unwrap();
        }

        let pruned = subwallet.prune_spent_inputs(1000);
        assert_eq!(pruned, vec![KeyImage::from_bytes([1; 32])]);
        assert_eq!(subwallet.spent_inputs().len(), 1);
    }

    #[test]
    fn balance_splits_on_unlock_time() {
        let mut subwallet = subwallet(0);
        let mut locked = input(1, 100, 10);
        locked.unlock_time = 50;
        subwallet.store_transaction_input(locked).unwrap();
        subwallet.store_transaction_input(input(2, 30, 10)).unwrap();

        assert_eq!(subwallet.get_balance(20), (30, 100));
        assert_eq!(subwallet.get_balance(49), (130, 0));
        assert_eq!(subwallet.get_spendable_inputs(20).len(), 1);
    }

    #[test]
    fn timestamp_conversion_only_applies_once() {
        let mut subwallet = SubWallet::new(
            "address".to_string(),
            PublicKey::null(),
            None,
            0,
            1_600_000_000,
            true,
        );
        subwallet.convert_sync_timestamp_to_height(400);
        assert_eq!(subwallet.sync_start_height(), 400);
        assert_eq!(subwallet.sync_start_timestamp(), 0);

        subwallet.convert_sync_timestamp_to_height(900);
        assert_eq!(subwallet.sync_start_height(), 400);
    }

    #[test]
    fn deserializing_checks_invariants() {
        let mut subwallet = subwallet(0);
        subwallet.store_transaction_input(input(1, 100, 10)).unwrap();
        let json = serde_json::to_string(&subwallet).unwrap();
        let restored: SubWallet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, subwallet);

        let mut duplicated = subwallet.clone();
        let mut copy = input(1, 100, 10);
        copy.key = PublicKey::from_bytes([200; 32]);
        duplicated.spent_inputs.push(copy);
        let json = serde_json::to_string(&duplicated).unwrap();
        assert!(serde_json::from_str::<SubWallet>(&json).is_err());

        let mut zero = subwallet;
        zero.unspent_inputs[0].amount = 0;
        let json = serde_json::to_string(&zero).unwrap();
        assert!(serde_json::from_str::<SubWallet>(&json).is_err());
    }
}
