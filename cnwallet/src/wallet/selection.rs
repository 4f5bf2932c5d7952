//! Input selection for regular and fusion transactions

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use cnconfig::{FUSION_TX_MIN_INPUT_COUNT, MAX_FUSION_TX_SIZE};

use crate::error::WalletError;
use crate::wallet::subwallet::TxInputAndOwner;
use crate::wallet::utils::digit_count;
use crate::wallet::SubWallets;

/// Serialized size of one ring input with `mixin` decoys
pub fn fusion_input_size(mixin: u64) -> usize {
    1 + 8 + 32 + 64 + 1 + 4 + mixin as usize * (4 + 64)
}

/// Most inputs a fusion transaction with `mixin` decoys per input may take
pub fn max_fusion_inputs(mixin: u64) -> usize {
    MAX_FUSION_TX_SIZE / fusion_input_size(mixin)
}

impl SubWallets {
    fn spendable_inputs(
        &self,
        from_addresses: &[String],
        current_height: u64,
    ) -> Result<Vec<TxInputAndOwner>, WalletError> {
        let mut available = Vec::new();
        for public_spend_key in self.public_spend_keys_of(Some(from_addresses))? {
            let sub_wallet = self
                .sub_wallet(&public_spend_key)
                .ok_or(WalletError::SubWalletNotFound(public_spend_key))?;
            available.extend(sub_wallet.get_spendable_inputs(current_height));
        }
        Ok(available)
    }

    /// Randomly picks unlocked inputs of `from_addresses` until they cover `amount`.
    ///
    /// Returns the inputs sorted by ascending amount and their sum.
    pub fn get_transaction_inputs_for_amount(
        &self,
        amount: u64,
        from_addresses: &[String],
        current_height: u64,
    ) -> Result<(Vec<TxInputAndOwner>, u64), WalletError> {
        self.get_transaction_inputs_for_amount_with_rng(
            amount,
            from_addresses,
            current_height,
            &mut rand::thread_rng(),
        )
    }

    pub fn get_transaction_inputs_for_amount_with_rng<R: Rng + ?Sized>(
        &self,
        amount: u64,
        from_addresses: &[String],
        current_height: u64,
        rng: &mut R,
    ) -> Result<(Vec<TxInputAndOwner>, u64), WalletError> {
        let mut available = self.spendable_inputs(from_addresses, current_height)?;
        available.shuffle(rng);

        let mut found: u64 = 0;
        let mut selected = Vec::new();
        for input in available {
            found = found.saturating_add(input.input.amount);
            selected.push(input);
            if found >= amount {
                selected.sort_by_key(|input| input.input.amount);
                return Ok((selected, found));
            }
        }

        Err(WalletError::NotEnoughFunds {
            needed: amount,
            found,
        })
    }

    /// Picks inputs of the same order of magnitude for a fusion transaction.
    ///
    /// Inputs are bucketed by their number of decimal digits. One bucket holding at least
    /// [`FUSION_TX_MIN_INPUT_COUNT`] inputs is chosen at random, or every bucket when none is
    /// that full. At most [`max_fusion_inputs`] inputs are returned, with their sum.
    pub fn get_fusion_transaction_inputs(
        &self,
        from_addresses: &[String],
        mixin: u64,
        current_height: u64,
    ) -> Result<(Vec<TxInputAndOwner>, u64), WalletError> {
        self.get_fusion_transaction_inputs_with_rng(
            from_addresses,
            mixin,
            current_height,
            &mut rand::thread_rng(),
        )
    }

    pub fn get_fusion_transaction_inputs_with_rng<R: Rng + ?Sized>(
        &self,
        from_addresses: &[String],
        mixin: u64,
        current_height: u64,
        rng: &mut R,
    ) -> Result<(Vec<TxInputAndOwner>, u64), WalletError> {
        let mut available = self.spendable_inputs(from_addresses, current_height)?;
        available.shuffle(rng);

        let mut buckets: BTreeMap<u32, Vec<TxInputAndOwner>> = BTreeMap::new();
        for input in available {
            buckets
                .entry(digit_count(input.input.amount))
                .or_default()
                .push(input);
        }

        let (mut full_buckets, other_buckets): (Vec<_>, Vec<_>) = buckets
            .into_values()
            .partition(|bucket| bucket.len() >= FUSION_TX_MIN_INPUT_COUNT);
        full_buckets.shuffle(rng);

        let buckets_to_take_from = match full_buckets.into_iter().next() {
            Some(full_bucket) => vec![full_bucket],
            None => other_buckets,
        };

        let max_inputs = max_fusion_inputs(mixin);
        let selected: Vec<TxInputAndOwner> = buckets_to_take_from
            .into_iter()
            .flatten()
            .take(max_inputs)
            .collect();
        let found = selected
            .iter()
            .fold(0u64, |sum, input| sum.saturating_add(input.input.amount));

        Ok((selected, found))
    }
}
