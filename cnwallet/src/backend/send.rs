//! Building, relaying and recording outgoing transactions

use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;

use cn_sync::client::Daemon;
use cn_sync::crypto::CryptoOracle;
use cn_sync::primitives::{Hash, PublicKey, RandomOutput, Transaction, UnconfirmedInput};
use cnconfig::{FUSION_TX_MIN_INPUT_COUNT, FUSION_TX_MIN_IN_OUT_COUNT_RATIO, MAX_FUSION_TX_SIZE};

use super::{WalletBackend, WalletEvent};
use crate::builder::decomposition::{denomination_count, split_amount_into_denominations};
use crate::builder::validation::{
    validate_destinations, validate_fee, validate_mixin, validate_payment_id,
};
use crate::builder::{BuilderLimits, BuiltTransaction, Destination, TransactionBuilder};
use crate::error::{ValidationError, WalletError};
use crate::wallet::utils::now;
use crate::wallet::TxInputAndOwner;

impl<D, O> WalletBackend<D, O>
where
    D: Daemon + 'static,
    O: CryptoOracle + 'static,
{
    /// Sends `amount` to `address` from any subwallet, with the default mixin and fee
    pub async fn send_transaction_basic(
        &self,
        address: &str,
        amount: u64,
        payment_id: Option<String>,
    ) -> Result<Hash, WalletError> {
        self.send_transaction_advanced(
            vec![(address.to_string(), amount)],
            None,
            None,
            payment_id,
            None,
            None,
        )
        .await
    }

    /// Sends to every `(address, amount)` in `destinations`.
    ///
    /// Inputs are taken from `from_addresses`, or every subwallet, and change goes to
    /// `change_address`, or the primary address. The spent inputs are locked until the
    /// transaction is confirmed or found to be cancelled.
    pub async fn send_transaction_advanced(
        &self,
        destinations: Vec<(String, u64)>,
        mixin: Option<u64>,
        fee: Option<u64>,
        payment_id: Option<String>,
        from_addresses: Option<Vec<String>>,
        change_address: Option<String>,
    ) -> Result<Hash, WalletError> {
        let _sending = self.send_lock.lock().await;
        if self.is_view_wallet().await {
            return Err(WalletError::IllegalViewWalletOperation);
        }

        let daemon = self.daemon().await;
        let mixin = self.checked_mixin(mixin, daemon.get_network_block_count())?;
        let fee = fee.unwrap_or(self.config.minimum_fee);
        validate_fee(fee, self.config.minimum_fee)?;
        let payment_id = payment_id.unwrap_or_default();
        validate_payment_id(&payment_id)?;
        let (decoded, total) = validate_destinations(
            self.oracle.as_ref(),
            &destinations,
            self.config.address_prefix,
        )?;
        let needed = total
            .checked_add(fee)
            .ok_or(ValidationError::OutputSumOverflow)?;

        let wallet_height = self.synchronizer().await.height().await;
        let (inputs, found, change_key, view_key) = {
            let wallet = self.wallet.read().await;
            let from_addresses = match from_addresses {
                Some(from_addresses) => from_addresses,
                None => wallet.addresses(),
            };
            let change_key = match change_address {
                Some(change_address) => wallet.public_spend_key_of(&change_address)?,
                None => wallet
                    .primary_sub_wallet()
                    .map(|sub_wallet| sub_wallet.public_spend_key())
                    .ok_or(WalletError::IllegalViewWalletOperation)?,
            };
            let (inputs, found) =
                wallet.get_transaction_inputs_for_amount(needed, &from_addresses, wallet_height)?;
            (inputs, found, change_key, wallet.public_view_key())
        };

        let maximum_output_amount = self.config.maximum_output_amount;
        let mut outputs: Vec<Destination> = decoded
            .into_iter()
            .flat_map(|(public_spend_key, public_view_key, amount)| {
                split_amount_into_denominations(amount, maximum_output_amount)
                    .into_iter()
                    .map(move |amount| Destination {
                        public_spend_key,
                        public_view_key,
                        amount,
                    })
            })
            .collect();
        let change = found - needed;
        outputs.extend(
            split_amount_into_denominations(change, maximum_output_amount)
                .into_iter()
                .map(|amount| Destination {
                    public_spend_key: change_key,
                    public_view_key: view_key,
                    amount,
                }),
        );
        log::debug!(
            "Sending {} with fee {} from {} inputs, change {}",
            total,
            fee,
            inputs.len(),
            change
        );

        let decoys = self.fetch_decoys(&inputs, mixin).await?;
        let decoy_sets = decoy_sets_for(&inputs, &decoys, mixin);
        let built = TransactionBuilder::new(BuilderLimits::from_config(&self.config))
            .inputs(inputs, decoy_sets)
            .destinations(outputs)
            .mixin(mixin)
            .fee(fee)
            .payment_id(payment_id)
            .build_async(self.oracle.as_ref())
            .await?;

        daemon.send_transaction(&built.raw_hex).await?;
        log::info!("Relayed transaction {}", built.hash);

        Ok(self.finish_send(&built, false).await)
    }

    /// Sends a fusion transaction from every subwallet back to the primary address
    pub async fn send_fusion_transaction_basic(&self) -> Result<Hash, WalletError> {
        self.send_fusion_transaction_advanced(None, None, None)
            .await
    }

    /// Merges many small inputs of `from_addresses` into a few larger outputs paid to
    /// `destination`, which must belong to the wallet. Fusion transactions pay no fee.
    ///
    /// Fails with [`WalletError::FullyOptimized`] when too few inputs of a similar size exist.
    pub async fn send_fusion_transaction_advanced(
        &self,
        mixin: Option<u64>,
        from_addresses: Option<Vec<String>>,
        destination: Option<String>,
    ) -> Result<Hash, WalletError> {
        let _sending = self.send_lock.lock().await;
        if self.is_view_wallet().await {
            return Err(WalletError::IllegalViewWalletOperation);
        }

        let daemon = self.daemon().await;
        let mixin = self.checked_mixin(mixin, daemon.get_network_block_count())?;

        let wallet_height = self.synchronizer().await.height().await;
        let (mut inputs, destination_key, view_key) = {
            let wallet = self.wallet.read().await;
            let from_addresses = match from_addresses {
                Some(from_addresses) => from_addresses,
                None => wallet.addresses(),
            };
            let destination_key = match destination {
                Some(destination) => wallet.public_spend_key_of(&destination)?,
                None => wallet
                    .primary_sub_wallet()
                    .map(|sub_wallet| sub_wallet.public_spend_key())
                    .ok_or(WalletError::IllegalViewWalletOperation)?,
            };
            let (inputs, _) =
                wallet.get_fusion_transaction_inputs(&from_addresses, mixin, wallet_height)?;
            (inputs, destination_key, wallet.public_view_key())
        };

        if inputs.len() < FUSION_TX_MIN_INPUT_COUNT {
            return Err(WalletError::FullyOptimized);
        }

        let decoys = self.fetch_decoys(&inputs, mixin).await?;
        let limits = BuilderLimits::from_config(&self.config);

        let built = loop {
            if inputs.len() < FUSION_TX_MIN_INPUT_COUNT {
                return Err(WalletError::FullyOptimized);
            }

            let Some(total) = inputs
                .iter()
                .try_fold(0u64, |sum, input| sum.checked_add(input.input.amount))
            else {
                inputs.pop();
                continue;
            };
            let output_count = denomination_count(total, limits.maximum_output_amount);
            if (inputs.len() as u64)
                < output_count.saturating_mul(FUSION_TX_MIN_IN_OUT_COUNT_RATIO as u64)
            {
                inputs.pop();
                continue;
            }
            let amounts = split_amount_into_denominations(total, limits.maximum_output_amount);

            let decoy_sets = decoy_sets_for(&inputs, &decoys, mixin);
            let built = TransactionBuilder::new(limits)
                .inputs(inputs.clone(), decoy_sets)
                .destinations(amounts.into_iter().map(|amount| Destination {
                    public_spend_key: destination_key,
                    public_view_key: view_key,
                    amount,
                }))
                .mixin(mixin)
                .fee(0)
                .build_async(self.oracle.as_ref())
                .await?;

            if built.size > MAX_FUSION_TX_SIZE {
                log::debug!(
                    "Fusion transaction of {} inputs is {} bytes, dropping an input",
                    inputs.len(),
                    built.size
                );
                inputs.pop();
                continue;
            }
            break built;
        };

        daemon.send_transaction(&built.raw_hex).await?;
        log::info!(
            "Relayed fusion transaction {} merging {} inputs",
            built.hash,
            built.inputs.len()
        );

        Ok(self.finish_send(&built, true).await)
    }

    /// Sends fusion transactions until the wallet is fully optimized.
    ///
    /// Returns how many were sent and their hashes.
    pub async fn optimize(&self) -> (usize, Vec<Hash>) {
        let mut hashes = Vec::new();
        loop {
            match self.send_fusion_transaction_basic().await {
                Ok(hash) => hashes.push(hash),
                Err(WalletError::FullyOptimized) => break,
                Err(e) => {
                    log::warn!("Stopped optimizing. {}", e);
                    break;
                }
            }
        }
        (hashes.len(), hashes)
    }

    fn checked_mixin(&self, mixin: Option<u64>, network_height: u64) -> Result<u64, WalletError> {
        let mixin =
            mixin.unwrap_or_else(|| self.config.mixin_limits.default_mixin_at(network_height));
        validate_mixin(mixin, network_height, &self.config.mixin_limits)?;
        Ok(mixin)
    }

    /// Decoy candidates per input amount, one more than `mixin` so our own output can be
    /// filtered out
    async fn fetch_decoys(
        &self,
        inputs: &[TxInputAndOwner],
        mixin: u64,
    ) -> Result<HashMap<u64, Vec<RandomOutput>>, WalletError> {
        if mixin == 0 {
            return Ok(HashMap::new());
        }
        let amounts: Vec<u64> = inputs
            .iter()
            .map(|input| input.input.amount)
            .unique()
            .collect();
        let decoys = self
            .daemon()
            .await
            .get_random_outputs_by_amount(&amounts, mixin + 1)
            .await?;
        Ok(decoys.into_iter().collect())
    }

    /// Records a transaction the daemon accepted and returns its hash.
    ///
    /// The transaction is on the network at this point, so a failure to record it is logged
    /// instead of returned. Inputs that could not be locked stay unspent until the transaction
    /// confirms and marks them spent.
    async fn finish_send(&self, built: &BuiltTransaction, fusion: bool) -> Hash {
        match self.record_sent_transaction(built).await {
            Ok(transaction) if fusion => {
                self.emit(WalletEvent::CreatedFusionTransaction(transaction))
            }
            Ok(transaction) => self.emit(WalletEvent::CreatedTransaction(transaction)),
            Err(e) => log::error!(
                "Relayed transaction {} but could not record it. {}",
                built.hash,
                e
            ),
        }
        built.hash
    }

    /// Locks the spent inputs and stores the transaction as unconfirmed. Outputs paying one of
    /// our subwallets are expected back as incoming inputs.
    async fn record_sent_transaction(
        &self,
        built: &BuiltTransaction,
    ) -> Result<Transaction, WalletError> {
        let mut wallet = self.wallet.write().await;
        let mut transfers: BTreeMap<PublicKey, i64> = BTreeMap::new();

        for input in &built.inputs {
            wallet.mark_input_as_locked(
                &input.public_spend_key,
                &input.input.key_image,
                built.hash,
            )?;
            let transfer = transfers.entry(input.public_spend_key).or_default();
            *transfer = transfer.saturating_sub(signed(input.input.amount));
        }

        let ours: HashSet<PublicKey> = wallet.public_spend_keys().iter().copied().collect();
        for output in built
            .outputs
            .iter()
            .filter(|output| ours.contains(&output.public_spend_key))
        {
            let transfer = transfers.entry(output.public_spend_key).or_default();
            *transfer = transfer.saturating_add(signed(output.amount));
            wallet.store_unconfirmed_incoming_input(
                &output.public_spend_key,
                UnconfirmedInput {
                    amount: output.amount,
                    key: output.key,
                    parent_transaction_hash: built.hash,
                },
            )?;
        }

        let transaction = Transaction::from_parts(
            transfers,
            built.hash,
            built.fee,
            0,
            now(),
            built.payment_id.clone(),
            built.unlock_time,
            false,
        );
        wallet.add_unconfirmed_transaction(transaction.clone());
        wallet.store_tx_private_key(built.hash, built.transaction_private_key);
        Ok(transaction)
    }
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

/// One decoy set per input. An amount the daemon returned nothing for gets an empty set, which
/// the builder rejects.
fn decoy_sets_for(
    inputs: &[TxInputAndOwner],
    decoys: &HashMap<u64, Vec<RandomOutput>>,
    mixin: u64,
) -> Vec<Vec<RandomOutput>> {
    if mixin == 0 {
        return Vec::new();
    }
    inputs
        .iter()
        .map(|input| decoys.get(&input.input.amount).cloned().unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cn_sync::mocks::{mock_block, MockDaemon, MockOracle};

    use super::*;
    use crate::backend::tests::{backend, config, TestBackend};

    /// A backend holding one confirmed input of each amount
    async fn funded(
        daemon: &Arc<MockDaemon>,
        oracle: &Arc<MockOracle>,
        amounts: &[u64],
    ) -> TestBackend {
        let backend = backend(daemon, oracle);
        let view = oracle.keys_from_seed(2).public_key;
        let spend = oracle.keys_from_seed(1).public_key;
        let destinations: Vec<_> = amounts.iter().map(|amount| (view, spend, *amount)).collect();
        daemon.push_blocks(vec![mock_block(
            1,
            vec![oracle.payment(Hash::from_bytes([7; 32]), &destinations, vec![])],
        )]);
        backend.sync().await.unwrap();
        backend
    }

    fn stranger(oracle: &MockOracle) -> String {
        oracle.encode_address(
            &oracle.keys_from_seed(5).public_key,
            &oracle.keys_from_seed(6).public_key,
            config().address_prefix,
        )
    }

    #[tokio::test]
    async fn sent_transactions_lock_inputs_and_return_change() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let mut backend = funded(&daemon, &oracle, &[5000]).await;
        let mut events = backend.subscribe();

        let hash = backend
            .send_transaction_basic(&stranger(&oracle), 1000, None)
            .await
            .unwrap();

        assert_eq!(daemon.sent_transactions().len(), 1);
        assert_eq!(backend.get_balance(None).await.unwrap(), (0, 3990));

        let transaction = backend.get_transaction(&hash).await.unwrap();
        assert_eq!(transaction.block_height(), 0);
        assert_eq!(transaction.fee(), 10);
        assert_eq!(transaction.total_amount(), -1010);
        assert!(matches!(
            events.try_recv(),
            Ok(WalletEvent::CreatedTransaction(created)) if created.hash() == hash
        ));

        let wallet = backend.wallet.read().await;
        let primary = wallet.public_spend_keys()[0];
        let sub_wallet = wallet.sub_wallet(&primary).unwrap();
        assert!(sub_wallet.unspent_inputs().is_empty());
        assert_eq!(
            sub_wallet.locked_inputs()[0].spending_transaction_hash,
            Some(hash)
        );
        assert_eq!(sub_wallet.get_unconfirmed_change(), 3990);
        assert!(wallet.transaction_private_keys().contains_key(&hash));
        assert_eq!(wallet.locked_transaction_hashes(), vec![hash]);
    }

    #[tokio::test]
    async fn unconfirmed_transactions_are_listed_first() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let backend = funded(&daemon, &oracle, &[5000]).await;

        let hash = backend
            .send_transaction_basic(&stranger(&oracle), 1000, None)
            .await
            .unwrap();

        let transactions = backend.get_transactions(0, None, true, None).await.unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].hash(), hash);
        assert_eq!(backend.get_num_transactions(None).await.unwrap(), 2);
        assert_eq!(
            backend.get_transactions(1, Some(5), true, None).await.unwrap()[0].hash(),
            Hash::from_bytes([7; 32])
        );
    }

    #[tokio::test]
    async fn rejected_transactions_leave_the_wallet_untouched() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let backend = funded(&daemon, &oracle, &[5000]).await;
        daemon.reject_transactions(true);

        assert!(matches!(
            backend
                .send_transaction_basic(&stranger(&oracle), 1000, None)
                .await,
            Err(WalletError::Daemon(_))
        ));
        assert_eq!(backend.get_balance(None).await.unwrap(), (5000, 0));
        assert!(backend.wallet.read().await.locked_transactions().is_empty());
    }

    #[tokio::test]
    async fn send_arguments_are_validated() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let backend = funded(&daemon, &oracle, &[5000]).await;
        let to = stranger(&oracle);

        assert!(matches!(
            backend
                .send_transaction_advanced(vec![(to.clone(), 100)], Some(8), None, None, None, None)
                .await,
            Err(WalletError::Validation(ValidationError::MixinOutOfRange { .. }))
        ));
        assert!(matches!(
            backend
                .send_transaction_advanced(vec![(to.clone(), 100)], None, Some(9), None, None, None)
                .await,
            Err(WalletError::Validation(ValidationError::FeeTooSmall { .. }))
        ));
        assert!(matches!(
            backend
                .send_transaction_basic(&to, 100, Some("beef".to_string()))
                .await,
            Err(WalletError::Validation(ValidationError::InvalidPaymentId))
        ));
        assert!(matches!(
            backend.send_transaction_basic("nonsense", 100, None).await,
            Err(WalletError::Validation(ValidationError::InvalidAddress(_)))
        ));
        assert!(matches!(
            backend.send_transaction_basic(&to, 4991, None).await,
            Err(WalletError::NotEnoughFunds {
                needed: 5001,
                found: 5000
            })
        ));
        assert!(matches!(
            backend
                .send_transaction_advanced(
                    vec![(to.clone(), 100)],
                    None,
                    None,
                    None,
                    Some(vec!["elsewhere".to_string()]),
                    None
                )
                .await,
            Err(WalletError::AddressNotInWallet(_))
        ));
        assert!(daemon.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn missing_decoys_fail_the_send() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let backend = funded(&daemon, &oracle, &[5000]).await;
        daemon.set_random_outputs_per_amount(Some(1));

        assert!(matches!(
            backend
                .send_transaction_advanced(
                    vec![(stranger(&oracle), 100)],
                    Some(3),
                    None,
                    None,
                    None,
                    None
                )
                .await,
            Err(WalletError::Validation(ValidationError::NotEnoughDecoys { .. }))
        ));
        assert_eq!(backend.get_balance(None).await.unwrap(), (5000, 0));
    }

    #[tokio::test]
    async fn view_wallets_can_not_send() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let view = oracle.keys_from_seed(2);
        let address = oracle.encode_address(
            &oracle.keys_from_seed(1).public_key,
            &view.public_key,
            config().address_prefix,
        );
        let backend = TestBackend::import_view_wallet(
            config(),
            daemon,
            oracle.clone(),
            view.secret_key,
            &address,
            0,
        )
        .unwrap();

        assert!(matches!(
            backend
                .send_transaction_basic(&stranger(&oracle), 100, None)
                .await,
            Err(WalletError::IllegalViewWalletOperation)
        ));
        assert!(matches!(
            backend.send_fusion_transaction_basic().await,
            Err(WalletError::IllegalViewWalletOperation)
        ));
    }

    #[tokio::test]
    async fn fusion_merges_small_inputs() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let mut backend = funded(&daemon, &oracle, &[100; 12]).await;
        let mut events = backend.subscribe();

        let hash = backend.send_fusion_transaction_basic().await.unwrap();

        let transaction = backend.get_transaction(&hash).await.unwrap();
        assert_eq!(transaction.fee(), 0);
        assert_eq!(transaction.total_amount(), 0);
        assert!(transaction.is_fusion_transaction());
        assert!(matches!(
            events.try_recv(),
            Ok(WalletEvent::CreatedFusionTransaction(_))
        ));
        assert_eq!(backend.get_balance(None).await.unwrap(), (0, 1200));
        assert!(backend
            .get_transactions(0, None, false, None)
            .await
            .unwrap()
            .iter()
            .all(|transaction| transaction.hash() != hash));
    }

    #[tokio::test]
    async fn few_inputs_are_fully_optimized() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let backend = funded(&daemon, &oracle, &[100; 11]).await;

        assert!(matches!(
            backend.send_fusion_transaction_basic().await,
            Err(WalletError::FullyOptimized)
        ));
        assert_eq!(backend.optimize().await, (0, vec![]));
    }

    #[tokio::test]
    async fn optimize_sends_until_nothing_is_left() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let amounts: Vec<u64> = [[100; 12], [10; 12]].concat();
        let backend = funded(&daemon, &oracle, &amounts).await;

        let (count, hashes) = backend.optimize().await;

        assert_eq!(count, 2);
        assert_eq!(hashes.len(), 2);
        assert_eq!(daemon.sent_transactions().len(), 2);
        let wallet = backend.wallet.read().await;
        let primary = wallet.public_spend_keys()[0];
        assert!(wallet.sub_wallet(&primary).unwrap().unspent_inputs().is_empty());
    }

    #[tokio::test]
    async fn fusion_of_inputs_too_large_to_add_up_is_fully_optimized() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let backend = backend(&daemon, &oracle);
        let view = oracle.keys_from_seed(2).public_key;
        let spend = oracle.keys_from_seed(1).public_key;
        let payments = (0..12u8)
            .map(|n| {
                oracle.payment(
                    Hash::from_bytes([n + 10; 32]),
                    &[(view, spend, 2_000_000_000_000_000_000)],
                    vec![],
                )
            })
            .collect();
        daemon.push_blocks(vec![mock_block(1, payments)]);
        backend.sync().await.unwrap();

        assert!(matches!(
            backend.send_fusion_transaction_basic().await,
            Err(WalletError::FullyOptimized)
        ));
        assert_eq!(backend.optimize().await, (0, vec![]));
        assert!(daemon.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn relayed_transactions_that_can_not_be_recorded_still_return_their_hash() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let mut backend = funded(&daemon, &oracle, &[5000]).await;
        let mut events = backend.subscribe();

        let input = {
            let wallet = backend.wallet.read().await;
            let primary = wallet.public_spend_keys()[0];
            wallet.sub_wallet(&primary).unwrap().unspent_inputs()[0].clone()
        };
        let hash = Hash::from_bytes([0xaa; 32]);
        let built = BuiltTransaction {
            hash,
            prefix_hash: Hash::from_bytes([0xab; 32]),
            raw_hex: String::new(),
            transaction_private_key: oracle.keys_from_seed(30).secret_key,
            transaction_public_key: oracle.keys_from_seed(30).public_key,
            outputs: vec![],
            inputs: vec![TxInputAndOwner {
                input,
                public_spend_key: oracle.keys_from_seed(5).public_key,
                private_spend_key: None,
            }],
            fee: 10,
            unlock_time: 0,
            payment_id: String::new(),
            size: 0,
        };

        assert_eq!(backend.finish_send(&built, false).await, hash);
        assert!(events.try_recv().is_err());
        assert!(backend.get_transaction(&hash).await.is_none());
        assert_eq!(backend.get_balance(None).await.unwrap(), (5000, 0));
    }
}
