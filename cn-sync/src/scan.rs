//! Ownership scanning of block outputs and conversion of blocks into wallet deltas

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;

use crate::crypto::CryptoOracle;
use crate::error::SyncError;
use crate::primitives::{
    Block, Hash, KeyOutput, PublicKey, RawCoinbaseTransaction, RawTransaction, SecretKey,
    Transaction, TransactionData, TransactionInput,
};
use crate::traits::{wallet_error, SyncWallet};

/// The parts of a coinbase or regular transaction needed to scan its outputs
struct OutputSource<'a> {
    key_outputs: &'a [KeyOutput],
    hash: Hash,
    transaction_public_key: PublicKey,
    unlock_time: u64,
}

impl<'a> From<&'a RawCoinbaseTransaction> for OutputSource<'a> {
    fn from(transaction: &'a RawCoinbaseTransaction) -> Self {
        Self {
            key_outputs: &transaction.key_outputs,
            hash: transaction.hash,
            transaction_public_key: transaction.transaction_public_key,
            unlock_time: transaction.unlock_time,
        }
    }
}

impl<'a> From<&'a RawTransaction> for OutputSource<'a> {
    fn from(transaction: &'a RawTransaction) -> Self {
        Self {
            key_outputs: &transaction.key_outputs,
            hash: transaction.hash,
            transaction_public_key: transaction.transaction_public_key,
            unlock_time: transaction.unlock_time,
        }
    }
}

struct ScanKeys {
    private_view_key: SecretKey,
    public_spend_keys: HashSet<PublicKey>,
}

fn process_transaction_outputs<O, W>(
    oracle: &O,
    wallet: &W,
    keys: &ScanKeys,
    source: &OutputSource,
    block_height: u64,
) -> Result<Vec<(PublicKey, TransactionInput)>, SyncError>
where
    O: CryptoOracle,
    W: SyncWallet,
{
    let derivation =
        match oracle.generate_key_derivation(&source.transaction_public_key, &keys.private_view_key) {
            Ok(derivation) => derivation,
            Err(e) => {
                tracing::debug!(
                    "Skipping outputs of transaction {} with unusable public key. {}",
                    source.hash,
                    e
                );
                return Ok(Vec::new());
            }
        };

    let mut inputs = Vec::new();
    for (output_index, output) in source.key_outputs.iter().enumerate() {
        let output_index = output_index as u64;
        let Ok(derived_spend_key) =
            oracle.underive_public_key(&derivation, output_index, &output.key)
        else {
            continue;
        };

        if !keys.public_spend_keys.contains(&derived_spend_key) {
            continue;
        }

        let (key_image, private_ephemeral) =
            wallet.get_tx_input_key_image(oracle, &derived_spend_key, &derivation, output_index)?;

        inputs.push((
            derived_spend_key,
            TransactionInput {
                key_image,
                amount: output.amount,
                block_height,
                transaction_public_key: source.transaction_public_key,
                transaction_index: output_index,
                global_output_index: output.global_index,
                key: output.key,
                spend_height: 0,
                unlock_time: source.unlock_time,
                parent_transaction_hash: source.hash,
                private_ephemeral,
                spending_transaction_hash: None,
            },
        ));
    }

    Ok(inputs)
}

/// Finds every output of `block` belonging to one of the wallet's subwallets.
///
/// Transactions are scanned in parallel, results keep block order.
pub fn process_block_outputs<O, W>(
    oracle: &O,
    wallet: &W,
    block: &Block,
    scan_coinbase_transactions: bool,
) -> Result<Vec<(PublicKey, TransactionInput)>, SyncError>
where
    O: CryptoOracle,
    W: SyncWallet + Sync,
{
    let keys = ScanKeys {
        private_view_key: wallet.get_private_view_key().map_err(wallet_error)?,
        public_spend_keys: wallet
            .get_public_spend_keys()
            .map_err(wallet_error)?
            .into_iter()
            .collect(),
    };

    let mut sources: Vec<OutputSource> = Vec::with_capacity(block.transactions.len() + 1);
    if scan_coinbase_transactions {
        if let Some(coinbase) = &block.coinbase_transaction {
            sources.push(coinbase.into());
        }
    }
    sources.extend(block.transactions.iter().map(OutputSource::from));

    let inputs = sources
        .par_iter()
        .map(|source| process_transaction_outputs(oracle, wallet, &keys, source, block.block_height))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(inputs.into_iter().flatten().collect())
}

fn amount_overflow(transaction_hash: Hash) -> SyncError {
    SyncError::Serialization(format!(
        "amounts of transaction {} overflow",
        transaction_hash
    ))
}

/// Adds `amount` to the transfer of `public_spend_key`, negated when `spent`
fn apply_transfer(
    transfers: &mut BTreeMap<PublicKey, i64>,
    public_spend_key: PublicKey,
    amount: u64,
    spent: bool,
    transaction_hash: Hash,
) -> Result<(), SyncError> {
    let amount = i64::try_from(amount).map_err(|_| amount_overflow(transaction_hash))?;
    let transfer = transfers.entry(public_spend_key).or_default();
    *transfer = if spent {
        transfer.checked_sub(amount)
    } else {
        transfer.checked_add(amount)
    }
    .ok_or_else(|| amount_overflow(transaction_hash))?;
    Ok(())
}

fn add_received_transfers(
    transfers: &mut BTreeMap<PublicKey, i64>,
    our_inputs: &[(PublicKey, TransactionInput)],
    transaction_hash: Hash,
) -> Result<(), SyncError> {
    for (public_spend_key, input) in our_inputs
        .iter()
        .filter(|(_, input)| input.parent_transaction_hash == transaction_hash)
    {
        apply_transfer(transfers, *public_spend_key, input.amount, false, transaction_hash)?;
    }
    Ok(())
}

fn process_coinbase_transaction(
    block: &Block,
    coinbase: &RawCoinbaseTransaction,
    our_inputs: &[(PublicKey, TransactionInput)],
) -> Result<Option<Transaction>, SyncError> {
    let mut transfers = BTreeMap::new();
    add_received_transfers(&mut transfers, our_inputs, coinbase.hash)?;

    if transfers.is_empty() {
        return Ok(None);
    }

    // coinbase transactions have no fee and can not carry a payment id
    Ok(Some(Transaction::from_parts(
        transfers,
        coinbase.hash,
        0,
        block.block_height,
        block.block_timestamp,
        String::new(),
        coinbase.unlock_time,
        true,
    )))
}

fn process_transaction<W: SyncWallet>(
    wallet: &W,
    block: &Block,
    transaction: &RawTransaction,
    our_inputs: &[(PublicKey, TransactionInput)],
    transaction_data: &mut TransactionData,
) -> Result<(), SyncError> {
    let mut transfers = BTreeMap::new();
    add_received_transfers(&mut transfers, our_inputs, transaction.hash)?;

    let mut spent_key_images = Vec::new();
    for input in &transaction.key_inputs {
        if let Some(owner) = wallet
            .get_key_image_owner(&input.key_image)
            .map_err(wallet_error)?
        {
            apply_transfer(&mut transfers, owner, input.amount, true, transaction.hash)?;
            spent_key_images.push((owner, input.key_image));
        }
    }

    if transfers.is_empty() {
        return Ok(());
    }

    let fee = transaction
        .input_amount()
        .zip(transaction.output_amount())
        .map(|(inputs, outputs)| inputs.saturating_sub(outputs))
        .ok_or_else(|| amount_overflow(transaction.hash))?;

    transaction_data
        .transactions_to_add
        .push(Transaction::from_parts(
            transfers,
            transaction.hash,
            fee,
            block.block_height,
            block.block_timestamp,
            transaction.payment_id.clone(),
            transaction.unlock_time,
            false,
        ));
    transaction_data
        .key_images_to_mark_spent
        .extend(spent_key_images);

    Ok(())
}

/// Builds the wallet deltas for `block` given the outputs found by [`process_block_outputs`].
///
/// Only transactions that pay to or spend from the wallet are recorded.
pub fn process_block<W: SyncWallet>(
    wallet: &W,
    block: &Block,
    our_inputs: Vec<(PublicKey, TransactionInput)>,
    scan_coinbase_transactions: bool,
) -> Result<TransactionData, SyncError> {
    let mut transaction_data = TransactionData::default();

    if scan_coinbase_transactions {
        if let Some(coinbase) = &block.coinbase_transaction {
            if let Some(transaction) = process_coinbase_transaction(block, coinbase, &our_inputs)? {
                transaction_data.transactions_to_add.push(transaction);
            }
        }
    }

    for transaction in &block.transactions {
        process_transaction(wallet, block, transaction, &our_inputs, &mut transaction_data)?;
    }

    transaction_data.inputs_to_add = our_inputs;

    Ok(transaction_data)
}
