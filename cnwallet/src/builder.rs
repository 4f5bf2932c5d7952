//! Assembling and signing outgoing transactions.
//!
//! [`TransactionBuilder`] takes already selected inputs, one decoy set per input and the
//! destinations, and produces a [`BuiltTransaction`] ready to be relayed. Building is split into
//! a pure preparation step (validation, mixing, ordering) and the crypto calls, so
//! [`TransactionBuilder::build`] and [`TransactionBuilder::build_async`] share everything but the
//! way the oracle is invoked.

pub mod decomposition;
pub mod mixing;
pub mod validation;
pub mod wire;

use cn_sync::crypto::{AsyncCryptoOracle, CryptoOracle, KeyPair};
use cn_sync::primitives::{Hash, PublicKey, RandomOutput, SecretKey, Signature};
use cnconfig::WalletConfig;

use crate::error::{ValidationError, WalletError};
use crate::wallet::TxInputAndOwner;

use mixing::PreparedInput;
use validation::{checked_sum, validate_payment_id};
use wire::{WireInput, WireOutput};

/// Limits enforced on every transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderLimits {
    pub maximum_output_amount: u64,
    pub maximum_outputs_per_input: usize,
    pub maximum_extra_size: usize,
}

impl BuilderLimits {
    pub fn from_config(config: &WalletConfig) -> Self {
        Self {
            maximum_output_amount: config.maximum_output_amount,
            maximum_outputs_per_input: config.maximum_outputs_per_input,
            maximum_extra_size: config.maximum_extra_size,
        }
    }
}

/// An amount paid to a decoded address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub public_spend_key: PublicKey,
    pub public_view_key: PublicKey,
    pub amount: u64,
}

/// An output of a built transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltOutput {
    pub amount: u64,
    /// One-time output key
    pub key: PublicKey,
    /// Public spend key of the receiver, used to recognise change
    pub public_spend_key: PublicKey,
}

/// A signed transaction and everything the wallet needs to record it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    pub hash: Hash,
    pub prefix_hash: Hash,
    /// Prefix followed by signatures, hex encoded for the daemon
    pub raw_hex: String,
    pub transaction_private_key: SecretKey,
    pub transaction_public_key: PublicKey,
    pub outputs: Vec<BuiltOutput>,
    /// Spent inputs in wire order
    pub inputs: Vec<TxInputAndOwner>,
    pub fee: u64,
    pub unlock_time: u64,
    pub payment_id: String,
    /// Serialized size in bytes
    pub size: usize,
}

/// Collects inputs, decoys and destinations for one transaction
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    limits: BuilderLimits,
    inputs: Vec<TxInputAndOwner>,
    decoy_sets: Vec<Vec<RandomOutput>>,
    destinations: Vec<Destination>,
    mixin: u64,
    fee: u64,
    payment_id: String,
    extra_data: Vec<u8>,
    unlock_time: u64,
}

struct Prepared {
    inputs: Vec<PreparedInput>,
    destinations: Vec<Destination>,
    payment_id: Option<Hash>,
}

impl TransactionBuilder {
    pub fn new(limits: BuilderLimits) -> Self {
        Self {
            limits,
            inputs: Vec::new(),
            decoy_sets: Vec::new(),
            destinations: Vec::new(),
            mixin: 0,
            fee: 0,
            payment_id: String::new(),
            extra_data: Vec::new(),
            unlock_time: 0,
        }
    }

    /// Real inputs and their decoy candidates, `decoy_sets[i]` belonging to `inputs[i]`
    pub fn inputs(
        mut self,
        inputs: Vec<TxInputAndOwner>,
        decoy_sets: Vec<Vec<RandomOutput>>,
    ) -> Self {
        self.inputs = inputs;
        self.decoy_sets = decoy_sets;
        self
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn destinations(mut self, destinations: impl IntoIterator<Item = Destination>) -> Self {
        self.destinations.extend(destinations);
        self
    }

    pub fn mixin(mut self, mixin: u64) -> Self {
        self.mixin = mixin;
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn payment_id(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = payment_id.into();
        self
    }

    pub fn extra_data(mut self, extra_data: Vec<u8>) -> Self {
        self.extra_data = extra_data;
        self
    }

    pub fn unlock_time(mut self, unlock_time: u64) -> Self {
        self.unlock_time = unlock_time;
        self
    }

    /// Checks amounts, decoy sets and sizes, in a fixed order, without touching crypto
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.destinations.is_empty() {
            return Err(ValidationError::NoDestinations);
        }
        for destination in &self.destinations {
            if destination.amount == 0 {
                return Err(ValidationError::NonPositiveOutputAmount);
            }
            if destination.amount > self.limits.maximum_output_amount {
                return Err(ValidationError::OutputAmountTooLarge {
                    amount: destination.amount,
                    maximum: self.limits.maximum_output_amount,
                });
            }
        }
        let outputs = checked_sum(
            self.destinations.iter().map(|destination| destination.amount),
            ValidationError::OutputSumOverflow,
        )?;

        if self.inputs.iter().any(|input| input.input.amount == 0) {
            return Err(ValidationError::NonPositiveInputAmount);
        }
        let inputs = checked_sum(
            self.inputs.iter().map(|input| input.input.amount),
            ValidationError::InputSumOverflow,
        )?;

        if inputs.checked_sub(outputs) != Some(self.fee) {
            return Err(ValidationError::Unbalanced {
                inputs,
                outputs,
                fee: self.fee,
            });
        }

        let no_decoys_needed = self.mixin == 0 && self.decoy_sets.is_empty();
        if !no_decoys_needed {
            if self.decoy_sets.len() != self.inputs.len() {
                return Err(ValidationError::DecoySetCountMismatch {
                    inputs: self.inputs.len(),
                    decoy_sets: self.decoy_sets.len(),
                });
            }
            if let Some(input_index) = self
                .decoy_sets
                .iter()
                .position(|decoys| (decoys.len() as u64) < self.mixin)
            {
                return Err(ValidationError::NotEnoughDecoys { input_index });
            }
        }

        let maximum_outputs = self
            .inputs
            .len()
            .saturating_mul(self.limits.maximum_outputs_per_input);
        if self.destinations.len() > maximum_outputs {
            return Err(ValidationError::TooManyOutputs {
                outputs: self.destinations.len(),
                maximum: maximum_outputs,
            });
        }

        validate_payment_id(&self.payment_id)?;

        let extra_size = self.extra(&PublicKey::null())?.len();
        if extra_size > self.limits.maximum_extra_size {
            return Err(ValidationError::ExtraTooLarge {
                size: extra_size,
                maximum: self.limits.maximum_extra_size,
            });
        }

        Ok(())
    }

    fn parsed_payment_id(&self) -> Result<Option<Hash>, ValidationError> {
        if self.payment_id.is_empty() {
            return Ok(None);
        }
        Hash::from_hex(&self.payment_id)
            .map(Some)
            .map_err(|_| ValidationError::InvalidPaymentId)
    }

    fn extra(&self, transaction_public_key: &PublicKey) -> Result<Vec<u8>, ValidationError> {
        Ok(wire::build_extra(
            transaction_public_key,
            self.parsed_payment_id()?.as_ref(),
            &self.extra_data,
        ))
    }

    fn prepare(&self) -> Result<Prepared, WalletError> {
        self.validate()?;

        let inputs = mixing::mix_inputs(self.inputs.clone(), &self.decoy_sets, self.mixin)?;

        let mut destinations = self.destinations.clone();
        destinations.sort_by_key(|destination| destination.amount);

        Ok(Prepared {
            inputs,
            destinations,
            payment_id: self.parsed_payment_id()?,
        })
    }

    fn serialize_prefix(
        &self,
        prepared: &Prepared,
        transaction_public_key: &PublicKey,
        output_keys: &[PublicKey],
    ) -> Result<Vec<u8>, WalletError> {
        let wire_inputs: Vec<WireInput> = prepared
            .inputs
            .iter()
            .map(|input| WireInput {
                amount: input.owner.input.amount,
                relative_offsets: wire::absolute_to_relative_offsets(&input.absolute_offsets()),
                key_image: *input.key_image(),
            })
            .collect();
        let wire_outputs: Vec<WireOutput> = prepared
            .destinations
            .iter()
            .zip(output_keys)
            .map(|(destination, key)| WireOutput {
                amount: destination.amount,
                key: *key,
            })
            .collect();
        let extra = wire::build_extra(
            transaction_public_key,
            prepared.payment_id.as_ref(),
            &self.extra_data,
        );

        let mut prefix = Vec::new();
        wire::write_prefix(
            &mut prefix,
            self.unlock_time,
            &wire_inputs,
            &wire_outputs,
            &extra,
        )
        .map_err(|e| WalletError::Serialization(e.to_string()))?;
        Ok(prefix)
    }

    fn serialize_raw(prefix: &[u8], signatures: &[Vec<Signature>]) -> Result<Vec<u8>, WalletError> {
        let mut raw = prefix.to_vec();
        wire::write_signatures(&mut raw, signatures)
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        Ok(raw)
    }

    fn finish(
        &self,
        prepared: Prepared,
        transaction_keys: KeyPair,
        output_keys: Vec<PublicKey>,
        prefix_hash: Hash,
        raw: Vec<u8>,
        hash: Hash,
    ) -> BuiltTransaction {
        let outputs = prepared
            .destinations
            .iter()
            .zip(output_keys)
            .map(|(destination, key)| BuiltOutput {
                amount: destination.amount,
                key,
                public_spend_key: destination.public_spend_key,
            })
            .collect();

        BuiltTransaction {
            hash,
            prefix_hash,
            size: raw.len(),
            raw_hex: hex::encode(&raw),
            transaction_private_key: transaction_keys.secret_key,
            transaction_public_key: transaction_keys.public_key,
            outputs,
            inputs: prepared.inputs.into_iter().map(|input| input.owner).collect(),
            fee: self.fee,
            unlock_time: self.unlock_time,
            payment_id: self.payment_id.clone(),
        }
    }

    /// Validates, mixes and signs the transaction.
    ///
    /// Every ring signature is verified before it is accepted. A signature failing
    /// verification aborts the build with [`WalletError::CryptoBackend`].
    pub fn build<O: CryptoOracle>(&self, oracle: &O) -> Result<BuiltTransaction, WalletError> {
        let prepared = self.prepare()?;

        let transaction_keys = oracle.generate_keys()?;
        let mut output_keys = Vec::with_capacity(prepared.destinations.len());
        for (index, destination) in prepared.destinations.iter().enumerate() {
            let derivation = oracle.generate_key_derivation(
                &destination.public_view_key,
                &transaction_keys.secret_key,
            )?;
            output_keys.push(oracle.derive_public_key(
                &derivation,
                index as u64,
                &destination.public_spend_key,
            )?);
        }

        let prefix =
            self.serialize_prefix(&prepared, &transaction_keys.public_key, &output_keys)?;
        let prefix_hash = oracle.cn_fast_hash(&prefix);

        let mut signatures = Vec::with_capacity(prepared.inputs.len());
        for (index, input) in prepared.inputs.iter().enumerate() {
            let ring_keys = input.ring_keys();
            let input_signatures = oracle.generate_ring_signatures(
                &prefix_hash,
                input.key_image(),
                &ring_keys,
                &input.private_ephemeral,
                input.real_index,
            )?;
            if !oracle.check_ring_signatures(
                &prefix_hash,
                input.key_image(),
                &ring_keys,
                &input_signatures,
            ) {
                return Err(signature_check_failed(index));
            }
            signatures.push(input_signatures);
        }

        let raw = Self::serialize_raw(&prefix, &signatures)?;
        let hash = oracle.cn_fast_hash(&raw);

        Ok(self.finish(prepared, transaction_keys, output_keys, prefix_hash, raw, hash))
    }

    /// [`Self::build`] through an [`AsyncCryptoOracle`]
    pub async fn build_async<O: AsyncCryptoOracle>(
        &self,
        oracle: &O,
    ) -> Result<BuiltTransaction, WalletError> {
        let prepared = self.prepare()?;

        let transaction_keys = oracle.generate_keys_async().await?;
        let mut output_keys = Vec::with_capacity(prepared.destinations.len());
        for (index, destination) in prepared.destinations.iter().enumerate() {
            let derivation = oracle
                .generate_key_derivation_async(
                    &destination.public_view_key,
                    &transaction_keys.secret_key,
                )
                .await?;
            output_keys.push(
                oracle
                    .derive_public_key_async(
                        &derivation,
                        index as u64,
                        &destination.public_spend_key,
                    )
                    .await?,
            );
        }

        let prefix =
            self.serialize_prefix(&prepared, &transaction_keys.public_key, &output_keys)?;
        let prefix_hash = oracle.cn_fast_hash_async(&prefix).await;

        let mut signatures = Vec::with_capacity(prepared.inputs.len());
        for (index, input) in prepared.inputs.iter().enumerate() {
            let ring_keys = input.ring_keys();
            let input_signatures = oracle
                .generate_ring_signatures_async(
                    &prefix_hash,
                    input.key_image(),
                    &ring_keys,
                    &input.private_ephemeral,
                    input.real_index,
                )
                .await?;
            if !oracle
                .check_ring_signatures_async(
                    &prefix_hash,
                    input.key_image(),
                    &ring_keys,
                    &input_signatures,
                )
                .await
            {
                return Err(signature_check_failed(index));
            }
            signatures.push(input_signatures);
        }

        let raw = Self::serialize_raw(&prefix, &signatures)?;
        let hash = oracle.cn_fast_hash_async(&raw).await;

        Ok(self.finish(prepared, transaction_keys, output_keys, prefix_hash, raw, hash))
    }
}

fn signature_check_failed(input_index: usize) -> WalletError {
    log::error!("Generated ring signature for input {input_index} failed verification");
    WalletError::CryptoBackend(format!(
        "ring signature for input {input_index} failed verification"
    ))
}
