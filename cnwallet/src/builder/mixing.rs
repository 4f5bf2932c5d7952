//! Combining our real outputs with decoys into rings

use itertools::Itertools;

use cn_sync::primitives::{KeyImage, PublicKey, RandomOutput, SecretKey};

use crate::error::{ValidationError, WalletError};
use crate::wallet::TxInputAndOwner;

/// One real input with the ring it will be signed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    pub owner: TxInputAndOwner,
    /// Ring members sorted by ascending global index
    pub ring: Vec<RandomOutput>,
    /// Position of the real output inside `ring`
    pub real_index: usize,
    pub private_ephemeral: SecretKey,
}

impl PreparedInput {
    pub fn key_image(&self) -> &KeyImage {
        &self.owner.input.key_image
    }

    pub fn ring_keys(&self) -> Vec<PublicKey> {
        self.ring.iter().map(|member| member.key).collect()
    }

    pub fn absolute_offsets(&self) -> Vec<u64> {
        self.ring.iter().map(|member| member.global_index).collect()
    }
}

/// Mixes a single input with its decoy candidates.
///
/// Candidates sharing the real output's global index, and repeated candidates, are dropped.
/// `mixin` of the remaining candidates join the real output in the ring.
pub fn mix_input(
    input_index: usize,
    owner: TxInputAndOwner,
    decoys: &[RandomOutput],
    mixin: u64,
) -> Result<PreparedInput, WalletError> {
    let private_ephemeral = owner
        .input
        .private_ephemeral
        .ok_or(WalletError::IllegalViewWalletOperation)?;
    let real_global_index = owner
        .input
        .global_output_index
        .ok_or(ValidationError::MissingGlobalIndex { input_index })?;

    let candidates: Vec<RandomOutput> = decoys
        .iter()
        .filter(|decoy| decoy.global_index != real_global_index)
        .unique_by(|decoy| decoy.global_index)
        .copied()
        .collect();

    let required = mixin as usize;
    if candidates.len() < required {
        return Err(WalletError::InsufficientMixinCandidates {
            input_index,
            available: candidates.len(),
            required,
        });
    }

    let mut ring: Vec<RandomOutput> = candidates.into_iter().take(required).collect();
    ring.push(RandomOutput {
        global_index: real_global_index,
        key: owner.input.key,
    });
    ring.sort_by_key(|member| member.global_index);

    let real_index = ring
        .iter()
        .position(|member| member.global_index == real_global_index)
        .unwrap_or_default();

    Ok(PreparedInput {
        owner,
        ring,
        real_index,
        private_ephemeral,
    })
}

/// Mixes every input, then orders them by descending key image
pub fn mix_inputs(
    inputs: Vec<TxInputAndOwner>,
    decoy_sets: &[Vec<RandomOutput>],
    mixin: u64,
) -> Result<Vec<PreparedInput>, WalletError> {
    let mut prepared = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            let decoys = decoy_sets.get(index).map(Vec::as_slice).unwrap_or_default();
            mix_input(index, input, decoys, mixin)
        })
        .collect::<Result<Vec<_>, _>>()?;

    prepared.sort_by(|a, b| b.key_image().cmp(a.key_image()));
    Ok(prepared)
}
