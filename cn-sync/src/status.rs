//! Checkpoint bookkeeping used to locate a common ancestor with the daemon after a fork

use std::collections::VecDeque;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use cnconfig::{BLOCK_HASH_CHECKPOINTS_INTERVAL, LAST_KNOWN_BLOCK_HASHES_SIZE};

use crate::primitives::Hash;

/// Height cursor plus the hashes sent to the daemon so it can find where we are on its chain.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationStatus {
    /// Infrequent checkpoints, newest first
    #[getset(get = "pub")]
    block_hash_checkpoints: VecDeque<Hash>,
    /// The most recently processed block hashes, newest first
    #[getset(get = "pub")]
    last_known_block_hashes: VecDeque<Hash>,
    #[getset(get_copy = "pub")]
    last_known_block_height: u64,
    #[getset(get_copy = "pub")]
    last_saved_checkpoint_at: u64,
}

impl SynchronizationStatus {
    /// Create a status whose last processed block is `start_height`
    pub fn new(start_height: u64) -> Self {
        Self {
            block_hash_checkpoints: VecDeque::new(),
            last_known_block_hashes: VecDeque::new(),
            last_known_block_height: start_height,
            last_saved_checkpoint_at: 0,
        }
    }

    /// Height of the last processed block
    pub fn height(&self) -> u64 {
        self.last_known_block_height
    }

    /// Records a processed block.
    ///
    /// The height always moves to `block_height`, so re-processing a block after a fork rewinds
    /// the cursor. A hash that is already among the recent hashes is not stored twice.
    pub fn store_block_hash(&mut self, block_height: u64, block_hash: Hash) {
        self.last_known_block_height = block_height;

        if self.last_known_block_hashes.contains(&block_hash) {
            return;
        }

        if self.last_saved_checkpoint_at + BLOCK_HASH_CHECKPOINTS_INTERVAL < block_height {
            self.last_saved_checkpoint_at = block_height;
            self.block_hash_checkpoints.push_front(block_hash);
        }

        self.last_known_block_hashes.push_front(block_hash);
        self.last_known_block_hashes
            .truncate(LAST_KNOWN_BLOCK_HASHES_SIZE);
    }

    /// Long interval checkpoints, newest first
    pub fn block_checkpoints(&self) -> Vec<Hash> {
        self.block_hash_checkpoints.iter().copied().collect()
    }

    /// Recently processed hashes, newest first
    pub fn recent_block_hashes(&self) -> Vec<Hash> {
        self.last_known_block_hashes.iter().copied().collect()
    }
}

impl Default for SynchronizationStatus {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u64) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_be_bytes());
        Hash::from_bytes(bytes)
    }

    #[test]
    fn recent_hashes_are_bounded_and_newest_first() {
        let mut status = SynchronizationStatus::new(0);
        for height in 1..=120 {
            status.store_block_hash(height, hash(height));
        }
        let recent = status.recent_block_hashes();
        assert_eq!(recent.len(), LAST_KNOWN_BLOCK_HASHES_SIZE);
        assert_eq!(recent[0], hash(120));
        assert_eq!(recent[LAST_KNOWN_BLOCK_HASHES_SIZE - 1], hash(71));
        assert_eq!(status.height(), 120);
    }

    #[test]
    fn checkpoint_every_interval() {
        let mut status = SynchronizationStatus::new(0);
        for height in 1..=12_000 {
            status.store_block_hash(height, hash(height));
        }
        assert_eq!(status.block_checkpoints(), vec![hash(10_002), hash(5001)]);
    }

    #[test]
    fn duplicate_hash_moves_cursor_only() {
        let mut status = SynchronizationStatus::new(0);
        status.store_block_hash(10, hash(10));
        status.store_block_hash(11, hash(11));
        status.store_block_hash(10, hash(10));
        assert_eq!(status.height(), 10);
        assert_eq!(status.recent_block_hashes(), vec![hash(11), hash(10)]);
    }
}
