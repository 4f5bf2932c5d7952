//! Module for primitive structs associated with the sync engine

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use getset::{CopyGetters, Getters};
use memuse::DynamicUsage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! hex_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length in bytes
            pub const LEN: usize = $len;

            /// Creates from raw bytes
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// The all zero value, used as a placeholder where no real value exists
            pub fn null() -> Self {
                Self([0u8; $len])
            }

            /// Returns true if every byte is zero
            pub fn is_null(&self) -> bool {
                self.0.iter().all(|byte| *byte == 0)
            }

            /// Parses from a hex string of exactly the right length
            pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(hex_str, &mut bytes)?;
                Ok(Self(bytes))
            }

            /// Lowercase hex encoding
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::null()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let hex_str = String::deserialize(deserializer)?;
                Self::from_hex(&hex_str).map_err(serde::de::Error::custom)
            }
        }

        impl DynamicUsage for $name {
            fn dynamic_usage(&self) -> usize {
                0
            }

            fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
                (0, Some(0))
            }
        }
    };
}

hex_bytes!(
    /// Curve point used for spend, view, transaction and output keys
    PublicKey,
    32
);
hex_bytes!(
    /// Curve scalar used for private spend, view, ephemeral and transaction keys
    SecretKey,
    32
);
hex_bytes!(
    /// Deterministic per-output value that reveals double spends
    KeyImage,
    32
);
hex_bytes!(
    /// Block, transaction and prefix hashes
    Hash,
    32
);
hex_bytes!(
    /// Shared secret between a transaction key and a view key
    KeyDerivation,
    32
);
hex_bytes!(
    /// One element of a ring signature
    Signature,
    64
);

/// An output paying to a one-time public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOutput {
    /// One-time output key
    pub key: PublicKey,
    /// Amount in atomic units
    pub amount: u64,
    /// Position in the network wide list of outputs of this amount, absent when the daemon
    /// was asked to omit global indexes
    pub global_index: Option<u64>,
}

/// A ring input spending one output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    /// Amount in atomic units
    pub amount: u64,
    /// Key image of the real output being spent
    pub key_image: KeyImage,
    /// Relative global indexes of the ring members
    pub output_indexes: Vec<u64>,
}

impl DynamicUsage for KeyInput {
    fn dynamic_usage(&self) -> usize {
        self.output_indexes.dynamic_usage()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        self.output_indexes.dynamic_usage_bounds()
    }
}

/// The miner reward transaction of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCoinbaseTransaction {
    pub key_outputs: Vec<KeyOutput>,
    pub hash: Hash,
    pub transaction_public_key: PublicKey,
    pub unlock_time: u64,
}

impl DynamicUsage for RawCoinbaseTransaction {
    fn dynamic_usage(&self) -> usize {
        self.key_outputs.capacity() * std::mem::size_of::<KeyOutput>()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        let usage = self.dynamic_usage();
        (usage, Some(usage))
    }
}

/// A regular transaction as delivered by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub key_outputs: Vec<KeyOutput>,
    pub hash: Hash,
    pub transaction_public_key: PublicKey,
    pub unlock_time: u64,
    #[serde(default)]
    pub payment_id: String,
    pub key_inputs: Vec<KeyInput>,
}

impl RawTransaction {
    /// Sum of all input amounts, `None` if it does not fit a `u64`
    pub fn input_amount(&self) -> Option<u64> {
        self.key_inputs
            .iter()
            .try_fold(0u64, |sum, input| sum.checked_add(input.amount))
    }

    /// Sum of all output amounts, `None` if it does not fit a `u64`
    pub fn output_amount(&self) -> Option<u64> {
        self.key_outputs
            .iter()
            .try_fold(0u64, |sum, output| sum.checked_add(output.amount))
    }
}

impl DynamicUsage for RawTransaction {
    fn dynamic_usage(&self) -> usize {
        self.key_outputs.capacity() * std::mem::size_of::<KeyOutput>()
            + self.payment_id.capacity()
            + self.key_inputs.capacity() * std::mem::size_of::<KeyInput>()
            + self
                .key_inputs
                .iter()
                .map(DynamicUsage::dynamic_usage)
                .sum::<usize>()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        let usage = self.dynamic_usage();
        (usage, Some(usage))
    }
}

/// A block stripped down to what the wallet needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Absent when the daemon was asked to skip coinbase transactions
    pub coinbase_transaction: Option<RawCoinbaseTransaction>,
    pub transactions: Vec<RawTransaction>,
    pub block_height: u64,
    pub block_hash: Hash,
    pub block_timestamp: u64,
}

impl DynamicUsage for Block {
    fn dynamic_usage(&self) -> usize {
        self.coinbase_transaction.dynamic_usage()
            + self.transactions.capacity() * std::mem::size_of::<RawTransaction>()
            + self
                .transactions
                .iter()
                .map(DynamicUsage::dynamic_usage)
                .sum::<usize>()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        let usage = self.dynamic_usage();
        (usage, Some(usage))
    }
}

/// Height and hash of the daemon's top block, reported when there is nothing left to sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopBlock {
    pub height: u64,
    pub hash: Hash,
}

/// A candidate decoy returned by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomOutput {
    pub global_index: u64,
    pub key: PublicKey,
}

/// An output owned by one of our subwallets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    /// Unique identifier of the input, null for view wallets
    pub key_image: KeyImage,
    pub amount: u64,
    /// Height of the block containing the parent transaction
    pub block_height: u64,
    pub transaction_public_key: PublicKey,
    /// Index of the output within its transaction
    pub transaction_index: u64,
    pub global_output_index: Option<u64>,
    /// One-time output key
    pub key: PublicKey,
    /// 0 while unspent
    pub spend_height: u64,
    pub unlock_time: u64,
    pub parent_transaction_hash: Hash,
    /// Only known to spend wallets
    pub private_ephemeral: Option<SecretKey>,
    /// Hash of our own unconfirmed transaction spending this input, while it is locked
    #[serde(default)]
    pub spending_transaction_hash: Option<Hash>,
}

/// Change we expect back from a transaction we sent that has not been confirmed yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnconfirmedInput {
    pub amount: u64,
    pub key: PublicKey,
    pub parent_transaction_hash: Hash,
}

/// A transaction touching the wallet
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Net amount per public spend key, negative when the subwallet spent funds
    #[getset(get = "pub")]
    transfers: BTreeMap<PublicKey, i64>,
    #[getset(get_copy = "pub")]
    hash: Hash,
    #[getset(get_copy = "pub")]
    fee: u64,
    /// 0 while unconfirmed
    #[getset(get_copy = "pub")]
    block_height: u64,
    #[getset(get_copy = "pub")]
    timestamp: u64,
    #[getset(get = "pub")]
    payment_id: String,
    #[getset(get_copy = "pub")]
    unlock_time: u64,
    #[getset(get_copy = "pub")]
    is_coinbase: bool,
}

impl Transaction {
    /// Creates new Transaction from parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        transfers: BTreeMap<PublicKey, i64>,
        hash: Hash,
        fee: u64,
        block_height: u64,
        timestamp: u64,
        payment_id: String,
        unlock_time: u64,
        is_coinbase: bool,
    ) -> Self {
        Self {
            transfers,
            hash,
            fee,
            block_height,
            timestamp,
            payment_id,
            unlock_time,
            is_coinbase,
        }
    }

    /// Sum of all transfers
    pub fn total_amount(&self) -> i64 {
        self.transfers
            .values()
            .fold(0i64, |sum, amount| sum.saturating_add(*amount))
    }

    /// Zero fee, non coinbase transactions are fusion transactions
    pub fn is_fusion_transaction(&self) -> bool {
        self.fee == 0 && !self.is_coinbase
    }

    /// Removes the transfer of `public_spend_key`, returning true if one existed
    pub fn remove_transfer(&mut self, public_spend_key: &PublicKey) -> bool {
        self.transfers.remove(public_spend_key).is_some()
    }
}

/// Ownership deltas produced by processing a block, ready to be applied to the wallet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionData {
    /// Transactions touching the wallet
    pub transactions_to_add: Vec<Transaction>,
    /// Newly received inputs with the public spend key of the owning subwallet
    pub inputs_to_add: Vec<(PublicKey, TransactionInput)>,
    /// Key images of our inputs spent in this block with the owning public spend key
    pub key_images_to_mark_spent: Vec<(PublicKey, KeyImage)>,
}
