//! Deterministic stand-ins for the crypto backend, the daemon and the wallet.
//!
//! [`MockOracle`] is self-consistent but offers no security whatsoever: keys are related by
//! xor and hashing. It exists so sync and transaction construction can be tested without a
//! curve implementation.
#![allow(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::client::{Daemon, DaemonError, WalletSyncData};
use crate::crypto::{CryptoError, CryptoOracle, KeyPair};
use crate::primitives::{
    Block, Hash, KeyDerivation, KeyImage, KeyInput, KeyOutput, PublicKey, RandomOutput,
    RawTransaction, SecretKey, Signature, TopBlock,
};
use crate::traits::SyncWallet;

const PUBLIC_KEY_MASK: [u8; 32] = [0x5a; 32];

fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Insecure, deterministic [`CryptoOracle`]
#[derive(Debug, Default)]
pub struct MockOracle {
    key_counter: AtomicU64,
    corrupt_signatures: AtomicBool,
}

impl MockOracle {
    /// Makes every generated ring signature fail verification
    pub fn corrupt_signatures(&self, corrupt: bool) {
        self.corrupt_signatures.store(corrupt, Ordering::SeqCst);
    }

    /// Deterministic key pair for `seed`
    pub fn keys_from_seed(&self, seed: u64) -> KeyPair {
        let secret_key = SecretKey::from_bytes(hash_parts(&[b"seed", &seed.to_le_bytes()]));
        KeyPair {
            public_key: self.public_of(&secret_key),
            secret_key,
        }
    }

    fn public_of(&self, secret_key: &SecretKey) -> PublicKey {
        PublicKey::from_bytes(xor(secret_key.as_bytes(), &PUBLIC_KEY_MASK))
    }

    fn output_scalar(derivation: &KeyDerivation, output_index: u64) -> [u8; 32] {
        hash_parts(&[b"derive", derivation.as_bytes(), &output_index.to_le_bytes()])
    }

    fn signature_for(prefix_hash: &Hash, key_image: &KeyImage, ring_key: &PublicKey) -> Signature {
        let first = hash_parts(&[b"sig-c", prefix_hash.as_bytes(), key_image.as_bytes(), ring_key.as_bytes()]);
        let second = hash_parts(&[b"sig-r", prefix_hash.as_bytes(), key_image.as_bytes(), ring_key.as_bytes()]);
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&first);
        bytes[32..].copy_from_slice(&second);
        Signature::from_bytes(bytes)
    }

    /// A transaction paying `amount` to each `(public_view_key, public_spend_key)` pair
    pub fn payment(
        &self,
        hash: Hash,
        destinations: &[(PublicKey, PublicKey, u64)],
        key_inputs: Vec<KeyInput>,
    ) -> RawTransaction {
        let transaction_keys = self.keys_from_seed(u64::from_le_bytes(
            hash.as_bytes()[..8].try_into().unwrap_or_default(),
        ));
        let key_outputs = destinations
            .iter()
            .enumerate()
            .map(|(index, (public_view_key, public_spend_key, amount))| {
                let derivation = self
                    .generate_key_derivation(public_view_key, &transaction_keys.secret_key)
                    .unwrap();
                KeyOutput {
                    key: self
                        .derive_public_key(&derivation, index as u64, public_spend_key)
                        .unwrap(),
                    amount: *amount,
                    global_index: Some(1000 + index as u64),
                }
            })
            .collect();

        RawTransaction {
            key_outputs,
            hash,
            transaction_public_key: transaction_keys.public_key,
            unlock_time: 0,
            payment_id: String::new(),
            key_inputs,
        }
    }
}

impl CryptoOracle for MockOracle {
    fn generate_key_derivation(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError> {
        let shared = xor(
            &xor(transaction_public_key.as_bytes(), &PUBLIC_KEY_MASK),
            private_view_key.as_bytes(),
        );
        Ok(KeyDerivation::from_bytes(hash_parts(&[b"derivation", &shared])))
    }

    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        Ok(PublicKey::from_bytes(xor(
            output_key.as_bytes(),
            &Self::output_scalar(derivation, output_index),
        )))
    }

    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_spend_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        Ok(PublicKey::from_bytes(xor(
            public_spend_key.as_bytes(),
            &Self::output_scalar(derivation, output_index),
        )))
    }

    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_spend_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError> {
        Ok(SecretKey::from_bytes(xor(
            private_spend_key.as_bytes(),
            &Self::output_scalar(derivation, output_index),
        )))
    }

    fn secret_key_to_public_key(&self, secret_key: &SecretKey) -> Result<PublicKey, CryptoError> {
        Ok(self.public_of(secret_key))
    }

    fn generate_key_image(
        &self,
        public_ephemeral: &PublicKey,
        private_ephemeral: &SecretKey,
    ) -> Result<KeyImage, CryptoError> {
        if self.public_of(private_ephemeral) != *public_ephemeral {
            return Err(CryptoError::InvalidKey);
        }
        Ok(KeyImage::from_bytes(hash_parts(&[
            b"key image",
            private_ephemeral.as_bytes(),
        ])))
    }

    fn generate_keys(&self) -> Result<KeyPair, CryptoError> {
        let counter = self.key_counter.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys_from_seed(u64::MAX - counter))
    }

    fn cn_fast_hash(&self, data: &[u8]) -> Hash {
        Hash::from_bytes(hash_parts(&[data]))
    }

    fn generate_ring_signatures(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        real_private_key: &SecretKey,
        real_index: usize,
    ) -> Result<Vec<Signature>, CryptoError> {
        if real_index >= ring_keys.len() {
            return Err(CryptoError::InvalidRealIndex {
                index: real_index,
                ring_size: ring_keys.len(),
            });
        }
        if self.public_of(real_private_key) != ring_keys[real_index] {
            return Err(CryptoError::InvalidKey);
        }

        let mut signatures: Vec<Signature> = ring_keys
            .iter()
            .map(|ring_key| Self::signature_for(prefix_hash, key_image, ring_key))
            .collect();

        if self.corrupt_signatures.load(Ordering::SeqCst) {
            if let Some(signature) = signatures.first_mut() {
                signature.0[0] ^= 0xff;
            }
        }

        Ok(signatures)
    }

    fn check_ring_signatures(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        ring_keys.len() == signatures.len()
            && ring_keys
                .iter()
                .zip(signatures)
                .all(|(ring_key, signature)| {
                    Self::signature_for(prefix_hash, key_image, ring_key) == *signature
                })
    }

    fn encode_address(
        &self,
        public_spend_key: &PublicKey,
        public_view_key: &PublicKey,
        prefix: u64,
    ) -> String {
        format!("{:x}-{}{}", prefix, public_spend_key, public_view_key)
    }

    fn decode_address(
        &self,
        address: &str,
        prefix: u64,
    ) -> Result<(PublicKey, PublicKey), CryptoError> {
        let (address_prefix, keys) = address
            .split_once('-')
            .ok_or_else(|| CryptoError::Backend("address has no prefix".to_string()))?;
        if address_prefix != format!("{:x}", prefix) || keys.len() != 128 {
            return Err(CryptoError::Backend("address is not valid".to_string()));
        }
        let public_spend_key =
            PublicKey::from_hex(&keys[..64]).map_err(|_| CryptoError::InvalidKey)?;
        let public_view_key =
            PublicKey::from_hex(&keys[64..]).map_err(|_| CryptoError::InvalidKey)?;
        Ok((public_spend_key, public_view_key))
    }
}

/// In memory [`SyncWallet`]
#[derive(Debug, Clone)]
pub struct MockWallet {
    private_view_key: SecretKey,
    public_view_key: PublicKey,
    spend_keys: Vec<(PublicKey, Option<SecretKey>)>,
    key_images: HashMap<KeyImage, PublicKey>,
}

impl MockWallet {
    pub fn new(oracle: &MockOracle, subwallets: u64) -> Self {
        Self::new_with_seed(oracle, subwallets, 0)
    }

    pub fn new_with_seed(oracle: &MockOracle, subwallets: u64, seed: u64) -> Self {
        let view_keys = oracle.keys_from_seed(seed * 1000);
        let spend_keys = (1..=subwallets)
            .map(|n| {
                let keys = oracle.keys_from_seed(seed * 1000 + n);
                (keys.public_key, Some(keys.secret_key))
            })
            .collect();
        Self {
            private_view_key: view_keys.secret_key,
            public_view_key: view_keys.public_key,
            spend_keys,
            key_images: HashMap::new(),
        }
    }

    pub fn into_view_wallet(mut self) -> Self {
        for (_, private_spend_key) in self.spend_keys.iter_mut() {
            *private_spend_key = None;
        }
        self
    }

    pub fn public_view_key(&self) -> PublicKey {
        self.public_view_key
    }

    pub fn public_spend_keys(&self) -> Vec<PublicKey> {
        self.spend_keys.iter().map(|(public, _)| *public).collect()
    }

    pub fn insert_key_image(&mut self, key_image: KeyImage, owner: PublicKey) {
        self.key_images.insert(key_image, owner);
    }
}

impl SyncWallet for MockWallet {
    type Error = String;

    fn get_private_view_key(&self) -> Result<SecretKey, Self::Error> {
        Ok(self.private_view_key)
    }

    fn is_view_wallet(&self) -> Result<bool, Self::Error> {
        Ok(self.spend_keys.iter().all(|(_, private)| private.is_none()))
    }

    fn get_public_spend_keys(&self) -> Result<Vec<PublicKey>, Self::Error> {
        Ok(self.public_spend_keys())
    }

    fn get_private_spend_key(
        &self,
        public_spend_key: &PublicKey,
    ) -> Result<Option<SecretKey>, Self::Error> {
        self.spend_keys
            .iter()
            .find(|(public, _)| public == public_spend_key)
            .map(|(_, private)| *private)
            .ok_or_else(|| format!("unknown public spend key {}", public_spend_key))
    }

    fn get_key_image_owner(&self, key_image: &KeyImage) -> Result<Option<PublicKey>, Self::Error> {
        Ok(self.key_images.get(key_image).copied())
    }
}

/// A sync request as seen by [`MockDaemon`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub block_checkpoints: Vec<Hash>,
    pub start_height: u64,
    pub start_timestamp: u64,
    pub block_count: u64,
    pub skip_coinbase_transactions: bool,
}

/// Scripted in-memory [`Daemon`]
#[derive(Debug, Default)]
pub struct MockDaemon {
    sync_responses: Mutex<VecDeque<Result<WalletSyncData, DaemonError>>>,
    sync_requests: Mutex<Vec<SyncRequest>>,
    sync_gate: Arc<tokio::sync::Mutex<()>>,
    sync_request_count: AtomicUsize,
    global_indexes: Mutex<HashMap<Hash, Vec<u64>>>,
    global_index_requests: Mutex<Vec<(u64, u64)>>,
    unknown_transactions: Mutex<HashSet<Hash>>,
    random_outputs_per_amount: Mutex<Option<u64>>,
    sent_transactions: Mutex<Vec<String>>,
    reject_transactions: AtomicBool,
    local_block_count: AtomicU64,
    network_block_count: AtomicU64,
}

impl MockDaemon {
    pub fn new() -> Self {
        let daemon = Self::default();
        daemon.set_block_counts(u64::MAX / 2, u64::MAX / 2);
        daemon
    }

    /// Queues a response to the next sync request
    pub fn push_sync_response(&self, response: Result<WalletSyncData, DaemonError>) {
        self.sync_responses.lock().unwrap().push_back(response);
    }

    pub fn push_blocks(&self, blocks: Vec<Block>) {
        self.push_sync_response(Ok(WalletSyncData {
            blocks,
            top_block: None,
        }));
    }

    pub fn push_synced(&self, top_block: TopBlock) {
        self.push_sync_response(Ok(WalletSyncData {
            blocks: vec![],
            top_block: Some(top_block),
        }));
    }

    pub fn push_failure(&self) {
        self.push_sync_response(Err(DaemonError::Request("connection refused".to_string())));
    }

    /// Sync requests wait until the returned guard is dropped
    pub async fn hold_sync_requests(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.sync_gate.clone().lock_owned().await
    }

    pub fn sync_requests(&self) -> Vec<SyncRequest> {
        self.sync_requests.lock().unwrap().clone()
    }

    pub fn sync_request_count(&self) -> usize {
        self.sync_request_count.load(Ordering::SeqCst)
    }

    pub fn set_global_indexes(&self, hash: Hash, indexes: Vec<u64>) {
        self.global_indexes.lock().unwrap().insert(hash, indexes);
    }

    pub fn global_index_requests(&self) -> Vec<(u64, u64)> {
        self.global_index_requests.lock().unwrap().clone()
    }

    pub fn set_transaction_unknown(&self, hash: Hash, unknown: bool) {
        let mut unknown_transactions = self.unknown_transactions.lock().unwrap();
        if unknown {
            unknown_transactions.insert(hash);
        } else {
            unknown_transactions.remove(&hash);
        }
    }

    /// Overrides how many decoys are returned per amount
    pub fn set_random_outputs_per_amount(&self, count: Option<u64>) {
        *self.random_outputs_per_amount.lock().unwrap() = count;
    }

    pub fn sent_transactions(&self) -> Vec<String> {
        self.sent_transactions.lock().unwrap().clone()
    }

    pub fn reject_transactions(&self, reject: bool) {
        self.reject_transactions.store(reject, Ordering::SeqCst);
    }

    pub fn set_block_counts(&self, local: u64, network: u64) {
        self.local_block_count.store(local, Ordering::SeqCst);
        self.network_block_count.store(network, Ordering::SeqCst);
    }
}

impl Daemon for MockDaemon {
    fn get_wallet_sync_data(
        &self,
        block_checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
        block_count: u64,
        skip_coinbase_transactions: bool,
    ) -> impl Future<Output = Result<WalletSyncData, DaemonError>> + Send {
        let request = SyncRequest {
            block_checkpoints: block_checkpoints.to_vec(),
            start_height,
            start_timestamp,
            block_count,
            skip_coinbase_transactions,
        };
        async move {
            self.sync_request_count.fetch_add(1, Ordering::SeqCst);
            let _open = self.sync_gate.lock().await;
            self.sync_requests.lock().unwrap().push(request);
            self.sync_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(WalletSyncData::default()))
        }
    }

    fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> impl Future<Output = Result<HashMap<Hash, Vec<u64>>, DaemonError>> + Send {
        async move {
            self.global_index_requests
                .lock()
                .unwrap()
                .push((start_height, end_height));
            Ok(self.global_indexes.lock().unwrap().clone())
        }
    }

    fn get_cancelled_transactions(
        &self,
        transaction_hashes: &[Hash],
    ) -> impl Future<Output = Result<Vec<Hash>, DaemonError>> + Send {
        let unknown = {
            let unknown_transactions = self.unknown_transactions.lock().unwrap();
            transaction_hashes
                .iter()
                .filter(|hash| unknown_transactions.contains(hash))
                .copied()
                .collect()
        };
        async move { Ok(unknown) }
    }

    fn get_random_outputs_by_amount(
        &self,
        amounts: &[u64],
        requested_outputs: u64,
    ) -> impl Future<Output = Result<Vec<(u64, Vec<RandomOutput>)>, DaemonError>> + Send {
        let count = self
            .random_outputs_per_amount
            .lock()
            .unwrap()
            .unwrap_or(requested_outputs);
        let outputs = amounts
            .iter()
            .map(|amount| {
                let decoys = (0..count)
                    .map(|n| RandomOutput {
                        global_index: 10 * n + 5,
                        key: PublicKey::from_bytes(hash_parts(&[
                            b"decoy",
                            &amount.to_le_bytes(),
                            &n.to_le_bytes(),
                        ])),
                    })
                    .collect();
                (*amount, decoys)
            })
            .collect();
        async move { Ok(outputs) }
    }

    fn send_transaction(
        &self,
        raw_transaction: &str,
    ) -> impl Future<Output = Result<(), DaemonError>> + Send {
        let raw_transaction = raw_transaction.to_string();
        async move {
            if self.reject_transactions.load(Ordering::SeqCst) {
                return Err(DaemonError::Rejected("transaction was rejected".to_string()));
            }
            self.sent_transactions.lock().unwrap().push(raw_transaction);
            Ok(())
        }
    }

    fn get_local_daemon_block_count(&self) -> u64 {
        self.local_block_count.load(Ordering::SeqCst)
    }

    fn get_network_block_count(&self) -> u64 {
        self.network_block_count.load(Ordering::SeqCst)
    }
}

/// A block at `height` with a hash derived from the height
pub fn mock_block(height: u64, transactions: Vec<RawTransaction>) -> Block {
    Block {
        coinbase_transaction: None,
        transactions,
        block_height: height,
        block_hash: mock_block_hash(height),
        block_timestamp: 1_600_000_000 + height * 30,
    }
}

pub fn mock_block_hash(height: u64) -> Hash {
    Hash::from_bytes(hash_parts(&[b"block", &height.to_le_bytes()]))
}
