//! The primitive cryptography interface the wallet is built on.
//!
//! A single [`CryptoOracle`] implementation is chosen at startup and passed into every
//! component that needs it. Components that may run with a non-blocking backend use
//! [`AsyncCryptoOracle`], which every [`CryptoOracle`] implements.

use std::future::Future;

use futures::future::ready;

use crate::primitives::{Hash, KeyDerivation, KeyImage, PublicKey, SecretKey, Signature};

/// Errors returned by a crypto backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// A key was not a valid curve point or scalar
    #[error("Invalid key")]
    InvalidKey,
    /// The real output index does not point into the ring
    #[error("Real output index {index} is outside a ring of size {ring_size}")]
    InvalidRealIndex {
        /// Index given
        index: usize,
        /// Size of the ring
        ring_size: usize,
    },
    /// Any other backend failure
    #[error("Crypto backend failure. {0}")]
    Backend(String),
}

/// A public and secret key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    /// Public half
    pub public_key: PublicKey,
    /// Secret half
    pub secret_key: SecretKey,
}

/// Pure, deterministic CryptoNote primitives
pub trait CryptoOracle: Send + Sync {
    /// Shared secret between a transaction public key and a private view key
    fn generate_key_derivation(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError>;

    /// Recovers the public spend key an output was sent to
    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError>;

    /// One-time output key for `public_spend_key`
    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_spend_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError>;

    /// One-time private key for an output sent to the owner of `private_spend_key`
    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_spend_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError>;

    /// Public key of a secret key
    fn secret_key_to_public_key(&self, secret_key: &SecretKey) -> Result<PublicKey, CryptoError>;

    /// Key image of a one-time key pair
    fn generate_key_image(
        &self,
        public_ephemeral: &PublicKey,
        private_ephemeral: &SecretKey,
    ) -> Result<KeyImage, CryptoError>;

    /// Fresh random key pair
    fn generate_keys(&self) -> Result<KeyPair, CryptoError>;

    /// Keccak based hash used for transaction prefixes
    fn cn_fast_hash(&self, data: &[u8]) -> Hash;

    /// Ring signature over `prefix_hash`, one signature per ring member
    fn generate_ring_signatures(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        real_private_key: &SecretKey,
        real_index: usize,
    ) -> Result<Vec<Signature>, CryptoError>;

    /// Verifies a ring signature
    fn check_ring_signatures(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;

    /// Text address for a spend and view key pair
    fn encode_address(
        &self,
        public_spend_key: &PublicKey,
        public_view_key: &PublicKey,
        prefix: u64,
    ) -> String;

    /// Spend and view keys of a text address
    fn decode_address(
        &self,
        address: &str,
        prefix: u64,
    ) -> Result<(PublicKey, PublicKey), CryptoError>;

    /// Key image and private ephemeral of the output at `output_index` of a transaction
    fn generate_key_image_primitive(
        &self,
        public_spend_key: &PublicKey,
        private_spend_key: &SecretKey,
        output_index: u64,
        derivation: &KeyDerivation,
    ) -> Result<(KeyImage, SecretKey), CryptoError> {
        let public_ephemeral = self.derive_public_key(derivation, output_index, public_spend_key)?;
        let private_ephemeral =
            self.derive_secret_key(derivation, output_index, private_spend_key)?;
        let key_image = self.generate_key_image(&public_ephemeral, &private_ephemeral)?;

        Ok((key_image, private_ephemeral))
    }
}

/// Futures based access to the primitives used while building transactions
pub trait AsyncCryptoOracle: Send + Sync {
    /// See [`CryptoOracle::generate_key_derivation`]
    fn generate_key_derivation_async(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> impl Future<Output = Result<KeyDerivation, CryptoError>> + Send;

    /// See [`CryptoOracle::derive_public_key`]
    fn derive_public_key_async(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_spend_key: &PublicKey,
    ) -> impl Future<Output = Result<PublicKey, CryptoError>> + Send;

    /// See [`CryptoOracle::generate_keys`]
    fn generate_keys_async(&self) -> impl Future<Output = Result<KeyPair, CryptoError>> + Send;

    /// See [`CryptoOracle::cn_fast_hash`]
    fn cn_fast_hash_async(&self, data: &[u8]) -> impl Future<Output = Hash> + Send;

    /// See [`CryptoOracle::generate_ring_signatures`]
    fn generate_ring_signatures_async(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        real_private_key: &SecretKey,
        real_index: usize,
    ) -> impl Future<Output = Result<Vec<Signature>, CryptoError>> + Send;

    /// See [`CryptoOracle::check_ring_signatures`]
    fn check_ring_signatures_async(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> impl Future<Output = bool> + Send;
}

impl<T: CryptoOracle> AsyncCryptoOracle for T {
    fn generate_key_derivation_async(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> impl Future<Output = Result<KeyDerivation, CryptoError>> + Send {
        let result = self.generate_key_derivation(transaction_public_key, private_view_key);
        ready(result)
    }

    fn derive_public_key_async(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_spend_key: &PublicKey,
    ) -> impl Future<Output = Result<PublicKey, CryptoError>> + Send {
        let result = self.derive_public_key(derivation, output_index, public_spend_key);
        ready(result)
    }

    fn generate_keys_async(&self) -> impl Future<Output = Result<KeyPair, CryptoError>> + Send {
        let result = self.generate_keys();
        ready(result)
    }

    fn cn_fast_hash_async(&self, data: &[u8]) -> impl Future<Output = Hash> + Send {
        let result = self.cn_fast_hash(data);
        ready(result)
    }

    fn generate_ring_signatures_async(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        real_private_key: &SecretKey,
        real_index: usize,
    ) -> impl Future<Output = Result<Vec<Signature>, CryptoError>> + Send {
        let result = self.generate_ring_signatures(
            prefix_hash,
            key_image,
            ring_keys,
            real_private_key,
            real_index,
        );
        ready(result)
    }

    fn check_ring_signatures_async(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> impl Future<Output = bool> + Send {
        let result = self.check_ring_signatures(prefix_hash, key_image, ring_keys, signatures);
        ready(result)
    }
}
