//! Traits for interfacing a wallet with the sync engine

use std::fmt::Debug;

use crate::crypto::CryptoOracle;
use crate::error::SyncError;
use crate::primitives::{KeyDerivation, KeyImage, PublicKey, SecretKey};

/// Read access to the wallet data the sync engine needs to recognise owned outputs and spends
pub trait SyncWallet {
    /// Errors associated with interfacing the sync engine with wallet data
    type Error: Debug;

    /// Returns the private view key shared by every subwallet
    fn get_private_view_key(&self) -> Result<SecretKey, Self::Error>;

    /// Returns true if the wallet holds no private spend keys
    fn is_view_wallet(&self) -> Result<bool, Self::Error>;

    /// Returns the public spend keys of every subwallet
    fn get_public_spend_keys(&self) -> Result<Vec<PublicKey>, Self::Error>;

    /// Returns the private spend key of the subwallet owning `public_spend_key`, `None` for
    /// view wallets
    fn get_private_spend_key(
        &self,
        public_spend_key: &PublicKey,
    ) -> Result<Option<SecretKey>, Self::Error>;

    /// Returns the public spend key of the subwallet owning `key_image`, if any
    fn get_key_image_owner(&self, key_image: &KeyImage) -> Result<Option<PublicKey>, Self::Error>;

    /// Key image and private ephemeral for an output received by `public_spend_key`.
    ///
    /// View wallets can not compute key images and get a null key image instead.
    fn get_tx_input_key_image<O: CryptoOracle>(
        &self,
        oracle: &O,
        public_spend_key: &PublicKey,
        derivation: &KeyDerivation,
        output_index: u64,
    ) -> Result<(KeyImage, Option<SecretKey>), SyncError> {
        match self
            .get_private_spend_key(public_spend_key)
            .map_err(wallet_error)?
        {
            Some(private_spend_key) => {
                let (key_image, private_ephemeral) = oracle.generate_key_image_primitive(
                    public_spend_key,
                    &private_spend_key,
                    output_index,
                    derivation,
                )?;
                Ok((key_image, Some(private_ephemeral)))
            }
            None => Ok((KeyImage::null(), None)),
        }
    }
}

/// Converts a wallet error into a [`SyncError`]
pub fn wallet_error<E: Debug>(error: E) -> SyncError {
    SyncError::Wallet(format!("{:?}", error))
}
