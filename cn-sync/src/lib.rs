#![warn(missing_docs)]
//! CryptoNote wallet sync engine
//!
//! Entrypoint: [`crate::sync::WalletSynchronizer`]
//!
//! Blocks are pulled from a [`crate::client::Daemon`], buffered, scanned for outputs owned by a
//! [`crate::traits::SyncWallet`] using a [`crate::crypto::CryptoOracle`], and turned into
//! [`crate::primitives::TransactionData`] for the wallet to apply.

pub mod client;
pub mod crypto;
pub mod error;
#[cfg(any(test, feature = "test-features"))]
pub mod mocks;
#[allow(missing_docs)]
pub mod primitives;
pub mod scan;
pub mod status;
pub mod sync;
pub mod traits;
