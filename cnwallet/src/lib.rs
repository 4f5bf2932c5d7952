#![forbid(unsafe_code)]
//! CryptoNote wallet library.
//!
//! [`wallet::SubWallets`] holds the keys, inputs and transaction history of every subwallet.
//! [`builder::TransactionBuilder`] turns selected inputs and decoys into signed transactions.
//! [`backend::WalletBackend`] ties both to a [`cn_sync::sync::WalletSynchronizer`] and a daemon.

pub mod backend;
pub mod builder;
pub mod error;
pub mod wallet;

pub use cn_sync::crypto::{AsyncCryptoOracle, CryptoOracle};
pub use cnconfig::WalletConfig;
