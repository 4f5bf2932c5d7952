//! Top level error module for the crate

use crate::client::DaemonError;
use crate::crypto::CryptoError;

/// Top level error enum encapsulating any error that may occur during sync
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Errors associated with the daemon connection
    #[error("Daemon error. {0}")]
    Daemon(#[from] DaemonError),
    /// Errors returned by the crypto backend
    #[error("Crypto error. {0}")]
    Crypto(#[from] CryptoError),
    /// The wallet failed to provide data to the sync engine
    #[error("Wallet error. {0}")]
    Wallet(String),
    /// Block or transaction data from the daemon could not be used
    #[error("Serialization error. {0}")]
    Serialization(String),
}
