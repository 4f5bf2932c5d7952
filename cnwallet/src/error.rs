//! Errors for the wallet, the transaction builder and the backend

use cn_sync::client::DaemonError;
use cn_sync::crypto::CryptoError;
use cn_sync::error::SyncError;
use cn_sync::primitives::{KeyImage, PublicKey};

/// Malformed requests, rejected before any daemon or crypto work is done
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Output amounts must be greater than zero")]
    NonPositiveOutputAmount,
    #[error("Output amount {amount} is above the maximum of {maximum}")]
    OutputAmountTooLarge { amount: u64, maximum: u64 },
    #[error("Sum of output amounts overflows")]
    OutputSumOverflow,
    #[error("Input amounts must be greater than zero")]
    NonPositiveInputAmount,
    #[error("Sum of input amounts overflows")]
    InputSumOverflow,
    #[error("Inputs of {inputs} do not pay outputs of {outputs} plus a fee of {fee}")]
    Unbalanced { inputs: u64, outputs: u64, fee: u64 },
    #[error("Expected one decoy set per input, got {decoy_sets} sets for {inputs} inputs")]
    DecoySetCountMismatch { inputs: usize, decoy_sets: usize },
    #[error("Decoy set for input {input_index} is smaller than the mixin")]
    NotEnoughDecoys { input_index: usize },
    #[error("{outputs} outputs is more than {maximum} allowed for this many inputs")]
    TooManyOutputs { outputs: usize, maximum: usize },
    #[error("Transaction extra of {size} bytes is above the maximum of {maximum}")]
    ExtraTooLarge { size: usize, maximum: usize },
    #[error("Payment ID must be 64 hex characters")]
    InvalidPaymentId,
    #[error("Mixin {mixin} is outside of the allowed range {min} to {max}")]
    MixinOutOfRange { mixin: u64, min: u64, max: u64 },
    #[error("Fee {fee} is below the minimum of {minimum}")]
    FeeTooSmall { fee: u64, minimum: u64 },
    #[error("No destinations given")]
    NoDestinations,
    #[error("Address {0} is not valid")]
    InvalidAddress(String),
    #[error("Input {input_index} has no global output index")]
    MissingGlobalIndex { input_index: usize },
}

/// Errors surfaced by the wallet
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Validation failed. {0}")]
    Validation(#[from] ValidationError),
    #[error("Not enough funds. Needed {needed}, found {found}")]
    NotEnoughFunds { needed: u64, found: u64 },
    #[error("Input {input_index} has {available} usable decoys, {required} are required")]
    InsufficientMixinCandidates {
        input_index: usize,
        available: usize,
        required: usize,
    },
    #[error("Crypto backend failure. {0}")]
    CryptoBackend(String),
    #[error("Daemon unavailable. {0}")]
    Daemon(#[from] DaemonError),
    #[error("Operation is not allowed in a view wallet")]
    IllegalViewWalletOperation,
    #[error("Operation is only allowed in a view wallet")]
    IllegalNonViewWalletOperation,
    #[error("Subwallet already exists")]
    SubwalletAlreadyExists,
    #[error("The primary address can not be deleted")]
    CannotDeletePrimaryAddress,
    #[error("Address {0} is not in the wallet")]
    AddressNotInWallet(String),
    #[error("No subwallet with public spend key {0}")]
    SubWalletNotFound(PublicKey),
    #[error("Wallet is fully optimized, not enough inputs for a fusion transaction")]
    FullyOptimized,
    #[error("Input with output key {0} was added to the wallet twice")]
    DuplicateInput(PublicKey),
    #[error("Input with key image {0} not found")]
    InputNotFound(KeyImage),
    #[error("Serialization failed. {0}")]
    Serialization(String),
    #[error("Wallet file version {0} is not supported")]
    UnsupportedWalletVersion(u32),
    #[error("Sync error. {0}")]
    Sync(#[from] SyncError),
}

impl WalletError {
    /// Stable numeric code of the error kind
    pub fn code(&self) -> u32 {
        use WalletError::*;
        match self {
            Validation(e) => match e {
                ValidationError::NonPositiveOutputAmount => 100,
                ValidationError::OutputAmountTooLarge { .. } => 101,
                ValidationError::OutputSumOverflow => 102,
                ValidationError::NonPositiveInputAmount => 103,
                ValidationError::InputSumOverflow => 104,
                ValidationError::Unbalanced { .. } => 105,
                ValidationError::DecoySetCountMismatch { .. } => 106,
                ValidationError::NotEnoughDecoys { .. } => 107,
                ValidationError::TooManyOutputs { .. } => 108,
                ValidationError::ExtraTooLarge { .. } => 109,
                ValidationError::InvalidPaymentId => 110,
                ValidationError::MixinOutOfRange { .. } => 111,
                ValidationError::FeeTooSmall { .. } => 112,
                ValidationError::NoDestinations => 113,
                ValidationError::InvalidAddress(_) => 114,
                ValidationError::MissingGlobalIndex { .. } => 115,
            },
            NotEnoughFunds { .. } => 200,
            InsufficientMixinCandidates { .. } => 201,
            FullyOptimized => 202,
            CryptoBackend(_) => 300,
            Daemon(_) => 400,
            IllegalViewWalletOperation => 500,
            IllegalNonViewWalletOperation => 501,
            SubwalletAlreadyExists => 502,
            CannotDeletePrimaryAddress => 503,
            AddressNotInWallet(_) => 504,
            SubWalletNotFound(_) => 505,
            DuplicateInput(_) => 600,
            InputNotFound(_) => 601,
            Serialization(_) => 700,
            UnsupportedWalletVersion(_) => 701,
            Sync(_) => 800,
        }
    }
}

impl From<CryptoError> for WalletError {
    fn from(e: CryptoError) -> Self {
        WalletError::CryptoBackend(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}
