//! Keys, inputs and transaction history of a wallet

pub mod disk;
pub mod selection;
pub mod subwallet;
pub mod subwallets;
pub mod utils;

pub use subwallet::{SubWallet, TxInputAndOwner};
pub use subwallets::SubWallets;
