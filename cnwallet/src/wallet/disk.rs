//! Reading and writing the wallet document

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use cn_sync::sync::SynchronizerState;
use cnconfig::WALLET_FILE_FORMAT_VERSION;

use crate::error::WalletError;
use crate::wallet::SubWallets;

/// Everything needed to restore a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDocument {
    pub version: u32,
    pub sub_wallets: SubWallets,
    pub synchronizer: SynchronizerState,
}

impl WalletDocument {
    pub fn new(sub_wallets: SubWallets, synchronizer: SynchronizerState) -> Self {
        Self {
            version: WALLET_FILE_FORMAT_VERSION,
            sub_wallets,
            synchronizer,
        }
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<(), WalletError> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Reads a document, rejecting versions newer than this library understands
    pub fn read<R: Read>(reader: R) -> Result<Self, WalletError> {
        let value: serde_json::Value = serde_json::from_reader(reader)?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| WalletError::Serialization("wallet has no version".to_string()))?;
        let version = u32::try_from(version).unwrap_or(u32::MAX);
        if version > WALLET_FILE_FORMAT_VERSION {
            return Err(WalletError::UnsupportedWalletVersion(version));
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        Self::read(json.as_bytes())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), WalletError> {
        let file = File::create(path).map_err(|e| {
            WalletError::Serialization(format!("can not create {}. {}", path.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)?;
        writer
            .flush()
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        log::info!("Saved wallet to {}", path.display());
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, WalletError> {
        let file = File::open(path).map_err(|e| {
            WalletError::Serialization(format!("can not open {}. {}", path.display(), e))
        })?;
        let document = Self::read(BufReader::new(file))?;
        log::debug!("Read wallet from {}", path.display());
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use cn_sync::mocks::MockOracle;
    use cn_sync::status::SynchronizationStatus;

    use super::*;
    use crate::wallet::subwallet::tests::input;
    use crate::wallet::subwallets::tests::wallet;

    fn document() -> WalletDocument {
        let oracle = MockOracle::default();
        let mut sub_wallets = wallet(&oracle);
        let primary = sub_wallets.public_spend_keys()[0];
        sub_wallets
            .store_transaction_input(&primary, input(1, 100, 10))
            .unwrap();
        let mut status = SynchronizationStatus::new(0);
        status.store_block_hash(10, cn_sync::primitives::Hash::from_bytes([10; 32]));

        WalletDocument::new(
            sub_wallets,
            SynchronizerState {
                start_height: 0,
                start_timestamp: 0,
                synchronization_status: status,
            },
        )
    }

    #[test]
    fn saves_and_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let saved = document();

        saved.save_to_file(&path).unwrap();
        let loaded = WalletDocument::load_from_file(&path).unwrap();

        assert_eq!(loaded, saved);
        assert_eq!(loaded.sub_wallets.key_image_count(), 1);
    }

    #[test]
    fn newer_versions_are_rejected() {
        let json = document()
            .to_json()
            .unwrap()
            .replacen("\"version\":0", "\"version\":7", 1);
        assert!(matches!(
            WalletDocument::from_json(&json),
            Err(WalletError::UnsupportedWalletVersion(7))
        ));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            WalletDocument::from_json("{\"version\": 0}"),
            Err(WalletError::Serialization(_))
        ));
        assert!(matches!(
            WalletDocument::from_json("not json"),
            Err(WalletError::Serialization(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WalletDocument::load_from_file(&dir.path().join("absent.json")).is_err());
    }
}
