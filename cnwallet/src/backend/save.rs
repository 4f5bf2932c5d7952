//! Persisting the wallet and synchronizer state

use std::fs::remove_file;
use std::path::Path;

use cn_sync::client::Daemon;
use cn_sync::crypto::CryptoOracle;

use super::WalletBackend;
use crate::error::WalletError;
use crate::wallet::disk::WalletDocument;

impl<D, O> WalletBackend<D, O>
where
    D: Daemon + 'static,
    O: CryptoOracle + 'static,
{
    /// Snapshot of the wallet and synchronizer, taken between sync ticks so both agree on the
    /// processed height
    pub async fn to_document(&self) -> WalletDocument {
        let _syncing = self.sync_lock.lock().await;
        let synchronizer = self.synchronizer().await.state().await;
        WalletDocument::new(self.wallet.read().await.clone(), synchronizer)
    }

    pub async fn to_json_string(&self) -> Result<String, WalletError> {
        self.to_document().await.to_json()
    }

    pub async fn save_wallet_to_file(&self, path: &Path) -> Result<(), WalletError> {
        self.to_document().await.save_to_file(path)
    }

    /// Saves to the wallet path of the config. A file there holding a different wallet is
    /// backed up first.
    pub async fn save(&self) -> Result<(), WalletError> {
        let path = self
            .config
            .get_wallet_path()
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        if path.exists() && !self.owns_wallet_file(&path).await {
            let backup = self
                .config
                .backup_existing_wallet()
                .map_err(|e| WalletError::Serialization(e.to_string()))?;
            log::warn!(
                "{} holds another wallet, backed it up to {}",
                path.display(),
                backup.display()
            );
        }
        self.save_wallet_to_file(&path).await
    }

    async fn owns_wallet_file(&self, path: &Path) -> bool {
        match WalletDocument::load_from_file(path) {
            Ok(document) => {
                document.sub_wallets.primary_address() == self.get_primary_address().await
            }
            Err(_) => false,
        }
    }

    /// Removes the wallet file at the wallet path of the config
    pub async fn delete_wallet_file(&self) -> Result<(), WalletError> {
        if !self.config.wallet_exists() {
            log::error!("Wallet file does not exist, nothing to delete.");
            return Err(WalletError::Serialization(
                "wallet file does not exist".to_string(),
            ));
        }
        let path = self
            .config
            .get_wallet_path()
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        remove_file(&path).map_err(|e| {
            log::error!("Failed to delete {}. {}", path.display(), e);
            WalletError::Serialization(e.to_string())
        })?;
        log::debug!("Deleted {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cn_sync::mocks::{mock_block, MockDaemon, MockOracle};
    use cn_sync::primitives::Hash;
    use cnconfig::{ChainType, WalletConfig};

    use super::*;
    use crate::backend::tests::{backend, TestBackend};

    async fn synced_backend(daemon: &Arc<MockDaemon>, oracle: &Arc<MockOracle>) -> TestBackend {
        let backend = backend(daemon, oracle);
        let view = oracle.keys_from_seed(2).public_key;
        let spend = oracle.keys_from_seed(1).public_key;
        daemon.push_blocks(vec![
            mock_block(1, vec![]),
            mock_block(
                2,
                vec![oracle.payment(Hash::from_bytes([7; 32]), &[(view, spend, 700)], vec![])],
            ),
        ]);
        backend.sync().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn json_round_trip_keeps_balance_and_height() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let saved = synced_backend(&daemon, &oracle).await;
        saved.add_sub_wallet().await.unwrap();

        let json = saved.to_json_string().await.unwrap();
        let loaded = TestBackend::load_wallet_from_json(
            saved.config.clone(),
            daemon.clone(),
            oracle.clone(),
            &json,
        )
        .unwrap();

        assert_eq!(loaded.get_balance(None).await.unwrap(), (700, 0));
        assert_eq!(loaded.synchronizer().await.height().await, 2);
        assert_eq!(loaded.get_addresses().await, saved.get_addresses().await);
        assert!(loaded.wallet.read().await.key_image_index_is_consistent());
        assert_eq!(loaded.to_document().await, saved.to_document().await);
    }

    #[tokio::test]
    async fn loaded_wallets_resume_from_their_checkpoint() {
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let saved = synced_backend(&daemon, &oracle).await;
        let json = saved.to_json_string().await.unwrap();

        let loaded =
            TestBackend::load_wallet_from_json(saved.config.clone(), daemon.clone(), oracle, &json)
                .unwrap();
        let earlier_requests = daemon.sync_requests().len();
        daemon.push_blocks(vec![mock_block(3, vec![])]);
        loaded.sync().await.unwrap();

        let request = &daemon.sync_requests()[earlier_requests];
        assert_eq!(request.block_checkpoints[0], mock_block(2, vec![]).block_hash);
        assert_eq!(loaded.synchronizer().await.height().await, 3);
    }

    #[tokio::test]
    async fn save_and_delete_in_the_wallet_dir() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let config = Arc::new(WalletConfig::create(
            ChainType::Regtest,
            Some(dir.path().to_path_buf()),
        ));
        let backend = TestBackend::import_wallet_from_keys(
            config.clone(),
            daemon.clone(),
            oracle.clone(),
            oracle.keys_from_seed(1).secret_key,
            oracle.keys_from_seed(2).secret_key,
            1,
        )
        .unwrap();

        backend.save().await.unwrap();
        assert!(config.wallet_exists());

        let path = config.get_wallet_path().unwrap();
        let opened = TestBackend::open_wallet_from_file(config.clone(), daemon, oracle, &path)
            .unwrap();
        assert_eq!(
            opened.get_primary_address().await,
            backend.get_primary_address().await
        );

        backend.delete_wallet_file().await.unwrap();
        assert!(!config.wallet_exists());
        assert!(backend.delete_wallet_file().await.is_err());
    }

    #[tokio::test]
    async fn saving_over_another_wallet_backs_it_up() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Arc::new(MockDaemon::new());
        let oracle = Arc::new(MockOracle::default());
        let config = Arc::new(WalletConfig::create(
            ChainType::Regtest,
            Some(dir.path().to_path_buf()),
        ));
        let from_seeds = |spend: u64, view: u64| {
            TestBackend::import_wallet_from_keys(
                config.clone(),
                daemon.clone(),
                oracle.clone(),
                oracle.keys_from_seed(spend).secret_key,
                oracle.keys_from_seed(view).secret_key,
                1,
            )
            .unwrap()
        };
        let backups = || {
            std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.to_string_lossy().contains(".backup."))
                .collect::<Vec<_>>()
        };
        let first = from_seeds(1, 2);
        let second = from_seeds(3, 4);

        first.save().await.unwrap();
        first.save().await.unwrap();
        assert!(backups().is_empty());

        second.save().await.unwrap();
        let backups = backups();
        assert_eq!(backups.len(), 1);
        let backed_up = WalletDocument::load_from_file(&backups[0]).unwrap();
        assert_eq!(
            backed_up.sub_wallets.primary_address(),
            first.get_primary_address().await
        );
        let saved = WalletDocument::load_from_file(&config.get_wallet_path().unwrap()).unwrap();
        assert_eq!(
            saved.sub_wallets.primary_address(),
            second.get_primary_address().await
        );
    }
}
