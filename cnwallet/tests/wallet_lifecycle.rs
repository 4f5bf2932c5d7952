use std::sync::Arc;
use std::time::Duration;

use cn_sync::crypto::CryptoOracle;
use cn_sync::mocks::{mock_block, MockDaemon, MockOracle};
use cn_sync::primitives::{Hash, KeyInput, KeyOutput, PublicKey, RawTransaction};
use cnwallet::backend::{WalletBackend, WalletEvent};
use cnwallet::error::WalletError;
use cnwallet::WalletConfig;

type Backend = WalletBackend<MockDaemon, MockOracle>;

const SPEND_SEED: u64 = 1;
const VIEW_SEED: u64 = 2;

fn wallet(config: WalletConfig, daemon: &Arc<MockDaemon>, oracle: &Arc<MockOracle>) -> Backend {
    Backend::import_wallet_from_keys(
        Arc::new(config),
        daemon.clone(),
        oracle.clone(),
        oracle.keys_from_seed(SPEND_SEED).secret_key,
        oracle.keys_from_seed(VIEW_SEED).secret_key,
        1,
    )
    .unwrap()
}

fn pay_us(oracle: &MockOracle, hash_byte: u8, amounts: &[u64]) -> RawTransaction {
    let view = oracle.keys_from_seed(VIEW_SEED).public_key;
    let spend = oracle.keys_from_seed(SPEND_SEED).public_key;
    let destinations: Vec<_> = amounts.iter().map(|amount| (view, spend, *amount)).collect();
    oracle.payment(Hash::from_bytes([hash_byte; 32]), &destinations, vec![])
}

fn stranger(oracle: &MockOracle) -> String {
    oracle.encode_address(
        &oracle.keys_from_seed(5).public_key,
        &oracle.keys_from_seed(6).public_key,
        WalletConfig::default().address_prefix,
    )
}

/// The transaction a miner would include for our unconfirmed send: it spends our locked
/// inputs and pays `stranger_amounts` to someone else next to our change.
async fn confirmation_of(
    backend: &Backend,
    oracle: &MockOracle,
    hash: Hash,
    stranger_amounts: &[u64],
) -> RawTransaction {
    let document = backend.to_document().await;
    let wallet = &document.sub_wallets;
    let primary = wallet.primary_sub_wallet().unwrap();

    let key_inputs = primary
        .locked_inputs()
        .iter()
        .map(|input| KeyInput {
            amount: input.amount,
            key_image: input.key_image,
            output_indexes: vec![input.global_output_index.unwrap()],
        })
        .collect();

    let mut outputs: Vec<(u64, PublicKey)> = primary
        .unconfirmed_incoming_amounts()
        .iter()
        .map(|change| (change.amount, change.key))
        .chain(
            stranger_amounts
                .iter()
                .map(|amount| (*amount, PublicKey::from_bytes([0xee; 32]))),
        )
        .collect();
    outputs.sort_by_key(|(amount, _)| *amount);

    let private_key = wallet.transaction_private_keys()[&hash];
    RawTransaction {
        key_outputs: outputs
            .into_iter()
            .enumerate()
            .map(|(index, (amount, key))| KeyOutput {
                key,
                amount,
                global_index: Some(2000 + index as u64),
            })
            .collect(),
        hash,
        transaction_public_key: oracle.secret_key_to_public_key(&private_key).unwrap(),
        unlock_time: 0,
        payment_id: String::new(),
        key_inputs,
    }
}

#[tokio::test]
async fn receive_send_and_confirm() {
    let daemon = Arc::new(MockDaemon::new());
    let oracle = Arc::new(MockOracle::default());
    let backend = wallet(WalletConfig::default(), &daemon, &oracle);

    daemon.push_blocks(vec![mock_block(1, vec![pay_us(&oracle, 7, &[5000])])]);
    backend.sync().await.unwrap();
    assert_eq!(backend.get_balance(None).await.unwrap(), (5000, 0));

    let hash = backend
        .send_transaction_basic(&stranger(&oracle), 1000, None)
        .await
        .unwrap();
    assert_eq!(backend.get_balance(None).await.unwrap(), (0, 3990));

    let confirmation = confirmation_of(&backend, &oracle, hash, &[1000]).await;
    daemon.push_blocks(vec![mock_block(2, vec![confirmation])]);
    backend.sync().await.unwrap();

    assert_eq!(backend.get_balance(None).await.unwrap(), (3990, 0));
    let confirmed = backend.get_transaction(&hash).await.unwrap();
    assert_eq!(confirmed.block_height(), 2);
    assert_eq!(confirmed.fee(), 10);
    assert_eq!(confirmed.total_amount(), -1010);
    assert!(backend.check_locked_transactions().await.unwrap().is_empty());

    let document = backend.to_document().await;
    let primary = document.sub_wallets.primary_sub_wallet().unwrap();
    assert_eq!(primary.unspent_inputs().len(), 3);
    assert_eq!(primary.spent_inputs().len(), 1);
    assert!(primary.locked_inputs().is_empty());
    assert_eq!(primary.get_unconfirmed_change(), 0);
}

#[tokio::test]
async fn pending_sends_survive_a_reload_and_can_be_cancelled() {
    let daemon = Arc::new(MockDaemon::new());
    let oracle = Arc::new(MockOracle::default());
    let backend = wallet(WalletConfig::default(), &daemon, &oracle);
    daemon.push_blocks(vec![mock_block(1, vec![pay_us(&oracle, 7, &[5000])])]);
    backend.sync().await.unwrap();

    let hash = backend
        .send_transaction_basic(&stranger(&oracle), 1000, None)
        .await
        .unwrap();
    let json = backend.to_json_string().await.unwrap();

    let mut reloaded = Backend::load_wallet_from_json(
        Arc::new(WalletConfig::default()),
        daemon.clone(),
        oracle.clone(),
        &json,
    )
    .unwrap();
    let mut events = reloaded.subscribe();
    assert_eq!(reloaded.get_balance(None).await.unwrap(), (0, 3990));

    daemon.set_transaction_unknown(hash, true);
    let mut cancelled = Vec::new();
    while cancelled.is_empty() {
        cancelled = reloaded.check_locked_transactions().await.unwrap();
    }

    assert_eq!(cancelled, vec![hash]);
    assert_eq!(events.recv().await, Some(WalletEvent::CancelledTransaction(hash)));
    assert_eq!(reloaded.get_balance(None).await.unwrap(), (5000, 0));
    assert!(reloaded.get_transaction(&hash).await.is_none());
}

#[tokio::test]
async fn view_wallets_track_incoming_funds() {
    let daemon = Arc::new(MockDaemon::new());
    let oracle = Arc::new(MockOracle::default());
    let view = oracle.keys_from_seed(VIEW_SEED);
    let address = oracle.encode_address(
        &oracle.keys_from_seed(SPEND_SEED).public_key,
        &view.public_key,
        WalletConfig::default().address_prefix,
    );
    let backend = Backend::import_view_wallet(
        Arc::new(WalletConfig::default()),
        daemon.clone(),
        oracle.clone(),
        view.secret_key,
        &address,
        1,
    )
    .unwrap();

    daemon.push_blocks(vec![
        mock_block(1, vec![pay_us(&oracle, 7, &[300, 400])]),
        mock_block(2, vec![]),
    ]);
    backend.sync().await.unwrap();

    assert_eq!(backend.get_balance(None).await.unwrap(), (700, 0));
    let (_, private_spend_key) = backend.get_spend_keys(&address).await.unwrap();
    assert!(private_spend_key.is_none());
    assert!(matches!(
        backend.send_transaction_basic(&stranger(&oracle), 100, None).await,
        Err(WalletError::IllegalViewWalletOperation)
    ));
}

#[tokio::test]
async fn importing_an_older_subwallet_rescans_its_history() {
    let daemon = Arc::new(MockDaemon::new());
    let oracle = Arc::new(MockOracle::default());
    let backend = wallet(WalletConfig::default(), &daemon, &oracle);

    let other_spend = oracle.keys_from_seed(9);
    let view = oracle.keys_from_seed(VIEW_SEED).public_key;
    let to_other = oracle.payment(
        Hash::from_bytes([8; 32]),
        &[(view, other_spend.public_key, 250)],
        vec![],
    );
    daemon.push_blocks(vec![
        mock_block(1, vec![pay_us(&oracle, 7, &[100])]),
        mock_block(2, vec![to_other.clone()]),
        mock_block(3, vec![]),
    ]);
    backend.sync().await.unwrap();
    assert_eq!(backend.get_balance(None).await.unwrap(), (100, 0));

    let address = backend
        .import_sub_wallet(other_spend.secret_key, Some(2))
        .await
        .unwrap();
    assert_eq!(backend.get_balance(None).await.unwrap(), (100, 0));

    daemon.push_blocks(vec![mock_block(2, vec![to_other]), mock_block(3, vec![])]);
    backend.sync().await.unwrap();

    assert_eq!(backend.get_balance(None).await.unwrap(), (350, 0));
    assert_eq!(
        backend
            .get_balance(Some(&[address.clone()]))
            .await
            .unwrap(),
        (250, 0)
    );
    assert_eq!(
        backend
            .get_transactions(0, None, true, Some(&address))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn background_sync_reports_when_synced() {
    let daemon = Arc::new(MockDaemon::new());
    let oracle = Arc::new(MockOracle::default());
    let config = WalletConfig {
        daemon_update_interval: 10,
        ..WalletConfig::default()
    };
    let mut backend = wallet(config, &daemon, &oracle);
    let mut events = backend.subscribe();
    let backend = Arc::new(backend);

    daemon.set_block_counts(3, 3);
    daemon.push_blocks(vec![
        mock_block(1, vec![pay_us(&oracle, 7, &[100])]),
        mock_block(2, vec![]),
        mock_block(3, vec![]),
    ]);
    backend.start().await;

    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let WalletEvent::Synced { wallet_height, .. } = event {
                return wallet_height;
            }
        }
        0
    })
    .await
    .unwrap();
    backend.stop().await;

    assert_eq!(synced, 3);
    assert_eq!(backend.get_sync_status().await, (3, 3, 3));
    assert_eq!(backend.get_balance(None).await.unwrap(), (100, 0));
}
