#![forbid(unsafe_code)]
//! Configuration shared by the sync engine and the wallet.
use std::{
    io::{self, Error, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use log::LevelFilter;
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WALLET_NAME: &str = "cn-wallet.json";
pub const DEFAULT_LOGFILE_NAME: &str = "cn-wallet.debug.log";

/// Version written into, and accepted from, persisted wallet documents.
pub const WALLET_FILE_FORMAT_VERSION: u32 = 0;

/// Number of recently processed block hashes kept for fork detection.
pub const LAST_KNOWN_BLOCK_HASHES_SIZE: usize = 50;
/// A long-interval checkpoint is stored every this many blocks.
pub const BLOCK_HASH_CHECKPOINTS_INTERVAL: u64 = 5000;
/// Global indexes are requested in ranges of this many blocks so the daemon
/// can not tell which block we are interested in.
pub const GLOBAL_INDEXES_OBSCURITY: u64 = 10;
/// Unlock times at or above this value are unix timestamps, below it block heights.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

pub const FUSION_TX_MIN_INPUT_COUNT: usize = 12;
pub const MAX_FUSION_TX_SIZE: usize = 30_000;
pub const FUSION_TX_MIN_IN_OUT_COUNT_RATIO: usize = 4;

/// Spent inputs older than this many blocks are assumed safe from reorgs.
pub const PRUNE_SPENT_INPUTS_DEPTH: u64 = 5000;
/// Consecutive daemon misses before a locally sent transaction is declared cancelled.
pub const CANCELLED_TRANSACTION_MAX_MISSES: u32 = 10;
pub const MAX_BLOCKS_PER_DAEMON_REQUEST: u64 = 100;
/// Every this many dropped blocks the synchronizer considers topping up its buffer.
pub const DROP_BLOCK_REFETCH_INTERVAL: u64 = 10;
/// Once more than this many consecutive fetches have failed, new fetches wait for the next tick.
pub const MAX_FAIL_COUNT_BEFORE_BACKOFF: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainType {
    Mainnet,
    Testnet,
    Regtest,
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ChainType::*;
        let name = match self {
            Mainnet => "main",
            Testnet => "test",
            Regtest => "regtest",
        };
        write!(f, "{name}")
    }
}

/// Mixin bounds that become active at `height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixinLimit {
    pub height: u64,
    pub min: u64,
    pub max: u64,
    pub default: u64,
}

impl MixinLimit {
    pub fn new(height: u64, min: u64, max: u64, default: u64) -> Self {
        Self {
            height,
            min,
            max,
            default,
        }
    }
}

/// The set of mixin limits for a chain, ordered by activation height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MixinLimits(Vec<MixinLimit>);

impl MixinLimits {
    pub fn new(mut limits: Vec<MixinLimit>) -> Self {
        limits.sort_by_key(|limit| limit.height);
        Self(limits)
    }

    /// Limit in effect at `height`: the one with the greatest activation height not above it.
    pub fn limits_at(&self, height: u64) -> MixinLimit {
        self.0
            .iter()
            .rev()
            .find(|limit| limit.height <= height)
            .or_else(|| self.0.first())
            .copied()
            .unwrap_or(MixinLimit::new(0, 0, u64::MAX, 0))
    }

    /// Checks `mixin` against the limits at `height`, returning the allowed `(min, max)` on failure.
    pub fn validate(&self, mixin: u64, height: u64) -> Result<(), (u64, u64)> {
        let limit = self.limits_at(height);
        if mixin < limit.min || mixin > limit.max {
            return Err((limit.min, limit.max));
        }
        Ok(())
    }

    pub fn default_mixin_at(&self, height: u64) -> u64 {
        self.limits_at(height).default
    }
}

impl Default for MixinLimits {
    fn default() -> Self {
        Self::new(vec![MixinLimit::new(0, 0, 7, 3)])
    }
}

/// Wallet configuration. Every field has a default, so a partial JSON
/// document is merged over [`WalletConfig::default`] when deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub chain: ChainType,
    /// Number of decimal places in a pretty printed amount.
    pub decimal_places: u32,
    pub address_prefix: u64,
    /// Milliseconds before a daemon request is abandoned.
    pub request_timeout: u64,
    /// Seconds between blocks.
    pub block_target_time: u64,
    /// Milliseconds between synchronizer ticks.
    pub sync_thread_interval: u64,
    /// Milliseconds between daemon height refreshes.
    pub daemon_update_interval: u64,
    /// Milliseconds between checks for cancelled outgoing transactions.
    pub locked_transactions_check_interval: u64,
    /// Blocks processed per synchronizer tick.
    pub blocks_per_tick: u64,
    pub ticker: String,
    /// Most wallets never mine, so coinbase outputs are skipped by default.
    pub scan_coinbase_transactions: bool,
    pub minimum_fee: u64,
    pub mixin_limits: MixinLimits,
    pub standard_address_length: usize,
    pub integrated_address_length: usize,
    /// Approximate ceiling, in bytes, on downloaded but unprocessed blocks.
    pub block_store_memory_limit: usize,
    pub blocks_per_daemon_request: u64,
    /// Seconds without a successful block fetch before the node is reported dead.
    pub max_last_fetched_block_interval: u64,
    /// Seconds without a network height change before the node is reported dead.
    pub max_last_updated_network_height_interval: u64,
    /// Seconds without a local daemon height change before the node is reported dead.
    pub max_last_updated_local_height_interval: u64,
    pub maximum_output_amount: u64,
    pub maximum_outputs_per_input: usize,
    pub maximum_extra_size: usize,
    /// The directory where the wallet and logfiles will be created.
    pub wallet_dir: Option<PathBuf>,
    /// The filename of the wallet. This will be created in the `wallet_dir`.
    pub wallet_name: PathBuf,
    /// The filename of the logfile. This will be created in the `wallet_dir`.
    pub logfile_name: PathBuf,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            chain: ChainType::Mainnet,
            decimal_places: 2,
            address_prefix: 3_914_525,
            request_timeout: 10_000,
            block_target_time: 30,
            sync_thread_interval: 10,
            daemon_update_interval: 10_000,
            locked_transactions_check_interval: 30_000,
            blocks_per_tick: 1,
            ticker: "TRTL".to_string(),
            scan_coinbase_transactions: false,
            minimum_fee: 10,
            mixin_limits: MixinLimits::default(),
            standard_address_length: 99,
            integrated_address_length: 99 + ((64 * 11) / 8),
            block_store_memory_limit: 1024 * 1024 * 50,
            blocks_per_daemon_request: MAX_BLOCKS_PER_DAEMON_REQUEST,
            max_last_fetched_block_interval: 60 * 3,
            max_last_updated_network_height_interval: 60 * 3,
            max_last_updated_local_height_interval: 60 * 3,
            maximum_output_amount: 100_000_000_000,
            maximum_outputs_per_input: 90,
            maximum_extra_size: 1024,
            wallet_dir: None,
            wallet_name: DEFAULT_WALLET_NAME.into(),
            logfile_name: DEFAULT_LOGFILE_NAME.into(),
        }
    }
}

impl WalletConfig {
    /// Create a config for `chain`, storing wallet artefacts in `dir` if given.
    pub fn create(chain: ChainType, dir: Option<PathBuf>) -> WalletConfig {
        WalletConfig {
            chain,
            wallet_dir: dir,
            ..Default::default()
        }
    }

    /// Parse a (possibly partial) JSON config, filling missing fields with defaults.
    pub fn load_from_json(json: &str) -> io::Result<WalletConfig> {
        let mut config: WalletConfig = serde_json::from_str(json)
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("{}", e)))?;
        config.blocks_per_daemon_request = config.blocks_per_daemon_request_clamped();
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> io::Result<WalletConfig> {
        let json = std::fs::read_to_string(path)?;
        Self::load_from_json(&json)
    }

    /// The daemon refuses batches larger than [`MAX_BLOCKS_PER_DAEMON_REQUEST`].
    pub fn blocks_per_daemon_request_clamped(&self) -> u64 {
        self.blocks_per_daemon_request
            .clamp(1, MAX_BLOCKS_PER_DAEMON_REQUEST)
    }

    pub fn sync_thread_interval(&self) -> Duration {
        Duration::from_millis(self.sync_thread_interval)
    }

    pub fn daemon_update_interval(&self) -> Duration {
        Duration::from_millis(self.daemon_update_interval)
    }

    pub fn locked_transactions_check_interval(&self) -> Duration {
        Duration::from_millis(self.locked_transactions_check_interval)
    }

    pub fn max_last_fetched_block_interval(&self) -> Duration {
        Duration::from_secs(self.max_last_fetched_block_interval)
    }

    pub fn max_last_updated_network_height_interval(&self) -> Duration {
        Duration::from_secs(self.max_last_updated_network_height_interval)
    }

    pub fn max_last_updated_local_height_interval(&self) -> Duration {
        Duration::from_secs(self.max_last_updated_local_height_interval)
    }

    /// Format atomic units with the configured number of decimal places and ticker.
    pub fn pretty_amount(&self, amount: u64) -> String {
        let divisor = 10u64.pow(self.decimal_places);
        if self.decimal_places == 0 {
            return format!("{} {}", amount, self.ticker);
        }
        format!(
            "{}.{:0width$} {}",
            amount / divisor,
            amount % divisor,
            self.ticker,
            width = self.decimal_places as usize
        )
    }

    /// Build the Logging config
    pub fn get_log_config(&self) -> io::Result<Config> {
        let window_size = 3; // log0, log1, log2
        let fixed_window_roller = FixedWindowRoller::builder()
            .build("cn-wallet-log{}", window_size)
            .map_err(|e| Error::new(ErrorKind::Other, format!("{}", e)))?;
        let size_limit = 5 * 1024 * 1024; // 5MB as max log file size to roll
        let size_trigger = SizeTrigger::new(size_limit);
        let compound_policy =
            CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

        Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(LevelFilter::Info)))
                    .build(
                        "logfile",
                        Box::new(
                            RollingFileAppender::builder()
                                .encoder(Box::new(PatternEncoder::new("{d} {l}::{m}{n}")))
                                .build(self.get_log_path()?, Box::new(compound_policy))?,
                        ),
                    ),
            )
            .build(
                Root::builder()
                    .appender("logfile")
                    .build(LevelFilter::Debug),
            )
            .map_err(|e| Error::new(ErrorKind::Other, format!("{}", e)))
    }

    /// Installs the rolling file logger as the global `log` backend
    pub fn init_logging(&self) -> io::Result<log4rs::Handle> {
        log4rs::init_config(self.get_log_config()?).map_err(|e| Error::new(ErrorKind::Other, e))
    }

    pub fn get_wallet_dir(&self) -> io::Result<Box<Path>> {
        let mut data_location = match &self.wallet_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut location = dirs::data_dir()
                    .or_else(dirs::home_dir)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::NotFound, "Couldn't determine home directory!")
                    })?;
                location.push(".cn-wallet");
                location
            }
        };
        if self.wallet_dir.is_none() {
            match self.chain {
                ChainType::Testnet => data_location.push("testnet"),
                ChainType::Regtest => data_location.push("regtest"),
                ChainType::Mainnet => {}
            }
        }

        std::fs::create_dir_all(&data_location).map_err(|e| {
            log::error!("Couldn't create wallet directory!\n{}", e);
            e
        })?;

        Ok(data_location.into_boxed_path())
    }

    pub fn get_wallet_path(&self) -> io::Result<Box<Path>> {
        let mut wallet_location = self.get_wallet_dir()?.into_path_buf();
        wallet_location.push(&self.wallet_name);

        Ok(wallet_location.into_boxed_path())
    }

    pub fn wallet_exists(&self) -> bool {
        self.get_wallet_path()
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Copies the wallet file next to itself under a timestamped name and returns the copy's
    /// path
    pub fn backup_existing_wallet(&self) -> io::Result<PathBuf> {
        let wallet_path = self.get_wallet_path()?;
        if !wallet_path.exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("no wallet to back up at {}", wallet_path.display()),
            ));
        }

        let backup_path = self.get_wallet_dir()?.join(format!(
            "{}.backup.{}",
            self.wallet_name.display(),
            chrono::Utc::now().timestamp()
        ));
        std::fs::copy(&wallet_path, &backup_path)?;
        log::info!("Backed up {} to {}", wallet_path.display(), backup_path.display());

        Ok(backup_path)
    }

    pub fn get_log_path(&self) -> io::Result<Box<Path>> {
        let mut log_path = self.get_wallet_dir()?.into_path_buf();
        log_path.push(&self.logfile_name);

        Ok(log_path.into_boxed_path())
    }
}
