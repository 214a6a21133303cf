//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Sealing policy
    pub sealing: SealingConfig,

    /// Partition actor configuration
    pub actor: ActorConfig,

    /// Seal signing configuration
    pub signing: SigningConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "chain-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageConfig::default(),
            sealing: SealingConfig::default(),
            actor: ActorConfig::default(),
            signing: SigningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// RocksDB under `data_dir`
    RocksDb,
    /// Process memory (tests, embedding)
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: StorageBackend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// RocksDB tuning
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_dir: PathBuf::from("./data/chain-ledger"),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Sync the WAL on every seal commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Sealing policy: a block is sealed when it holds `max_block_transactions`
/// or, with time sealing enabled, when its first transaction is older than
/// `max_block_age_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SealingConfig {
    /// Size trigger (transactions per block)
    pub max_block_transactions: usize,

    /// Age trigger (milliseconds since the first staged transaction)
    pub max_block_age_ms: u64,

    /// Enable the age trigger
    pub time_sealing_enabled: bool,

    /// How often the partition actor checks the age trigger (milliseconds)
    pub tick_interval_ms: u64,
}

impl Default for SealingConfig {
    fn default() -> Self {
        Self {
            max_block_transactions: 100,
            max_block_age_ms: 5_000,
            time_sealing_enabled: true,
            tick_interval_ms: 250,
        }
    }
}

impl SealingConfig {
    /// Age trigger as a duration
    pub fn max_block_age(&self) -> Duration {
        Duration::from_millis(self.max_block_age_ms)
    }

    /// Tick interval as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Partition actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox size per partition (backpressure)
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
        }
    }
}

/// Seal signing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Hex Ed25519 seed; when set, every sealed block is signed
    pub seed_hex: Option<String>,

    /// Hex Ed25519 public key for verification without the seed
    pub verifying_key_hex: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            default_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// In-memory configuration (tests, embedding)
    pub fn in_memory() -> Self {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CHAIN_LEDGER_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("CHAIN_LEDGER_STORAGE") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "rocksdb" => StorageBackend::RocksDb,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(max) = std::env::var("CHAIN_LEDGER_MAX_BLOCK_TRANSACTIONS") {
            config.sealing.max_block_transactions =
                parse_env("CHAIN_LEDGER_MAX_BLOCK_TRANSACTIONS", &max)?;
        }

        if let Ok(age) = std::env::var("CHAIN_LEDGER_MAX_BLOCK_AGE_MS") {
            config.sealing.max_block_age_ms =
                parse_env("CHAIN_LEDGER_MAX_BLOCK_AGE_MS", &age)?;
        }

        if let Ok(seed) = std::env::var("CHAIN_LEDGER_SIGNING_SEED") {
            config.signing.seed_hex = Some(seed);
        }

        if let Ok(key) = std::env::var("CHAIN_LEDGER_VERIFYING_KEY") {
            config.signing.verifying_key_hex = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.sealing.max_block_transactions == 0 {
            return Err(crate::Error::Config(
                "sealing.max_block_transactions must be at least 1".to_string(),
            ));
        }
        if self.sealing.time_sealing_enabled && self.sealing.tick_interval_ms == 0 {
            return Err(crate::Error::Config(
                "sealing.tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "actor.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}
