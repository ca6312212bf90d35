//! Configuration management

use cfdp_common::types::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default SQLite database path.
pub const DEFAULT_DATABASE_PATH: &str = "data/cfdp.db";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 8;

/// Default directory where bulk data files live.
pub const DEFAULT_DATA_DIR: &str = "data/bulk";

/// Default number of records per import chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 5_000;

/// Default number of cycles processed concurrently.
pub const DEFAULT_MAX_CONCURRENT_CYCLES: usize = 2;

/// Default global ceiling on concurrent bulk operations.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 4;

/// Default WAL checkpoint interval in seconds (30 minutes).
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 1_800;

/// Default verification tolerance: fixed record allowance.
pub const DEFAULT_VERIFY_TOLERANCE_MIN: i64 = 100;

/// Default verification tolerance: fraction of file count (0.1%).
pub const DEFAULT_VERIFY_TOLERANCE_FRACTION: f64 = 0.001;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub remote_api: RemoteApiConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub checkpoint_interval_secs: u64,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory holding downloaded bulk files
    pub data_dir: PathBuf,
    /// Records per chunk (one transaction, one ledger update)
    pub chunk_size: usize,
    /// Cycles processed concurrently
    pub max_concurrent_cycles: usize,
    /// Global ceiling on concurrent bulk operations (admission control)
    pub max_concurrent_operations: usize,
    /// Verification tolerance settings
    pub tolerance: ToleranceConfig,
}

/// Count-tolerance settings for post-import verification.
///
/// Per-type overrides exist because contribution files legitimately contain
/// more duplicate/malformed rows than the master files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub min_records: i64,
    pub fraction: f64,
    #[serde(default)]
    pub per_type_min: HashMap<String, i64>,
}

impl ToleranceConfig {
    /// Allowed difference for a data type given the source-file count.
    pub fn allowance(&self, data_type: DataType, file_count: i64) -> i64 {
        let min = self
            .per_type_min
            .get(data_type.as_str())
            .copied()
            .unwrap_or(self.min_records);
        min.max((file_count as f64 * self.fraction) as i64)
    }
}

/// Remote API configuration (used by verification/backfill fallbacks)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("CFDP_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("CFDP_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: std::env::var("CFDP_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                path: std::env::var("CFDP_DATABASE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH)),
                max_connections: std::env::var("CFDP_DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                checkpoint_interval_secs: std::env::var("CFDP_CHECKPOINT_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL_SECS),
            },
            ingest: IngestConfig {
                data_dir: std::env::var("CFDP_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
                chunk_size: std::env::var("CFDP_CHUNK_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CHUNK_SIZE),
                max_concurrent_cycles: std::env::var("CFDP_MAX_CONCURRENT_CYCLES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_CONCURRENT_CYCLES),
                max_concurrent_operations: std::env::var("CFDP_MAX_CONCURRENT_OPERATIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_CONCURRENT_OPERATIONS),
                tolerance: ToleranceConfig {
                    min_records: std::env::var("CFDP_VERIFY_TOLERANCE_MIN")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_VERIFY_TOLERANCE_MIN),
                    fraction: std::env::var("CFDP_VERIFY_TOLERANCE_FRACTION")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_VERIFY_TOLERANCE_FRACTION),
                    per_type_min: HashMap::new(),
                },
            },
            remote_api: RemoteApiConfig {
                base_url: std::env::var("CFDP_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.open.fec.gov/v1".to_string()),
                api_key: std::env::var("CFDP_API_KEY").ok(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.ingest.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.ingest.max_concurrent_cycles == 0 {
            anyhow::bail!("max_concurrent_cycles must be greater than 0");
        }

        if self.ingest.max_concurrent_operations < self.ingest.max_concurrent_cycles {
            anyhow::bail!(
                "max_concurrent_operations ({}) cannot be less than max_concurrent_cycles ({})",
                self.ingest.max_concurrent_operations,
                self.ingest.max_concurrent_cycles
            );
        }

        if !(0.0..1.0).contains(&self.ingest.tolerance.fraction) {
            anyhow::bail!(
                "Verification tolerance fraction must be in [0, 1), got {}",
                self.ingest.tolerance.fraction
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                path: PathBuf::from(DEFAULT_DATABASE_PATH),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
            },
            ingest: IngestConfig {
                data_dir: PathBuf::from(DEFAULT_DATA_DIR),
                chunk_size: DEFAULT_CHUNK_SIZE,
                max_concurrent_cycles: DEFAULT_MAX_CONCURRENT_CYCLES,
                max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
                tolerance: ToleranceConfig {
                    min_records: DEFAULT_VERIFY_TOLERANCE_MIN,
                    fraction: DEFAULT_VERIFY_TOLERANCE_FRACTION,
                    per_type_min: HashMap::new(),
                },
            },
            remote_api: RemoteApiConfig {
                base_url: "https://api.open.fec.gov/v1".to_string(),
                api_key: None,
            },
        }
    }
}
