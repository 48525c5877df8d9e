//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::{CoordinatorSettings, IdSettings, RetryPolicy};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/citydex";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Search Index Constants
// ============================================================================

pub const DEFAULT_SEARCH_URL: &str = "http://localhost:9200";

pub const DEFAULT_SEARCH_INDEX: &str = "cities";

pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Ingestion Constants
// ============================================================================

/// Records per document store and search index request. Also the maximum.
pub const DEFAULT_SINK_CHUNK_SIZE: usize = 1000;

pub const DEFAULT_ID_BLOCK_SIZE: usize = 500;

pub const DEFAULT_ID_CONCURRENCY: usize = 4;

pub const DEFAULT_ID_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_WORKER_ID: u16 = 1;

/// Maximum accepted upload size (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// ============================================================================
// Wide-Column Constants
// ============================================================================

pub const DEFAULT_WIDE_COLUMN_TABLE: &str = "cities";

pub const DEFAULT_WIDE_COLUMN_MAX_PASSES: u32 = 8;

pub const DEFAULT_WIDE_COLUMN_FIRST_DELAY_MS: u64 = 1000;

pub const DEFAULT_WIDE_COLUMN_RETRY_DELAY_MS: u64 = 2000;

pub const DEFAULT_WIDE_COLUMN_MAX_ELAPSED_SECS: u64 = 300;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
    pub wide_column: WideColumnConfig,
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
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Search index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub url: String,
    pub index: String,
    pub timeout_secs: u64,
}

/// Where job active flags live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusBackend {
    Memory,
    Postgres,
}

impl FromStr for JobStatusBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(JobStatusBackend::Memory),
            "postgres" | "postgresql" => Ok(JobStatusBackend::Postgres),
            other => anyhow::bail!("Unknown job status backend: {}", other),
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub document_chunk_size: usize,
    pub search_chunk_size: usize,
    pub id_block_size: usize,
    pub id_concurrency: usize,
    pub id_timeout_ms: u64,
    pub worker_id: u16,
    /// 0 disables the deadline
    pub job_deadline_secs: u64,
    pub max_upload_bytes: usize,
    pub job_status_backend: JobStatusBackend,
}

/// Optional wide-column (DynamoDB) sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WideColumnConfig {
    pub enabled: bool,
    pub table: String,
    pub max_passes: u32,
    pub first_delay_ms: u64,
    pub retry_delay_ms: u64,
    /// 0 disables the time budget
    pub max_elapsed_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let job_status_backend = match std::env::var("JOB_STATUS_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => JobStatusBackend::Postgres,
        };

        let config = Config {
            server: ServerConfig {
                host: env_string("CITYDEX_HOST", DEFAULT_SERVER_HOST),
                port: env_or("CITYDEX_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or("CITYDEX_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: env_string("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            search: SearchConfig {
                url: env_string("SEARCH_URL", DEFAULT_SEARCH_URL),
                index: env_string("SEARCH_INDEX", DEFAULT_SEARCH_INDEX),
                timeout_secs: env_or("SEARCH_TIMEOUT_SECS", DEFAULT_SEARCH_TIMEOUT_SECS),
            },
            ingest: IngestConfig {
                document_chunk_size: env_or("INGEST_DOCUMENT_CHUNK_SIZE", DEFAULT_SINK_CHUNK_SIZE),
                search_chunk_size: env_or("INGEST_SEARCH_CHUNK_SIZE", DEFAULT_SINK_CHUNK_SIZE),
                id_block_size: env_or("INGEST_ID_BLOCK_SIZE", DEFAULT_ID_BLOCK_SIZE),
                id_concurrency: env_or("INGEST_ID_CONCURRENCY", DEFAULT_ID_CONCURRENCY),
                id_timeout_ms: env_or("INGEST_ID_TIMEOUT_MS", DEFAULT_ID_TIMEOUT_MS),
                worker_id: env_or("INGEST_WORKER_ID", DEFAULT_WORKER_ID),
                job_deadline_secs: env_or("INGEST_JOB_DEADLINE_SECS", 0),
                max_upload_bytes: env_or("INGEST_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                job_status_backend,
            },
            wide_column: WideColumnConfig {
                enabled: env_or("WIDE_COLUMN_ENABLED", false),
                table: env_string("WIDE_COLUMN_TABLE", DEFAULT_WIDE_COLUMN_TABLE),
                max_passes: env_or("WIDE_COLUMN_MAX_PASSES", DEFAULT_WIDE_COLUMN_MAX_PASSES),
                first_delay_ms: env_or("WIDE_COLUMN_FIRST_DELAY_MS", DEFAULT_WIDE_COLUMN_FIRST_DELAY_MS),
                retry_delay_ms: env_or("WIDE_COLUMN_RETRY_DELAY_MS", DEFAULT_WIDE_COLUMN_RETRY_DELAY_MS),
                max_elapsed_secs: env_or(
                    "WIDE_COLUMN_MAX_ELAPSED_SECS",
                    DEFAULT_WIDE_COLUMN_MAX_ELAPSED_SECS,
                ),
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

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        if self.search.url.is_empty() || self.search.index.is_empty() {
            anyhow::bail!("Search URL and index must be set");
        }

        for (name, size) in [
            ("document", self.ingest.document_chunk_size),
            ("search", self.ingest.search_chunk_size),
        ] {
            if size == 0 || size > DEFAULT_SINK_CHUNK_SIZE {
                anyhow::bail!(
                    "{} chunk size must be between 1 and {}, got {}",
                    name,
                    DEFAULT_SINK_CHUNK_SIZE,
                    size
                );
            }
        }

        if self.ingest.id_block_size == 0 || self.ingest.id_concurrency == 0 {
            anyhow::bail!("Id block size and concurrency must be greater than 0");
        }

        if self.ingest.worker_id > crate::ingest::ids::MAX_WORKER_ID {
            anyhow::bail!(
                "Worker id {} exceeds {}",
                self.ingest.worker_id,
                crate::ingest::ids::MAX_WORKER_ID
            );
        }

        if self.wide_column.enabled {
            if self.wide_column.table.is_empty() {
                anyhow::bail!("Wide-column table must be set when the sink is enabled");
            }
            if self.wide_column.max_passes == 0 {
                anyhow::bail!("Wide-column max_passes must be greater than 0");
            }
        }

        Ok(())
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            ids: IdSettings {
                block_size: self.ingest.id_block_size,
                concurrency: self.ingest.id_concurrency,
                timeout: Duration::from_millis(self.ingest.id_timeout_ms),
            },
            job_deadline: (self.ingest.job_deadline_secs > 0)
                .then(|| Duration::from_secs(self.ingest.job_deadline_secs)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            first_pass_delay: Duration::from_millis(self.wide_column.first_delay_ms),
            retry_pass_delay: Duration::from_millis(self.wide_column.retry_delay_ms),
            max_passes: self.wide_column.max_passes,
            max_elapsed: (self.wide_column.max_elapsed_secs > 0)
                .then(|| Duration::from_secs(self.wide_column.max_elapsed_secs)),
            ..RetryPolicy::default()
        }
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
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            search: SearchConfig {
                url: DEFAULT_SEARCH_URL.to_string(),
                index: DEFAULT_SEARCH_INDEX.to_string(),
                timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
            },
            ingest: IngestConfig {
                document_chunk_size: DEFAULT_SINK_CHUNK_SIZE,
                search_chunk_size: DEFAULT_SINK_CHUNK_SIZE,
                id_block_size: DEFAULT_ID_BLOCK_SIZE,
                id_concurrency: DEFAULT_ID_CONCURRENCY,
                id_timeout_ms: DEFAULT_ID_TIMEOUT_MS,
                worker_id: DEFAULT_WORKER_ID,
                job_deadline_secs: 0,
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                job_status_backend: JobStatusBackend::Postgres,
            },
            wide_column: WideColumnConfig {
                enabled: false,
                table: DEFAULT_WIDE_COLUMN_TABLE.to_string(),
                max_passes: DEFAULT_WIDE_COLUMN_MAX_PASSES,
                first_delay_ms: DEFAULT_WIDE_COLUMN_FIRST_DELAY_MS,
                retry_delay_ms: DEFAULT_WIDE_COLUMN_RETRY_DELAY_MS,
                max_elapsed_secs: DEFAULT_WIDE_COLUMN_MAX_ELAPSED_SECS,
            },
        }
    }
}
