//! Configuration module
//!
//! Settings are read from the environment (and `.env` through dotenvy) once at
//! startup. Every knob has a default declared as a `const` next to the code that
//! reads it; only the bucket and, for the Postgres ledger, the database URL are
//! mandatory.

use std::env;
use std::str::FromStr;

use crate::strategy::StrategyThresholds;

const MB: u64 = 1024 * 1024;

/// Smallest part the S3 multipart protocol accepts for any part but the last.
pub const SINK_MIN_PART_SIZE: u64 = 5 * MB;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Server-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

/// S3-compatible sink settings
#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (R2, MinIO, ...)
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Base for result links; derived from endpoint and bucket when absent
    pub public_base_url: Option<String>,
    pub destination_prefix: String,
    pub write_timeout_secs: u64,
    pub presign_default_expiry_secs: u64,
    pub presign_max_expiry_secs: u64,
}

/// File API the objects are read from
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub read_timeout_secs: u64,
}

/// Stream bridge and strategy settings
#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub chunk_size_bytes: usize,
    pub direct_upload_threshold_bytes: u64,
    pub multipart_threshold_bytes: u64,
}

impl TransferConfig {
    pub fn thresholds(&self) -> StrategyThresholds {
        StrategyThresholds {
            direct_upload_threshold: self.direct_upload_threshold_bytes,
            multipart_threshold: self.multipart_threshold_bytes,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: (8 * MB) as usize,
            direct_upload_threshold_bytes: 50 * MB,
            multipart_threshold_bytes: 100 * MB,
        }
    }
}

/// Worker pool, retry and recovery settings
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_retries: i32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_secs: u64,
    /// Interval in seconds between recovery sweeps. 0 = disabled.
    pub stale_job_reap_interval_secs: u64,
    /// A running job without a ledger write for this long is considered stale.
    pub stale_job_grace_period_secs: i64,
    /// Retention in days for terminal jobs. 0 = keep forever.
    pub job_retention_days: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            max_retries: 3,
            retry_backoff_base_ms: 1000,
            retry_backoff_max_secs: 300,
            stale_job_reap_interval_secs: 60,
            stale_job_grace_period_secs: 300,
            job_retention_days: 30,
        }
    }
}

/// Downstream clip-processing trigger
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_secs: 30,
            max_attempts: 5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub base: BaseConfig,
    pub ledger_backend: LedgerBackend,
    pub database_url: Option<String>,
    pub sink: SinkConfig,
    pub source: SourceConfig,
    pub transfer: TransferConfig,
    pub worker: WorkerConfig,
    pub webhook: WebhookConfig,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<RelayConfig>);

impl Config {
    fn inner(&self) -> &RelayConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = RelayConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn ledger_backend(&self) -> LedgerBackend {
        self.inner().ledger_backend
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn sink(&self) -> &SinkConfig {
        &self.inner().sink
    }

    pub fn source(&self) -> &SourceConfig {
        &self.inner().source
    }

    pub fn transfer(&self) -> &TransferConfig {
        &self.inner().transfer
    }

    pub fn worker(&self) -> &WorkerConfig {
        &self.inner().worker
    }

    pub fn webhook(&self) -> &WebhookConfig {
        &self.inner().webhook
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const PORT: u16 = 8000;
        const DESTINATION_PREFIX: &str = "videos";
        const SOURCE_READ_TIMEOUT_SECS: u64 = 60;
        const SINK_WRITE_TIMEOUT_SECS: u64 = 120;
        const CHUNK_SIZE_MB: u64 = 8;
        const DIRECT_UPLOAD_THRESHOLD_MB: u64 = 50;
        const MULTIPART_THRESHOLD_MB: u64 = 100;
        const PRESIGN_DEFAULT_EXPIRY_SECS: u64 = 900;
        const PRESIGN_MAX_EXPIRY_SECS: u64 = 3600;
        const WEBHOOK_TIMEOUT_SECS: u64 = 30;
        const WEBHOOK_MAX_ATTEMPTS: u32 = 5;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            environment,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
        };

        let ledger_backend = match env::var("LEDGER_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => LedgerBackend::Postgres,
            "memory" => LedgerBackend::Memory,
            other => {
                return Err(anyhow::anyhow!(
                    "LEDGER_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                ))
            }
        };

        let sink = SinkConfig {
            bucket: env::var("S3_BUCKET")
                .map_err(|_| anyhow::anyhow!("S3_BUCKET must be set"))?,
            region: env_opt("S3_REGION")
                .or_else(|| env_opt("AWS_REGION"))
                .unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: env_opt("S3_ENDPOINT"),
            access_key_id: env_opt("S3_ACCESS").or_else(|| env_opt("AWS_ACCESS_KEY_ID")),
            secret_access_key: env_opt("S3_SECRET")
                .or_else(|| env_opt("AWS_SECRET_ACCESS_KEY")),
            public_base_url: env_opt("PUBLIC_BASE_URL"),
            destination_prefix: env::var("DESTINATION_PREFIX")
                .unwrap_or_else(|_| DESTINATION_PREFIX.to_string())
                .trim_matches('/')
                .to_string(),
            write_timeout_secs: env_parse("SINK_WRITE_TIMEOUT_SECS", SINK_WRITE_TIMEOUT_SECS),
            presign_default_expiry_secs: env_parse(
                "PRESIGN_DEFAULT_EXPIRY_SECS",
                PRESIGN_DEFAULT_EXPIRY_SECS,
            ),
            presign_max_expiry_secs: env_parse("PRESIGN_MAX_EXPIRY_SECS", PRESIGN_MAX_EXPIRY_SECS),
        };

        let source = SourceConfig {
            base_url: env_opt("SOURCE_BASE_URL"),
            token: env_opt("SOURCE_TOKEN"),
            read_timeout_secs: env_parse("SOURCE_READ_TIMEOUT_SECS", SOURCE_READ_TIMEOUT_SECS),
        };

        let transfer = TransferConfig {
            chunk_size_bytes: (env_parse("CHUNK_SIZE_MB", CHUNK_SIZE_MB) * MB) as usize,
            direct_upload_threshold_bytes: env_parse(
                "DIRECT_UPLOAD_THRESHOLD_MB",
                DIRECT_UPLOAD_THRESHOLD_MB,
            ) * MB,
            multipart_threshold_bytes: env_parse("MULTIPART_THRESHOLD_MB", MULTIPART_THRESHOLD_MB)
                * MB,
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            max_workers: env_parse("WORKER_MAX_WORKERS", worker_defaults.max_workers),
            poll_interval_ms: env_parse("WORKER_POLL_INTERVAL_MS", worker_defaults.poll_interval_ms),
            max_retries: env_parse("JOB_MAX_RETRIES", worker_defaults.max_retries),
            retry_backoff_base_ms: env_parse(
                "RETRY_BACKOFF_BASE_MS",
                worker_defaults.retry_backoff_base_ms,
            ),
            retry_backoff_max_secs: env_parse(
                "RETRY_BACKOFF_MAX_SECS",
                worker_defaults.retry_backoff_max_secs,
            ),
            stale_job_reap_interval_secs: env_parse(
                "STALE_JOB_REAP_INTERVAL_SECS",
                worker_defaults.stale_job_reap_interval_secs,
            ),
            stale_job_grace_period_secs: env_parse(
                "STALE_JOB_GRACE_PERIOD_SECS",
                worker_defaults.stale_job_grace_period_secs,
            ),
            job_retention_days: env_parse("JOB_RETENTION_DAYS", worker_defaults.job_retention_days),
        };

        let webhook = WebhookConfig {
            url: env_opt("CLIP_WEBHOOK_URL"),
            secret: env_opt("CLIP_WEBHOOK_SECRET"),
            timeout_secs: env_parse("WEBHOOK_TIMEOUT_SECS", WEBHOOK_TIMEOUT_SECS),
            max_attempts: env_parse("WEBHOOK_MAX_ATTEMPTS", WEBHOOK_MAX_ATTEMPTS),
        };

        let config = RelayConfig {
            base,
            ledger_backend,
            database_url: env_opt("DATABASE_URL"),
            sink,
            source,
            transfer,
            worker,
            webhook,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.ledger_backend == LedgerBackend::Postgres {
            match self.database_url.as_deref() {
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when LEDGER_BACKEND=postgres"
                    ))
                }
                Some(url)
                    if !url.starts_with("postgres://") && !url.starts_with("postgresql://") =>
                {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                Some(_) => {}
            }
        }

        if self.sink.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("S3_BUCKET cannot be empty"));
        }

        if (self.transfer.chunk_size_bytes as u64) < SINK_MIN_PART_SIZE {
            return Err(anyhow::anyhow!(
                "CHUNK_SIZE_MB must be at least {} MB (minimum multipart part size)",
                SINK_MIN_PART_SIZE / MB
            ));
        }

        if self.worker.max_workers == 0 {
            return Err(anyhow::anyhow!("WORKER_MAX_WORKERS must be at least 1"));
        }

        if self.worker.max_retries < 0 {
            return Err(anyhow::anyhow!("JOB_MAX_RETRIES cannot be negative"));
        }

        if self.sink.presign_max_expiry_secs == 0
            || self.sink.presign_default_expiry_secs == 0
            || self.sink.presign_default_expiry_secs > self.sink.presign_max_expiry_secs
        {
            return Err(anyhow::anyhow!(
                "PRESIGN_DEFAULT_EXPIRY_SECS must be between 1 and PRESIGN_MAX_EXPIRY_SECS"
            ));
        }

        // SigV4 presigned URLs are capped at seven days.
        if self.sink.presign_max_expiry_secs > 7 * 24 * 3600 {
            return Err(anyhow::anyhow!(
                "PRESIGN_MAX_EXPIRY_SECS cannot exceed 604800 (7 days)"
            ));
        }

        if self.webhook.secret.is_some() && self.webhook.url.is_none() {
            return Err(anyhow::anyhow!(
                "CLIP_WEBHOOK_SECRET is set but CLIP_WEBHOOK_URL is missing"
            ));
        }

        Ok(())
    }
}
