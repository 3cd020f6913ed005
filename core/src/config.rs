//! Runtime configuration.
//!
//! Loaded once by the runner, either from a JSON file or from environment
//! variables, and passed explicitly to each component. Nothing below the
//! runner reads the process environment.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PG_PORT: u16 = 5432;
const DEFAULT_MAINTENANCE_DB: &str = "postgres";
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_TASK_RETRIES: u32 = 1;
const DEFAULT_TASK_RETRY_DELAY_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub source:       SourceConfig,
    pub output_dir:   PathBuf,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub retry:        RetryPolicy,
}

// ── Source database ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Postgres(DatabaseConfig),
    /// Local SQLite file with the same `loan`/`payment` schema. Dev only.
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Database the restore utility connects to while the target is dropped.
    #[serde(default = "default_maintenance_db")]
    pub maintenance_db: String,
}

// ── Object store ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    S3(S3Config),
    /// Directory standing in for a bucket store: objects land at
    /// `<root>/<bucket>/<key>`.
    LocalDir { root: PathBuf, bucket: String },
}

impl ObjectStoreConfig {
    pub fn bucket(&self) -> &str {
        match self {
            ObjectStoreConfig::S3(s3) => &s3.bucket,
            ObjectStoreConfig::LocalDir { bucket, .. } => bucket,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible storage (MinIO, Ceph, ...).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

// ── Retry ───────────────────────────────────────────────────────────

/// Whole-task retry policy. Applied identically to every error kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_TASK_RETRIES,
            retry_delay_secs: DEFAULT_TASK_RETRY_DELAY_SECS,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting. Used by the one-shot task commands.
    pub fn none() -> Self {
        Self { retries: 0, retry_delay_secs: 0 }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

// ── Loading ─────────────────────────────────────────────────────────

impl PipelineConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` delegates here so the
    /// parsing rules can be exercised without touching the real environment.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| PipelineError::Config(format!("{key} is not set")))
        };

        let source = match get("SQLITE_PATH") {
            Some(path) => SourceConfig::Sqlite { path: path.into() },
            None => SourceConfig::Postgres(DatabaseConfig::from_lookup(&lookup)?),
        };

        let object_store = match get("LOCAL_OBJECT_STORE_ROOT") {
            Some(root) => ObjectStoreConfig::LocalDir {
                root: root.into(),
                bucket: require("S3_BUCKET_NAME")?,
            },
            None => {
                let endpoint = get("S3_ENDPOINT");
                // Custom endpoints are almost always path-style only.
                let path_style_default = endpoint.is_some();
                ObjectStoreConfig::S3(S3Config {
                    bucket: require("S3_BUCKET_NAME")?,
                    region: get("S3_REGION").unwrap_or_else(default_s3_region),
                    endpoint,
                    access_key_id: get("S3_ACCESS_KEY"),
                    secret_access_key: get("S3_SECRET_KEY"),
                    force_path_style: parse_or(
                        get("S3_FORCE_PATH_STYLE"),
                        "S3_FORCE_PATH_STYLE",
                        path_style_default,
                    )?,
                })
            }
        };

        let config = PipelineConfig {
            source,
            output_dir: require("PROCESSED_DATA_PATH")?.into(),
            object_store,
            retry: RetryPolicy {
                retries: parse_or(get("TASK_RETRIES"), "TASK_RETRIES", DEFAULT_TASK_RETRIES)?,
                retry_delay_secs: parse_or(
                    get("TASK_RETRY_DELAY_SECS"),
                    "TASK_RETRY_DELAY_SECS",
                    DEFAULT_TASK_RETRY_DELAY_SECS,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(PipelineError::Config("output_dir is empty".into()));
        }
        if self.object_store.bucket().is_empty() {
            return Err(PipelineError::Config("bucket name is empty".into()));
        }
        if let ObjectStoreConfig::S3(s3) = &self.object_store {
            if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                return Err(PipelineError::Config(
                    "S3 access key and secret key must be set together".into(),
                ));
            }
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Only the `POSTGRES_*` variables. Enough for the restore utility,
    /// which needs no output directory or object store.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| PipelineError::Config(format!("{key} is not set")))
        };

        Ok(DatabaseConfig {
            host: require("POSTGRES_HOST")?,
            port: parse_or(get("POSTGRES_PORT"), "POSTGRES_PORT", DEFAULT_PG_PORT)?,
            user: require("POSTGRES_USER")?,
            password: require("POSTGRES_PASSWORD")?,
            name: require("POSTGRES_DB")?,
            maintenance_db: get("POSTGRES_MAINTENANCE_DB").unwrap_or_else(default_maintenance_db),
        })
    }

    /// Restore drops the target while connected to the maintenance
    /// database, so the two must differ. Reading from either is fine.
    pub fn validate_for_restore(&self) -> PipelineResult<()> {
        if self.name == self.maintenance_db {
            return Err(PipelineError::Config(format!(
                "target database '{}' cannot also be the maintenance database",
                self.name
            )));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> PipelineResult<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

fn default_pg_port() -> u16 {
    DEFAULT_PG_PORT
}

fn default_maintenance_db() -> String {
    DEFAULT_MAINTENANCE_DB.to_string()
}

fn default_s3_region() -> String {
    DEFAULT_S3_REGION.to_string()
}
