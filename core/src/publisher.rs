//! Artifact publishing to object storage.
//!
//! One object per run at `<bucket>/client_features.parquet`, overwritten
//! every run. Each store performs a single whole-object write, so a failed
//! upload leaves the previous object untouched.

use crate::{
    config::{ObjectStoreConfig, S3Config},
    error::{PipelineError, PipelineResult},
};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::fs;
use std::path::{Path, PathBuf};

pub const OBJECT_KEY: &str = "client_features.parquet";
const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// A bucket/key object store.
pub trait ObjectStore {
    /// Human-readable target for logs, e.g. `s3://bucket/key`.
    fn describe(&self, bucket: &str, key: &str) -> String;

    /// Upload the file at `path` as `bucket/key`, replacing any existing object.
    fn put_file(&self, bucket: &str, key: &str, path: &Path) -> PipelineResult<()>;
}

/// Build the store matching the configuration.
pub fn object_store_for(config: &ObjectStoreConfig) -> PipelineResult<Box<dyn ObjectStore>> {
    match config {
        ObjectStoreConfig::S3(s3) => Ok(Box::new(S3ObjectStore::connect(s3)?)),
        ObjectStoreConfig::LocalDir { root, .. } => Ok(Box::new(LocalDirObjectStore::new(root.clone()))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedObject {
    pub bucket: String,
    pub key: String,
    pub bytes: u64,
}

pub struct ArtifactPublisher {
    store: Box<dyn ObjectStore>,
    bucket: String,
}

impl ArtifactPublisher {
    pub fn new(store: Box<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self { store, bucket: bucket.into() }
    }

    /// Upload exactly the file at `artifact`.
    pub fn publish(&self, artifact: &Path) -> PipelineResult<PublishedObject> {
        // Fail before any network traffic if the transform never produced a file.
        let bytes = fs::metadata(artifact)
            .map_err(|e| PipelineError::Artifact {
                path: artifact.display().to_string(),
                reason: format!("cannot publish: {e}"),
            })?
            .len();

        let target = self.store.describe(&self.bucket, OBJECT_KEY);
        log::info!("Uploading {} ({bytes} bytes) to {target}", artifact.display());
        self.store.put_file(&self.bucket, OBJECT_KEY, artifact)?;
        log::info!("Uploaded {OBJECT_KEY} to {target}");

        Ok(PublishedObject {
            bucket: self.bucket.clone(),
            key: OBJECT_KEY.to_string(),
            bytes,
        })
    }
}

// ── S3 ───────────────────────────────────────────────────────────────────────

/// S3 or S3-compatible store. The SDK is async-only; this store owns a
/// current-thread runtime and blocks on each request so the pipeline stays
/// single-threaded.
pub struct S3ObjectStore {
    runtime: tokio::runtime::Runtime,
    client: Client,
}

impl S3ObjectStore {
    pub fn connect(config: &S3Config) -> PipelineResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = runtime.block_on(build_s3_client(config));
        Ok(Self { runtime, client })
    }
}

async fn build_s3_client(config: &S3Config) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));

    // Explicit keys win; otherwise the default credential chain applies.
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "feature_runner_static",
        ));
    }
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let shared = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.force_path_style)
        .build();
    Client::from_conf(s3_config)
}

impl ObjectStore for S3ObjectStore {
    fn describe(&self, bucket: &str, key: &str) -> String {
        format!("s3://{bucket}/{key}")
    }

    fn put_file(&self, bucket: &str, key: &str, path: &Path) -> PipelineResult<()> {
        let upload_error = |message: String| PipelineError::Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        self.runtime.block_on(async {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| upload_error(e.to_string()))?;
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type(PARQUET_CONTENT_TYPE)
                .body(body)
                .send()
                .await
                .map_err(|e| upload_error(DisplayErrorContext(&e).to_string()))?;
            Ok::<(), PipelineError>(())
        })
    }
}

// ── Local directory ──────────────────────────────────────────────────────────

/// Filesystem stand-in for a bucket store: `<root>/<bucket>/<key>`.
/// Copies to a temporary sibling and renames, so readers never observe a
/// half-written object.
pub struct LocalDirObjectStore {
    root: PathBuf,
}

impl LocalDirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl ObjectStore for LocalDirObjectStore {
    fn describe(&self, bucket: &str, key: &str) -> String {
        self.object_path(bucket, key).display().to_string()
    }

    fn put_file(&self, bucket: &str, key: &str, path: &Path) -> PipelineResult<()> {
        let dest = self.object_path(bucket, key);
        let dir = dest.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".{key}.upload"));
        if let Err(e) = fs::copy(path, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, &dest)?;
        Ok(())
    }
}
