//! End-to-end runs: SQLite source, Parquet artifact, local object store.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use client_features_core::{
    artifact::{read_artifact, ArtifactWriter},
    clock::RunClock,
    config::{ObjectStoreConfig, PipelineConfig, RetryPolicy, SourceConfig},
    decision::Decision,
    engine::PipelineEngine,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    publisher::{ArtifactPublisher, LocalDirObjectStore, ObjectStore, OBJECT_KEY},
    store::{ConnectionProvider, FeatureSource, SqliteConnectionProvider, SqliteStore},
    task::{TransformTask, UploadTask},
};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const BUCKET: &str = "features-bucket";

fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn fixed_clock() -> RunClock {
    RunClock::fixed("pipeline-test", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
}

fn no_wait(retries: u32) -> RetryPolicy {
    RetryPolicy { retries, retry_delay_secs: 0 }
}

/// Two clients: 7 is accepted, 8 is rejected for a recent late payment.
fn seed_source(path: &Path) {
    let store = SqliteStore::create(path).expect("create source");
    for (id, month) in [(1, 1), (2, 1), (3, 2)] {
        store.insert_loan(id, 7, 1000.0, "paid", ts(2024, month, 10)).unwrap();
        store.insert_payment(id, id, 120.0, "on_time", ts(2024, month, 20)).unwrap();
    }
    for (id, month) in [(4, 1), (5, 1), (6, 2)] {
        store.insert_loan(id, 8, 1000.0, "paid", ts(2024, month, 10)).unwrap();
        store.insert_payment(id, id, 300.0, "late", ts(2024, 2, 20)).unwrap();
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    db: PathBuf,
    output: PathBuf,
    objects: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("source.db");
    seed_source(&db);
    Workspace {
        db,
        output: dir.path().join("processed"),
        objects: dir.path().join("objects"),
        _dir: dir,
    }
}

/// Fails the first `failures` uploads, then behaves like a local store.
struct FlakyStore {
    inner: LocalDirObjectStore,
    failures: Cell<u32>,
    calls: Rc<Cell<u32>>,
}

impl ObjectStore for FlakyStore {
    fn describe(&self, bucket: &str, key: &str) -> String {
        self.inner.describe(bucket, key)
    }

    fn put_file(&self, bucket: &str, key: &str, path: &Path) -> PipelineResult<()> {
        self.calls.set(self.calls.get() + 1);
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(PipelineError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "connection reset".into(),
            });
        }
        self.inner.put_file(bucket, key, path)
    }
}

/// Refuses the first `failures` connections.
struct FlakyProvider {
    inner: SqliteConnectionProvider,
    failures: Cell<u32>,
    connects: Rc<Cell<u32>>,
}

impl ConnectionProvider for FlakyProvider {
    fn connect(&self) -> PipelineResult<Box<dyn FeatureSource>> {
        self.connects.set(self.connects.get() + 1);
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(PipelineError::Config("database is starting up".into()));
        }
        self.inner.connect()
    }
}

fn build_engine(
    ws: &Workspace,
    provider: Box<dyn ConnectionProvider>,
    store: Box<dyn ObjectStore>,
    retry: RetryPolicy,
) -> PipelineEngine {
    let writer = ArtifactWriter::new(&ws.output);
    let artifact = writer.artifact_path();
    let mut engine = PipelineEngine::new(fixed_clock(), retry);
    engine.register(Box::new(TransformTask::new(provider, writer)));
    engine.register(Box::new(UploadTask::new(ArtifactPublisher::new(store, BUCKET), artifact)));
    engine
}

fn flaky_store(ws: &Workspace, failures: u32) -> (Box<dyn ObjectStore>, Rc<Cell<u32>>) {
    let calls = Rc::new(Cell::new(0));
    let store = FlakyStore {
        inner: LocalDirObjectStore::new(&ws.objects),
        failures: Cell::new(failures),
        calls: calls.clone(),
    };
    (Box::new(store), calls)
}

#[test]
fn configured_run_writes_and_publishes() {
    let ws = workspace();
    let config = PipelineConfig {
        source: SourceConfig::Sqlite { path: ws.db.clone() },
        output_dir: ws.output.clone(),
        object_store: ObjectStoreConfig::LocalDir {
            root: ws.objects.clone(),
            bucket: BUCKET.into(),
        },
        retry: no_wait(0),
    };

    let mut engine = PipelineEngine::build(&config, fixed_clock()).unwrap();
    assert_eq!(engine.task_names(), vec!["transform_features", "upload_to_object_store"]);

    let report = engine.run().unwrap();
    assert_eq!(report.run_id, "pipeline-test");
    assert!(matches!(report.events.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(matches!(report.events.last(), Some(PipelineEvent::RunCompleted { .. })));
    assert!(report.events.contains(&PipelineEvent::DecisionsComputed {
        clients: 2,
        accepted: 1,
        rejected: 1,
    }));

    let local = ws.output.join("client_features.parquet");
    let published = ws.objects.join(BUCKET).join(OBJECT_KEY);
    assert_eq!(fs::read(&local).unwrap(), fs::read(&published).unwrap());

    let rows = read_artifact(&published).unwrap();
    let decisions: Vec<(i64, Decision)> = rows.iter().map(|r| (r.client_id, r.decision)).collect();
    assert_eq!(decisions, vec![(7, Decision::Accept), (8, Decision::Reject)]);
}

#[test]
fn failed_transform_never_uploads() {
    let ws = workspace();
    let missing = SqliteConnectionProvider::new(ws.db.with_file_name("missing.db"));
    let (store, calls) = flaky_store(&ws, 0);
    let mut engine = build_engine(&ws, Box::new(missing), store, no_wait(1));

    match engine.run() {
        Err(PipelineError::TaskFailed { task, attempts, .. }) => {
            assert_eq!(task, "transform_features");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert_eq!(calls.get(), 0);
    assert!(!ws.output.join("client_features.parquet").exists());
    assert!(!ws.objects.join(BUCKET).join(OBJECT_KEY).exists());
}

#[test]
fn transform_retry_opens_a_fresh_connection() {
    let ws = workspace();
    let connects = Rc::new(Cell::new(0));
    let provider = FlakyProvider {
        inner: SqliteConnectionProvider::new(ws.db.clone()),
        failures: Cell::new(1),
        connects: connects.clone(),
    };
    let (store, _) = flaky_store(&ws, 0);
    let mut engine = build_engine(&ws, Box::new(provider), store, no_wait(1));

    let report = engine.run().unwrap();
    assert_eq!(connects.get(), 2);
    assert_eq!(report.retries(), 1);
}

#[test]
fn upload_is_retried_once() {
    let ws = workspace();
    let (store, calls) = flaky_store(&ws, 1);
    let mut engine = build_engine(
        &ws,
        Box::new(SqliteConnectionProvider::new(ws.db.clone())),
        store,
        no_wait(1),
    );

    let report = engine.run().unwrap();
    assert_eq!(calls.get(), 2);
    assert!(report.events.iter().any(|e| matches!(
        e,
        PipelineEvent::TaskRetried { task, attempt: 1, .. } if task == "upload_to_object_store"
    )));
    assert!(ws.objects.join(BUCKET).join(OBJECT_KEY).exists());
}

#[test]
fn exhausted_upload_retries_keep_previous_object() {
    let ws = workspace();
    let previous = ws.objects.join(BUCKET).join(OBJECT_KEY);
    fs::create_dir_all(previous.parent().unwrap()).unwrap();
    fs::write(&previous, b"yesterday").unwrap();

    let (store, calls) = flaky_store(&ws, u32::MAX);
    let mut engine = build_engine(
        &ws,
        Box::new(SqliteConnectionProvider::new(ws.db.clone())),
        store,
        no_wait(1),
    );

    match engine.run() {
        Err(PipelineError::TaskFailed { task, attempts, source }) => {
            assert_eq!(task, "upload_to_object_store");
            assert_eq!(attempts, 2);
            assert!(matches!(*source, PipelineError::Upload { .. }));
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert_eq!(calls.get(), 2);
    assert_eq!(fs::read(&previous).unwrap(), b"yesterday");
}

#[test]
fn upload_without_artifact_fails_before_any_put() {
    let ws = workspace();
    let (store, calls) = flaky_store(&ws, 0);
    let publisher = ArtifactPublisher::new(store, BUCKET);

    let result = publisher.publish(&ws.output.join("client_features.parquet"));
    assert!(matches!(result, Err(PipelineError::Artifact { .. })));
    assert_eq!(calls.get(), 0);
}

#[test]
fn local_store_overwrites_object() {
    let ws = workspace();
    let store = LocalDirObjectStore::new(&ws.objects);
    let src = ws.objects.with_file_name("upload.bin");
    fs::write(&src, b"first").unwrap();
    store.put_file(BUCKET, OBJECT_KEY, &src).unwrap();
    fs::write(&src, b"second").unwrap();
    store.put_file(BUCKET, OBJECT_KEY, &src).unwrap();

    assert_eq!(fs::read(store.object_path(BUCKET, OBJECT_KEY)).unwrap(), b"second");
}
