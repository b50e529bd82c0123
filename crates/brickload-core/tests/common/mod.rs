//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use brickload_core::domain::{CatalogRecord, Phase, UpsertContext, UpsertOutcome};
use brickload_core::impls::{DirScratchSpace, InMemoryCatalog, InMemoryJobStore};
use brickload_core::ports::{CatalogStore, FixedClock, StoreError};
use brickload_core::{ImportConfig, Importer, ImporterBuilder, ProgressSnapshot};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

/// Three rows, the last one malformed.
pub const COLORS: &str = "id,name,rgb,is_trans\n0,Black,05131D,f\n4,Red,C91A09,f\nabc,Broken,FFFFFF,f\n";
pub const PARTS: &str = "part_num,name,part_cat_id\n3001,Brick 2 x 4,11\n3003,Brick 2 x 2,11\n";
pub const ELEMENTS: &str = "element_id,part_num,color_id\n300101,3001,0\n300321,3003,4\n";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

/// Config allowing tiny batches.
pub fn small_batches() -> ImportConfig {
    ImportConfig {
        batch_size_min: 1,
        batch_size_default: 2,
        ..ImportConfig::default()
    }
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn write_zip(dir: &Path, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (member, bytes) in members {
        zip.start_file(*member, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    path
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// The three-source archive used by most scenarios.
pub fn full_archive(dir: &Path) -> PathBuf {
    write_zip(
        dir,
        "rebrickable.zip",
        &[
            ("colors.csv", COLORS.as_bytes()),
            ("parts.csv", PARTS.as_bytes()),
            ("elements.csv", ELEMENTS.as_bytes()),
        ],
    )
}

/// Importer over in-memory stores with a hand-driven clock.
pub struct Harness<C: CatalogStore + Clone + 'static = InMemoryCatalog> {
    pub importer: Importer,
    pub jobs: InMemoryJobStore,
    pub catalog: C,
    pub clock: Arc<FixedClock>,
    pub dir: tempfile::TempDir,
}

impl Harness<InMemoryCatalog> {
    pub fn new(config: ImportConfig) -> Self {
        Self::with_catalog(config, InMemoryCatalog::new())
    }
}

impl<C: CatalogStore + Clone + 'static> Harness<C> {
    pub fn with_catalog(config: ImportConfig, catalog: C) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let jobs = InMemoryJobStore::new();
        let clock = Arc::new(FixedClock::new(t0()));
        let importer = ImporterBuilder::new()
            .config(config)
            .clock(clock.clone())
            .job_store(jobs.clone())
            .catalog(catalog.clone())
            .scratch(DirScratchSpace::new(dir.path().join("scratch")))
            .build()
            .unwrap();
        Self {
            importer,
            jobs,
            catalog,
            clock,
            dir,
        }
    }

    /// Run batches until the job is done or failed.
    pub async fn drive(&self, job_id: &str, batch_size: Option<u32>) -> ProgressSnapshot {
        for _ in 0..1_000 {
            let snapshot = self.importer.run_batch(job_id, batch_size).await.unwrap();
            if snapshot.status.is_finished() {
                return snapshot;
            }
        }
        panic!("job {job_id} did not finish");
    }

    pub fn uploads(&self) -> PathBuf {
        let path = self.dir.path().join("uploads");
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }
}

/// Records the phase of every upsert in call order.
#[derive(Clone, Default)]
pub struct RecordingCatalog {
    pub inner: InMemoryCatalog,
    pub calls: Arc<Mutex<Vec<Phase>>>,
}

impl RecordingCatalog {
    pub fn calls(&self) -> Vec<Phase> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogStore for RecordingCatalog {
    async fn upsert(
        &self,
        record: &CatalogRecord,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome, StoreError> {
        self.calls.lock().unwrap().push(record.phase());
        self.inner.upsert(record, ctx).await
    }

    async fn count(&self, phase: Phase) -> Result<u64, StoreError> {
        self.inner.count(phase).await
    }
}

/// Rejects the upsert with the given 1-based call number and every one after it.
#[derive(Clone)]
pub struct FailingCatalog {
    pub inner: InMemoryCatalog,
    fail_from: usize,
    calls: Arc<AtomicUsize>,
}

impl FailingCatalog {
    pub fn failing_from(fail_from: usize) -> Self {
        Self {
            inner: InMemoryCatalog::new(),
            fail_from,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CatalogStore for FailingCatalog {
    async fn upsert(
        &self,
        record: &CatalogRecord,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome, StoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.fail_from {
            return Err(StoreError::WriteRejected("disk full".into()));
        }
        self.inner.upsert(record, ctx).await
    }

    async fn count(&self, phase: Phase) -> Result<u64, StoreError> {
        self.inner.count(phase).await
    }
}

/// Parks the first upsert until `release` is notified.
#[derive(Clone)]
pub struct GatedCatalog {
    pub inner: InMemoryCatalog,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    first: Arc<AtomicBool>,
}

impl GatedCatalog {
    pub fn new() -> Self {
        Self {
            inner: InMemoryCatalog::new(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            first: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl CatalogStore for GatedCatalog {
    async fn upsert(
        &self,
        record: &CatalogRecord,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome, StoreError> {
        if self.first.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.upsert(record, ctx).await
    }

    async fn count(&self, phase: Phase) -> Result<u64, StoreError> {
        self.inner.count(phase).await
    }
}
