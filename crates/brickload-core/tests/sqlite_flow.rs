//! Resuming a job across process restarts on the SQLite stores.

mod common;

use std::path::Path;
use std::sync::Arc;

use brickload_core::domain::{JobPhase, Phase};
use brickload_core::impls::{DirScratchSpace, SqliteCatalog, SqliteDatabase, SqliteJobStore};
use brickload_core::ports::{CatalogStore, FixedClock};
use brickload_core::{Importer, ImporterBuilder};
use common::{full_archive, small_batches, t0};

fn open(state: &Path) -> (Importer, SqliteCatalog) {
    let db = SqliteDatabase::open(&state.join("brickload.db")).unwrap();
    let catalog = SqliteCatalog::new(db.clone());
    let importer = ImporterBuilder::new()
        .config(small_batches())
        .clock(Arc::new(FixedClock::new(t0())))
        .job_store(SqliteJobStore::new(db))
        .catalog(catalog.clone())
        .scratch(DirScratchSpace::new(state.join("scratch")))
        .build()
        .unwrap();
    (importer, catalog)
}

#[tokio::test]
async fn job_resumes_after_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let archive = full_archive(dir.path());

    let id = {
        let (importer, _) = open(&state);
        let report = importer.prepare(&archive).await.unwrap();
        let id = report.job_id.to_string();
        let snap = importer.run_batch(&id, Some(2)).await.unwrap();
        assert_eq!((snap.phase, snap.cursor), (JobPhase::Colors, 2));
        id
    };

    // a fresh process picks up at the stored cursor
    let (importer, catalog) = open(&state);
    let snap = importer.status(&id).await.unwrap();
    assert_eq!(snap.cursor, 2);
    assert_eq!(snap.batch_size, 2);

    let mut last = snap;
    while !last.status.is_finished() {
        last = importer.run_batch(&id, None).await.unwrap();
    }
    assert_eq!(last.phase, JobPhase::Done);
    assert_eq!(last.totals.created, 6);
    assert_eq!(last.totals.errors, 1);

    assert_eq!(catalog.count(Phase::Colors).await.unwrap(), 2);
    assert_eq!(catalog.count(Phase::Parts).await.unwrap(), 2);
    assert_eq!(catalog.count(Phase::Elements).await.unwrap(), 2);
    assert!(!state.join("scratch").join(&id).exists());
}

#[tokio::test]
async fn second_import_against_sqlite_only_skips() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let archive = full_archive(dir.path());
    let (importer, _) = open(&state);

    for round in 0..2 {
        let report = importer.prepare(&archive).await.unwrap();
        let id = report.job_id.to_string();
        let mut snap = importer.run_batch(&id, Some(100)).await.unwrap();
        while !snap.status.is_finished() {
            snap = importer.run_batch(&id, None).await.unwrap();
        }
        if round == 0 {
            assert_eq!(snap.totals.created, 6);
        } else {
            assert_eq!(snap.totals.created, 0);
            assert_eq!(snap.totals.skipped, 6);
        }
    }
}
