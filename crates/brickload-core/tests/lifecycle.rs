//! Expiry, reaping and terminal failure.

mod common;

use brickload_core::domain::{DuplicateKeyPolicy, JobPhase, JobStatus, Phase};
use brickload_core::ports::{Clock, JobStore};
use brickload_core::ImportConfig;
use chrono::TimeDelta;
use common::{FailingCatalog, Harness, full_archive, small_batches, write_file};
use rstest::rstest;

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let h = Harness::new(small_batches());
    for id in ["job-01HZY0000000000000000000AA", "nope", ""] {
        let err = h.importer.run_batch(id, None).await.unwrap_err();
        assert_eq!(err.code(), "not_found", "{id:?}");
        let err = h.importer.status(id).await.unwrap_err();
        assert_eq!(err.code(), "not_found", "{id:?}");
    }
}

#[tokio::test]
async fn idle_job_expires_then_is_purged() {
    let h = Harness::new(small_batches());
    let report = h.importer.prepare(&full_archive(&h.uploads())).await.unwrap();
    let id = report.job_id.to_string();
    h.importer.run_batch(&id, None).await.unwrap();
    let scratch = h.scratch_root().join(&id);
    assert!(scratch.exists());

    // just before the ttl the job is still live
    h.clock.advance(TimeDelta::seconds(3_599));
    assert!(h.importer.status(&id).await.is_ok());

    h.clock.advance(TimeDelta::seconds(1));
    assert_eq!(h.importer.status(&id).await.unwrap_err().code(), "expired");
    assert_eq!(h.importer.run_batch(&id, None).await.unwrap_err().code(), "expired");

    let reaped = h.importer.reap_expired(h.clock.now()).await.unwrap();
    assert_eq!(reaped.expired, vec![report.job_id]);
    assert!(reaped.purged.is_empty());
    assert_eq!(reaped.remaining.expired, 1);
    assert!(!scratch.exists());

    // tombstone still answers "expired" during retention
    assert_eq!(h.importer.status(&id).await.unwrap_err().code(), "expired");

    h.clock.advance(TimeDelta::seconds(86_400));
    let reaped = h.importer.reap_expired(h.clock.now()).await.unwrap();
    assert_eq!(reaped.purged, vec![report.job_id]);
    assert_eq!(h.jobs.len().await, 0);
    assert_eq!(h.importer.status(&id).await.unwrap_err().code(), "not_found");
}

#[tokio::test]
async fn reaper_leaves_live_jobs_alone() {
    let h = Harness::new(small_batches());
    let report = h.importer.prepare(&full_archive(&h.uploads())).await.unwrap();

    h.clock.advance(TimeDelta::seconds(60));
    let reaped = h.importer.reap_expired(h.clock.now()).await.unwrap();
    assert!(reaped.expired.is_empty());
    assert_eq!(reaped.remaining.pending, 1);

    let stored = h.jobs.get(report.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.scratch_dir.is_some());
}

#[tokio::test]
async fn storage_fault_fails_the_job_after_the_processed_rows() {
    let h = Harness::with_catalog(small_batches(), FailingCatalog::failing_from(2));
    let report = h.importer.prepare(&full_archive(&h.uploads())).await.unwrap();
    let id = report.job_id.to_string();

    let err = h.importer.run_batch(&id, Some(2)).await.unwrap_err();
    assert_eq!(err.code(), "storage_write_error");

    let stored = h.jobs.get(report.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.phase, JobPhase::Failed);
    assert_eq!(stored.phases[0].cursor, 1);
    assert_eq!(stored.phases[0].counters.created, 1);
    assert!(stored.failure.as_deref().unwrap().contains("disk full"));
    assert!(stored.lease.is_none());
    assert!(stored.scratch_dir.is_none());
    assert!(!h.scratch_root().join(&id).exists());

    // terminal: later calls just report the failure
    let snap = h.importer.run_batch(&id, Some(2)).await.unwrap();
    assert_eq!(snap.status, JobStatus::Failed);
    assert!(!snap.done);
    assert!(snap.failure.is_some());
    assert!(snap.batch.is_none());
}

#[rstest]
#[case::last_wins(DuplicateKeyPolicy::LastWins, (1, 1, 0), "Navy")]
#[case::first_wins(DuplicateKeyPolicy::FirstWins, (1, 0, 1), "Blue")]
#[tokio::test]
async fn repeated_key_in_one_source(
    #[case] policy: DuplicateKeyPolicy,
    #[case] expected: (u64, u64, u64),
    #[case] stored_name: &str,
) {
    let config = ImportConfig {
        duplicate_key_policy: policy,
        ..small_batches()
    };
    let h = Harness::new(config);
    let upload = write_file(&h.uploads(), "colors.csv", b"id,name\n1,Blue\n1,Navy\n");
    let report = h.importer.prepare(&upload).await.unwrap();

    let snap = h.drive(&report.job_id.to_string(), Some(10)).await;
    let c = snap.phase_counters(Phase::Colors).unwrap();
    assert_eq!((c.created, c.updated, c.skipped), expected);
    assert_eq!(h.catalog.color(1).await.unwrap().name, stored_name);
}
