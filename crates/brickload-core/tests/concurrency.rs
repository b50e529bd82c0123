//! Single-flight batches and lease takeover.

mod common;

use brickload_core::domain::{JobPhase, Lease, LeaseToken, Phase};
use brickload_core::ports::{CatalogStore, JobStore, LeaseAttempt};
use brickload_core::ImportError;
use chrono::TimeDelta;
use common::{GatedCatalog, Harness, full_archive, small_batches, t0};

#[tokio::test]
async fn concurrent_calls_on_one_job_yield_exactly_one_conflict() {
    let catalog = GatedCatalog::new();
    let h = Harness::with_catalog(small_batches(), catalog);
    let report = h.importer.prepare(&full_archive(&h.uploads())).await.unwrap();
    let id = report.job_id.to_string();

    let first = h.importer.run_batch(&id, Some(2));
    let second = async {
        // wait until the first call is inside its slice, holding the lease
        h.catalog.entered.notified().await;
        let result = h.importer.run_batch(&id, Some(2)).await;
        h.catalog.release.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    let snap = first.unwrap();
    assert_eq!(snap.batch.unwrap().counters.created, 2);
    match second.unwrap_err() {
        ImportError::Conflict { job_id, until } => {
            assert_eq!(job_id, report.job_id);
            assert_eq!(until, t0() + TimeDelta::seconds(120));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // the rejected call counted nothing
    let status = h.importer.status(&id).await.unwrap();
    assert_eq!(status.phase, JobPhase::Colors);
    assert_eq!(status.cursor, 2);
    assert_eq!(status.totals.created, 2);
    assert_eq!(h.catalog.count(Phase::Colors).await.unwrap(), 2);
}

#[tokio::test]
async fn expired_lease_is_taken_over() {
    let h = Harness::new(small_batches());
    let report = h.importer.prepare(&full_archive(&h.uploads())).await.unwrap();
    let id = report.job_id.to_string();

    // a crashed worker took the lease and never came back
    let stale = LeaseToken::from_ulid(ulid::Ulid::new());
    let lease = Lease::new(stale, t0(), TimeDelta::seconds(120));
    let attempt = h.jobs.try_acquire_lease(report.job_id, lease).await.unwrap();
    assert!(matches!(attempt, LeaseAttempt::Acquired(_)));
    let abandoned = h.jobs.get(report.job_id).await.unwrap().unwrap();

    let err = h.importer.run_batch(&id, None).await.unwrap_err();
    assert_eq!(err.code(), "conflict");

    h.clock.advance(TimeDelta::seconds(121));
    let snap = h.importer.run_batch(&id, None).await.unwrap();
    assert_eq!(snap.cursor, 2);
    assert_eq!(snap.phase_counters(Phase::Colors).unwrap().created, 2);

    // the old holder can no longer write
    assert!(!h.jobs.commit(&abandoned, stale).await.unwrap());
    let stored = h.jobs.get(report.job_id).await.unwrap().unwrap();
    assert_eq!(stored.phases[0].cursor, 2);
    assert!(stored.lease.is_none());
}
