//! InMemoryJobStore - テスト・単一プロセス用のジョブストア
//!
//! tokio の Mutex 1 本で map 全体を守る。
//! lease の CAS は lock を取っている間に判定と書き込みを済ませる。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobDescriptor, JobId, Lease, LeaseToken};
use crate::ports::{JobStore, LeaseAttempt, StoreError};

/// In-memory job store. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, JobDescriptor>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Option<JobDescriptor>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn insert(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&descriptor.id) {
            return Err(StoreError::Backend(format!(
                "job {} already exists",
                descriptor.id
            )));
        }
        jobs.insert(descriptor.id, descriptor.clone());
        Ok(())
    }

    async fn try_acquire_lease(&self, id: JobId, lease: Lease) -> Result<LeaseAttempt, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(LeaseAttempt::Missing);
        };
        if let Some(current) = job.lease
            && current.is_live(lease.acquired_at)
        {
            return Ok(LeaseAttempt::Held(current));
        }
        job.lease = Some(lease);
        Ok(LeaseAttempt::Acquired(job.clone()))
    }

    async fn commit(&self, descriptor: &JobDescriptor, owner: LeaseToken) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&descriptor.id) else {
            return Ok(false);
        };
        if !job.holds_lease(owner) {
            return Ok(false);
        }
        *job = descriptor.clone();
        job.lease = None;
        Ok(true)
    }

    async fn release_lease(&self, id: JobId, owner: LeaseToken) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&id)
            && job.holds_lease(owner)
        {
            job.lease = None;
        }
        Ok(())
    }

    async fn replace(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&descriptor.id) {
            Some(job) => {
                *job = descriptor.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!("job {} not found", descriptor.id))),
        }
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.jobs.lock().await.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<JobDescriptor>, StoreError> {
        let mut all: Vec<_> = self.jobs.lock().await.values().cloned().collect();
        all.sort_by_key(|j| j.created_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Phase, PhaseProgress};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn descriptor() -> JobDescriptor {
        JobDescriptor::new(
            JobId::from_ulid(Ulid::new()),
            vec![PhaseProgress::new(Phase::Colors, PathBuf::from("colors.csv"), 3)],
            2,
            None,
            now(),
        )
    }

    fn lease(at: DateTime<Utc>) -> Lease {
        Lease::new(LeaseToken::from_ulid(Ulid::new()), at, TimeDelta::seconds(30))
    }

    #[tokio::test]
    async fn second_lease_is_refused_while_first_is_live() {
        let store = InMemoryJobStore::new();
        let job = descriptor();
        store.insert(&job).await.unwrap();

        let first = lease(now());
        assert!(matches!(
            store.try_acquire_lease(job.id, first).await.unwrap(),
            LeaseAttempt::Acquired(_)
        ));
        match store.try_acquire_lease(job.id, lease(now())).await.unwrap() {
            LeaseAttempt::Held(held) => assert_eq!(held.owner, first.owner),
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over_and_old_owner_cannot_commit() {
        let store = InMemoryJobStore::new();
        let job = descriptor();
        store.insert(&job).await.unwrap();

        let stale = lease(now());
        store.try_acquire_lease(job.id, stale).await.unwrap();
        let fresh = lease(now() + TimeDelta::seconds(31));
        assert!(matches!(
            store.try_acquire_lease(job.id, fresh).await.unwrap(),
            LeaseAttempt::Acquired(_)
        ));

        let mut advanced = job.clone();
        advanced.phases[0].advance(2, None);
        assert!(!store.commit(&advanced, stale.owner).await.unwrap());
        assert!(store.commit(&advanced, fresh.owner).await.unwrap());

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.phases[0].cursor, 2);
        assert!(stored.lease.is_none());
    }

    #[tokio::test]
    async fn missing_job_reports_missing() {
        let store = InMemoryJobStore::new();
        let id = JobId::from_ulid(Ulid::new());
        assert!(matches!(
            store.try_acquire_lease(id, lease(now())).await.unwrap(),
            LeaseAttempt::Missing
        ));
        assert!(!store.delete(id).await.unwrap());
    }
}
