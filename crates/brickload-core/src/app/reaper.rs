//! Reaper - TTL 切れジョブの回収
//!
//! バックグラウンドでは動かない。呼び出し側（CLI の `reap` やスケジューラ）が叩く。
//!
//! # フロー
//! 1. 放置されて TTL を超えた job → expired にして scratch を解放（tombstone として残す）
//! 2. expired になってから retention も過ぎた job → 削除（以後は NotFound）
//!
//! 生きている lease を持つ job には触らない。

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::app::Importer;
use crate::domain::{JobId, JobStatus};
use crate::error::ImportError;
use crate::observability::JobCounts;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    /// Newly marked expired.
    pub expired: Vec<JobId>,
    /// Tombstones deleted.
    pub purged: Vec<JobId>,
    /// Jobs left in the store afterwards, by status.
    pub remaining: JobCounts,
}

impl Importer {
    #[tracing::instrument(skip(self))]
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<ReapReport, ImportError> {
        let ttl = self.config.job_ttl();
        let purge_after = ttl
            .checked_add(&self.config.expired_retention())
            .unwrap_or(TimeDelta::MAX);
        let mut report = ReapReport::default();
        let mut kept = Vec::new();

        for mut job in self.jobs.list().await? {
            if job.status == JobStatus::Expired {
                let purge_at = job.last_activity_at.checked_add_signed(purge_after);
                if purge_at.is_some_and(|at| now >= at) {
                    self.jobs.delete(job.id).await?;
                    report.purged.push(job.id);
                    continue;
                }
            } else if job.is_expired(now, ttl) && !job.is_leased(now) {
                if let Some(dir) = job.scratch_dir.take() {
                    self.discard_scratch(&dir);
                }
                job.mark_expired();
                self.jobs.replace(&job).await?;
                report.expired.push(job.id);
            }
            kept.push(job);
        }

        report.remaining = JobCounts::tally(&kept);
        if !report.expired.is_empty() || !report.purged.is_empty() {
            tracing::info!(
                expired = report.expired.len(),
                purged = report.purged.len(),
                "reaped jobs"
            );
        }
        Ok(report)
    }
}
