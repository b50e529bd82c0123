//! Status - 進捗スナップショット
//!
//! run_batch の戻り値と status クエリは同じ形を返す。
//! 呼び出し側はこれだけで「続けるか・止めるか・失敗を表示するか」を決められる。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::Importer;
use crate::domain::{Counters, JobDescriptor, JobId, JobPhase, JobStatus, Phase};
use crate::error::ImportError;

/// One phase's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub name: Phase,
    pub total_rows: u64,
    pub cursor: u64,
    pub complete: bool,
    #[serde(flatten)]
    pub counters: Counters,
}

/// What a single batch call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Phase the slice was read from; `None` when no rows were read.
    pub phase: Option<Phase>,
    pub rows_read: u64,
    #[serde(flatten)]
    pub counters: Counters,
    /// Row-level problems, capped per batch.
    pub messages: Vec<String>,
}

/// Progress snapshot returned by `run_batch` and `status`.
///
/// `cursor` / `total_rows` refer to the current phase (zero once terminal);
/// the flattened counters are summed over all phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub phase: JobPhase,
    pub status: JobStatus,
    pub cursor: u64,
    pub total_rows: u64,
    #[serde(flatten)]
    pub totals: Counters,
    pub done: bool,
    pub batch_size: u32,
    pub phases: Vec<PhaseSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchReport>,
}

impl ProgressSnapshot {
    pub fn phase_counters(&self, phase: Phase) -> Option<Counters> {
        self.phases
            .iter()
            .find(|p| p.name == phase)
            .map(|p| p.counters)
    }

    pub fn with_batch(mut self, batch: BatchReport) -> Self {
        self.batch = Some(batch);
        self
    }
}

impl From<&JobDescriptor> for ProgressSnapshot {
    fn from(job: &JobDescriptor) -> Self {
        let (cursor, total_rows) = job
            .current()
            .map(|p| (p.cursor, p.total_rows))
            .unwrap_or((0, 0));
        Self {
            job_id: job.id,
            phase: job.phase,
            status: job.status,
            cursor,
            total_rows,
            totals: job.totals(),
            done: job.phase == JobPhase::Done,
            batch_size: job.batch_size,
            phases: job
                .phases
                .iter()
                .map(|p| PhaseSnapshot {
                    name: p.phase,
                    total_rows: p.total_rows,
                    cursor: p.cursor,
                    complete: p.complete,
                    counters: p.counters,
                })
                .collect(),
            failure: job.failure.clone(),
            last_activity_at: job.last_activity_at,
            batch: None,
        }
    }
}

impl Importer {
    /// Resolve a caller-supplied id. Malformed ids are simply unknown.
    pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, ImportError> {
        raw.trim()
            .parse()
            .map_err(|_| ImportError::NotFound(raw.to_string()))
    }

    /// Load a job that may still be advanced or inspected.
    pub(crate) async fn load_live(&self, id: JobId) -> Result<JobDescriptor, ImportError> {
        let job = self
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| ImportError::NotFound(id.to_string()))?;
        if job.is_expired(self.clock.now(), self.config.job_ttl()) {
            return Err(ImportError::Expired(id));
        }
        Ok(job)
    }

    /// Current snapshot, without mutating anything.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self, job_id: &str) -> Result<ProgressSnapshot, ImportError> {
        let id = Self::parse_job_id(job_id)?;
        let job = self.load_live(id).await?;
        Ok(ProgressSnapshot::from(&job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PhaseProgress;
    use std::path::PathBuf;
    use ulid::Ulid;

    #[test]
    fn snapshot_reports_current_phase_and_totals() {
        let mut job = JobDescriptor::new(
            JobId::from_ulid(Ulid::new()),
            vec![
                PhaseProgress::new(Phase::Colors, PathBuf::from("colors.csv"), 3),
                PhaseProgress::new(Phase::Parts, PathBuf::from("parts.csv"), 5),
            ],
            2,
            None,
            Utc::now(),
        );
        job.phases[0].counters.created = 2;
        job.phases[0].counters.errors = 1;
        job.phases[0].cursor = 3;
        job.complete_current_phase();
        job.phases[1].cursor = 1;
        job.phases[1].counters.created = 1;

        let snap = ProgressSnapshot::from(&job);
        assert_eq!(snap.phase, JobPhase::Parts);
        assert_eq!((snap.cursor, snap.total_rows), (1, 5));
        assert_eq!(snap.totals.created, 3);
        assert_eq!(snap.phase_counters(Phase::Colors).unwrap().errors, 1);
        assert!(!snap.done);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["created"], 3);
        assert_eq!(json["phases"][0]["name"], "colors");
        assert!(json.get("batch").is_none());
    }
}
