//! State - ジョブの状態と lease

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::LeaseToken;

/// JobStatus はジョブの状態を表現
///
/// # 状態遷移
/// - pending: prepare 済み、まだ batch が走っていない
/// - running: 少なくとも 1 回 batch が commit された
/// - done: すべてのフェーズを消化
/// - failed: storage write エラーで中断（終端）
/// - expired: TTL を超えて放置された（終端、reaper が付与）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Expired,
}

impl JobStatus {
    /// Finished jobs answer run-batch with their snapshot, unchanged.
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }
}

/// Time-bound exclusive ownership of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: LeaseToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(owner: LeaseToken, now: DateTime<Utc>, ttl: chrono::TimeDelta) -> Self {
        Self {
            owner,
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// A lease past its expiry may be taken over.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    #[test]
    fn lease_expires_after_ttl() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let lease = Lease::new(
            LeaseToken::from_ulid(Ulid::new()),
            now,
            chrono::TimeDelta::seconds(30),
        );

        assert!(lease.is_live(now));
        assert!(lease.is_live(now + chrono::TimeDelta::seconds(29)));
        assert!(!lease.is_live(now + chrono::TimeDelta::seconds(30)));
    }

    #[test]
    fn oversized_ttl_saturates_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let lease = Lease::new(LeaseToken::from_ulid(Ulid::new()), now, chrono::TimeDelta::MAX);
        assert_eq!(lease.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(lease.is_live(now));
    }

    #[test]
    fn only_done_and_failed_are_finished() {
        assert!(JobStatus::Done.is_finished());
        assert!(JobStatus::Failed.is_finished());
        assert!(!JobStatus::Expired.is_finished());
        assert!(!JobStatus::Pending.is_finished());
        assert!(!JobStatus::Running.is_finished());
    }
}
