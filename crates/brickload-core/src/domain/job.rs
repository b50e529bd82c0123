//! Job descriptor: the persisted state of one import attempt.

use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, LeaseToken};
use super::phase::{JobPhase, Phase};
use super::sequencer::PhaseSequencer;
use super::state::{JobStatus, Lease};
use super::upsert::UpsertOutcome;

/// Resume point inside a CSV source, so a batch can seek instead of re-scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub byte: u64,
    pub line: u64,
    pub record: u64,
}

/// Per-phase outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl Counters {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.skipped += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn add(&mut self, other: &Counters) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Progress through one phase's source.
///
/// Invariant: `cursor <= total_rows`, and `cursor` never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: Phase,
    /// Normalized CSV inside the job's scratch directory.
    pub source: PathBuf,
    pub total_rows: u64,
    /// Rows consumed from the source so far (source position, not semantic progress).
    pub cursor: u64,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub complete: bool,
}

impl PhaseProgress {
    pub fn new(phase: Phase, source: PathBuf, total_rows: u64) -> Self {
        Self {
            phase,
            source,
            total_rows,
            cursor: 0,
            checkpoint: None,
            counters: Counters::default(),
            complete: false,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total_rows.saturating_sub(self.cursor)
    }

    /// Move the cursor forward past `rows` fully processed rows.
    pub fn advance(&mut self, rows: u64, checkpoint: Option<Checkpoint>) {
        self.cursor = (self.cursor + rows).min(self.total_rows);
        if checkpoint.is_some() {
            self.checkpoint = checkpoint;
        }
    }
}

/// Job record: one import attempt.
///
/// Design:
/// - Created by the preparer, mutated only by batch calls holding the lease.
/// - State transitions via methods (not direct field access from the runner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub phase: JobPhase,
    pub status: JobStatus,

    /// Present phases only, in run order.
    pub phases: Vec<PhaseProgress>,

    /// Active batch size, already clamped to the configured bounds.
    pub batch_size: u32,

    /// Extracted sources live here until the job finishes or expires.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,

    #[serde(default)]
    pub lease: Option<Lease>,

    /// Why the job failed, if it did.
    #[serde(default)]
    pub failure: Option<String>,

    /// Non-fatal findings from preparation.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl JobDescriptor {
    pub fn new(
        id: JobId,
        phases: Vec<PhaseProgress>,
        batch_size: u32,
        scratch_dir: Option<PathBuf>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut phases = phases;
        phases.sort_by_key(|p| p.phase);
        let phase = PhaseSequencer::new(phases.iter().map(|p| p.phase)).first();
        let status = if phase == JobPhase::Done {
            JobStatus::Done
        } else {
            JobStatus::Pending
        };
        Self {
            id,
            phase,
            status,
            phases,
            batch_size,
            scratch_dir,
            created_at: now,
            last_activity_at: now,
            lease: None,
            failure: None,
            warnings: Vec::new(),
        }
    }

    pub fn sequencer(&self) -> PhaseSequencer {
        PhaseSequencer::new(self.phases.iter().map(|p| p.phase))
    }

    /// Logically expired: explicitly marked, or idle for at least `ttl`.
    ///
    /// A deadline past chrono's range never arrives.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        self.status == JobStatus::Expired
            || self
                .last_activity_at
                .checked_add_signed(ttl)
                .is_some_and(|deadline| now >= deadline)
    }

    /// Someone else holds a live lease.
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease.is_some_and(|l| l.is_live(now))
    }

    pub fn holds_lease(&self, owner: LeaseToken) -> bool {
        self.lease.is_some_and(|l| l.owner == owner)
    }

    pub fn progress(&self, phase: Phase) -> Option<&PhaseProgress> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn progress_mut(&mut self, phase: Phase) -> Option<&mut PhaseProgress> {
        self.phases.iter_mut().find(|p| p.phase == phase)
    }

    /// Progress of the phase currently being imported.
    pub fn current(&self) -> Option<&PhaseProgress> {
        self.phase.entity().and_then(|p| self.progress(p))
    }

    pub fn current_mut(&mut self) -> Option<&mut PhaseProgress> {
        let phase = self.phase.entity()?;
        self.progress_mut(phase)
    }

    /// Sum of counters over all phases.
    pub fn totals(&self) -> Counters {
        let mut totals = Counters::default();
        for p in &self.phases {
            totals.add(&p.counters);
        }
        totals
    }

    /// Mark the current phase complete and step forward.
    ///
    /// Returns the new phase. Reaching `Done` also finishes the job.
    pub fn complete_current_phase(&mut self) -> JobPhase {
        if let Some(progress) = self.current_mut() {
            progress.complete = true;
        }
        self.phase = self.sequencer().after(self.phase);
        if self.phase == JobPhase::Done {
            self.status = JobStatus::Done;
        }
        self.phase
    }

    /// Record that a batch committed at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
        }
        self.last_activity_at = now;
    }

    /// Unrecoverable storage fault: terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.phase = JobPhase::Failed;
        self.status = JobStatus::Failed;
        self.failure = Some(reason.into());
        self.last_activity_at = now;
    }

    /// Reclaimed by the reaper. Does not refresh `last_activity_at`, so the
    /// tombstone ages out on schedule.
    pub fn mark_expired(&mut self) {
        self.status = JobStatus::Expired;
        self.lease = None;
    }
}
