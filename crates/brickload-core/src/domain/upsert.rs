//! Upsert decision rules shared by every catalog store.
//!
//! Stores only know how to read and write; what a write *means*
//! (inserted / updated / unchanged) is decided here, once.

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// What an upsert did to the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inserted" => Some(UpsertOutcome::Inserted),
            "updated" => Some(UpsertOutcome::Updated),
            "unchanged" => Some(UpsertOutcome::Unchanged),
            _ => None,
        }
    }
}

/// How a natural key repeated inside one uploaded source is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// The later occurrence is written and counted `updated`.
    #[default]
    LastWins,
    /// The later occurrence is dropped and counted `skipped`.
    FirstWins,
}

/// Who is writing which source row, and under which duplicate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertContext {
    pub job_id: JobId,
    /// 1-based data row within the current phase's source.
    pub row: u64,
    pub duplicates: DuplicateKeyPolicy,
}

impl UpsertContext {
    pub fn new(job_id: JobId, duplicates: DuplicateKeyPolicy) -> Self {
        Self {
            job_id,
            row: 0,
            duplicates,
        }
    }

    pub fn at_row(self, row: u64) -> Self {
        Self { row, ..self }
    }

    pub fn stamp(&self, outcome: UpsertOutcome) -> ImportStamp {
        ImportStamp {
            job_id: self.job_id,
            row: self.row,
            outcome,
        }
    }
}

/// Source position that last wrote or confirmed a key, and how it was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStamp {
    pub job_id: JobId,
    pub row: u64,
    pub outcome: UpsertOutcome,
}

/// The stored state of a key, as a store sees it before writing.
#[derive(Debug, Clone, Copy)]
pub struct Existing<'a, V> {
    pub value: &'a V,
    /// `None` for placeholders.
    pub stamp: Option<ImportStamp>,
}

/// What the store must write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertPlan {
    pub outcome: UpsertOutcome,
    /// Replace the stored payload with the incoming one.
    pub write_payload: bool,
    /// Replace the stamp with `ctx.stamp(outcome)`.
    pub write_stamp: bool,
}

/// Decide insert / update / no-op for one incoming value.
///
/// A key stamped by the current job at the same row was written by a batch
/// whose commit never landed: the stored outcome is reported again and
/// nothing is rewritten. Stamped by the current job at another row, it is a
/// duplicate within the source and `ctx.duplicates` decides. Otherwise the
/// payload comparison decides, and the stamp is refreshed so later
/// duplicates are recognized.
pub fn plan<V: PartialEq>(
    existing: Option<Existing<'_, V>>,
    incoming: &V,
    ctx: &UpsertContext,
) -> UpsertPlan {
    let Some(existing) = existing else {
        return UpsertPlan {
            outcome: UpsertOutcome::Inserted,
            write_payload: true,
            write_stamp: true,
        };
    };

    if let Some(stamp) = existing.stamp
        && stamp.job_id == ctx.job_id
    {
        if stamp.row == ctx.row {
            return UpsertPlan {
                outcome: stamp.outcome,
                write_payload: false,
                write_stamp: false,
            };
        }
        return match ctx.duplicates {
            DuplicateKeyPolicy::LastWins => UpsertPlan {
                outcome: UpsertOutcome::Updated,
                write_payload: true,
                write_stamp: false,
            },
            DuplicateKeyPolicy::FirstWins => UpsertPlan {
                outcome: UpsertOutcome::Unchanged,
                write_payload: false,
                write_stamp: false,
            },
        };
    }

    if existing.value == incoming {
        UpsertPlan {
            outcome: UpsertOutcome::Unchanged,
            write_payload: false,
            write_stamp: true,
        }
    } else {
        UpsertPlan {
            outcome: UpsertOutcome::Updated,
            write_payload: true,
            write_stamp: true,
        }
    }
}
