//! PhaseSequencer - フェーズ遷移の純粋関数
//!
//! `colors → parts → elements → done`。存在しないフェーズはスキップ。
//! `failed` はどこからでも到達可能で、終端。

use std::collections::BTreeSet;

use super::phase::{JobPhase, Phase};

/// Encodes the fixed dependency order over the phases present in one job.
///
/// Pure: it only answers "what comes next", the caller applies the transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSequencer {
    present: BTreeSet<Phase>,
}

impl PhaseSequencer {
    pub fn new(present: impl IntoIterator<Item = Phase>) -> Self {
        Self {
            present: present.into_iter().collect(),
        }
    }

    /// First phase to run, or `Done` when nothing is present.
    pub fn first(&self) -> JobPhase {
        self.present
            .first()
            .copied()
            .map(JobPhase::from)
            .unwrap_or(JobPhase::Done)
    }

    /// Phase following `current` once it is complete.
    ///
    /// Terminal phases stay where they are; there is no way back.
    pub fn after(&self, current: JobPhase) -> JobPhase {
        let Some(phase) = current.entity() else {
            return current;
        };
        self.present
            .range((std::ops::Bound::Excluded(phase), std::ops::Bound::Unbounded))
            .next()
            .copied()
            .map(JobPhase::from)
            .unwrap_or(JobPhase::Done)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.present.contains(&phase)
    }

    /// Present phases in run order.
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.present.iter().copied()
    }
}
