//! Phases of an import job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One entity category of the catalog.
///
/// Declaration order is the dependency order: elements reference both
/// parts and colors, so they always come last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Colors,
    Parts,
    Elements,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Colors, Phase::Parts, Phase::Elements];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Colors => "colors",
            Phase::Parts => "parts",
            Phase::Elements => "elements",
        }
    }

    /// File name of the normalized source inside the job's scratch directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Phase::Colors => "colors.csv",
            Phase::Parts => "parts.csv",
            Phase::Elements => "elements.csv",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colors" => Ok(Phase::Colors),
            "parts" => Ok(Phase::Parts),
            "elements" => Ok(Phase::Elements),
            other => Err(format!("unknown phase '{other}'")),
        }
    }
}

/// Position of a job in its phase sequence.
///
/// `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Colors,
    Parts,
    Elements,
    Done,
    Failed,
}

impl JobPhase {
    /// The entity phase this job phase reads from, if any.
    pub fn entity(self) -> Option<Phase> {
        match self {
            JobPhase::Colors => Some(Phase::Colors),
            JobPhase::Parts => Some(Phase::Parts),
            JobPhase::Elements => Some(Phase::Elements),
            JobPhase::Done | JobPhase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Colors => "colors",
            JobPhase::Parts => "parts",
            JobPhase::Elements => "elements",
            JobPhase::Done => "done",
            JobPhase::Failed => "failed",
        }
    }
}

impl From<Phase> for JobPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Colors => JobPhase::Colors,
            Phase::Parts => JobPhase::Parts,
            Phase::Elements => JobPhase::Elements,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
