//! Domain model (IDs, phases, job descriptor, records, upsert rules).
//!
//! I/O を持たない純粋なモデルだけを置く。
//! 永続化・ファイル読み込みは ports / impls 側。

pub mod errors;
pub mod ids;
pub mod job;
pub mod phase;
pub mod record;
pub mod row;
pub mod sequencer;
pub mod state;
pub mod upsert;

pub use errors::{ErrorKind, RowParseError};
pub use ids::{JobId, LeaseToken, ParseIdError};
pub use job::{Checkpoint, Counters, JobDescriptor, PhaseProgress};
pub use phase::{JobPhase, Phase};
pub use record::{CatalogRecord, ColorRecord, ElementRecord, NaturalKey, PartRecord};
pub use row::{RawRow, parse_row};
pub use sequencer::PhaseSequencer;
pub use state::{JobStatus, Lease};
pub use upsert::{DuplicateKeyPolicy, ImportStamp, UpsertContext, UpsertOutcome};
