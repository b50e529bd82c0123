//! RowSource port - フェーズごとの行ストリーム
//!
//! `seek(cursor)` + `read_next(n)` の cursor capability。
//! Checkpoint があればそこへ直接 seek し、なければ先頭から読み飛ばす。

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::{Checkpoint, RawRow, RowParseError};

/// Job-level failure reading a source (not a per-row problem).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read source '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One row read from a source.
#[derive(Debug, Clone)]
pub struct SourceRow {
    /// Position just past this row; resuming here reads the next row.
    pub end: Checkpoint,
    pub row: Result<RawRow, RowParseError>,
}

/// Forward-only, resumable reader over one phase's rows.
pub trait RowSource: Send {
    /// Position the reader at `cursor` (rows already consumed).
    fn seek(&mut self, cursor: u64, checkpoint: Option<Checkpoint>) -> Result<(), SourceError>;

    /// Read up to `n` rows. Fewer means the source is exhausted.
    fn read_next(&mut self, n: usize) -> Result<Vec<SourceRow>, SourceError>;
}

/// Opens row sources for prepared files.
pub trait RowSourceFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn RowSource>, SourceError>;
}
