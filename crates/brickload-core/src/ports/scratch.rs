//! ScratchSpace port - 展開済みソースの一時領域
//!
//! job ごとにディレクトリを確保し、done / failed / expired で解放する。

use std::io;
use std::path::{Path, PathBuf};

use crate::domain::JobId;

/// Scoped disk space for extracted archive contents.
pub trait ScratchSpace: Send + Sync {
    /// Create (or reuse) the directory owned by `job_id`.
    fn allocate(&self, job_id: JobId) -> io::Result<PathBuf>;

    /// Remove a directory previously returned by `allocate`. Missing is fine.
    fn release(&self, dir: &Path) -> io::Result<()>;
}
