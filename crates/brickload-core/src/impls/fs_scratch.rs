//! DirScratchSpace - `<root>/<job_id>/` per job

use std::io;
use std::path::{Path, PathBuf};

use crate::domain::JobId;
use crate::ports::ScratchSpace;

/// Scratch directories under a fixed root.
///
/// `release` refuses paths outside the root.
#[derive(Debug, Clone)]
pub struct DirScratchSpace {
    root: PathBuf,
}

impl DirScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScratchSpace for DirScratchSpace {
    fn allocate(&self, job_id: JobId) -> io::Result<PathBuf> {
        let dir = self.root.join(job_id.to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn release(&self, dir: &Path) -> io::Result<()> {
        if !dir.starts_with(&self.root) || dir == self.root {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a scratch directory", dir.display()),
            ));
        }
        match std::fs::remove_dir_all(dir) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
