//! ImportError - 呼び出し単位のエラー分類
//!
//! 行単位のエラー（`RowParseError`）はここに来ない。カウンタに積まれるだけ。

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{ErrorKind, JobId};
use crate::ports::{SourceError, StoreError};

#[derive(Debug, Error)]
pub enum ImportError {
    /// Malformed or unsupported upload.
    #[error("invalid archive: {0}")]
    Validation(String),

    #[error("{what} exceeds limit: {actual} > {limit}")]
    SizeLimitExceeded {
        what: String,
        limit: u64,
        actual: u64,
    },

    /// Unknown (or long-reclaimed) job id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Known job past its TTL. A fresh prepare is required.
    #[error("job {0} expired")]
    Expired(JobId),

    /// Another call holds the job's lease.
    #[error("job {job_id} is busy (lease held until {until})")]
    Conflict {
        job_id: JobId,
        until: DateTime<Utc>,
    },

    /// Target store write failed; the job is now `failed`.
    #[error("storage write failed for job {job_id}: {source}")]
    StorageWrite {
        job_id: JobId,
        #[source]
        source: StoreError,
    },

    /// Descriptor store fault; nothing was persisted by this call.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Validation(_) => "validation_error",
            ImportError::SizeLimitExceeded { .. } => "size_limit_exceeded",
            ImportError::NotFound(_) => "not_found",
            ImportError::Expired(_) => "expired",
            ImportError::Conflict { .. } => "conflict",
            ImportError::StorageWrite { .. } => "storage_write_error",
            ImportError::Store(_) => "store_error",
            ImportError::Source(_) => "source_error",
            ImportError::Io { .. } => "io_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::Conflict { .. }
            | ImportError::Store(_)
            | ImportError::Source(_)
            | ImportError::Io { .. } => ErrorKind::Retryable,
            ImportError::Validation(_)
            | ImportError::SizeLimitExceeded { .. }
            | ImportError::NotFound(_)
            | ImportError::Expired(_)
            | ImportError::StorageWrite { .. } => ErrorKind::Permanent,
        }
    }
}
