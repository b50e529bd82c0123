//! JobStore port - ジョブ記述子の正本（source of truth）
//!
//! プロセス内のグローバルな map ではなく、注入可能な key/value ストア。
//! 複数プロセスから同じ job を触っても正しく動くことが要件。
//!
//! # 実装
//! - `impls::InMemoryJobStore`（テスト・単一プロセス用）
//! - `impls::SqliteJobStore`（再起動をまたいで永続）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobDescriptor, JobId, Lease, LeaseToken};

/// Failure of a backing store (descriptor store or catalog).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("failed to (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    /// Injected or simulated write failure.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

/// Result of a compare-and-swap style lease acquisition.
#[derive(Debug, Clone)]
pub enum LeaseAttempt {
    /// The lease is ours; the descriptor returned carries it.
    Acquired(JobDescriptor),
    /// Someone else holds a live lease.
    Held(Lease),
    /// No such job.
    Missing,
}

/// JobStore は job descriptor と lease の正本
///
/// # 設計原則
/// - Lease の権威はここにある（acquire / commit は原子的）
/// - commit は lease を持っている呼び出しだけが成功する
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<JobDescriptor>, StoreError>;

    /// Store a freshly prepared descriptor.
    async fn insert(&self, descriptor: &JobDescriptor) -> Result<(), StoreError>;

    /// Take the job's lease unless another live lease exists.
    ///
    /// An expired lease is taken over.
    async fn try_acquire_lease(&self, id: JobId, lease: Lease) -> Result<LeaseAttempt, StoreError>;

    /// Persist `descriptor` and clear the lease, only if `owner` still holds it.
    ///
    /// Returns `false` (and writes nothing) when the lease was lost.
    async fn commit(&self, descriptor: &JobDescriptor, owner: LeaseToken) -> Result<bool, StoreError>;

    /// Drop the lease without touching anything else. No-op if not held by `owner`.
    async fn release_lease(&self, id: JobId, owner: LeaseToken) -> Result<(), StoreError>;

    /// Unconditional overwrite, for maintenance (reaper). Fails on unknown ids.
    async fn replace(&self, descriptor: &JobDescriptor) -> Result<(), StoreError>;

    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<JobDescriptor>, StoreError>;
}
