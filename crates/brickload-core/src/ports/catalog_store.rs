//! CatalogStore port - upsert by natural key
//!
//! 対象ストアの内部スキーマはここでは決めない。
//! 「自然キーで insert / update / no-op」だけが契約。

use async_trait::async_trait;

use crate::domain::{CatalogRecord, Phase, UpsertContext, UpsertOutcome};
use crate::ports::StoreError;

/// CatalogStore は colors / parts / elements の対象ストア
///
/// # 設計原則
/// - 1 件ごとに durable（batch 全体を 1 トランザクションにしない）
/// - 判定ロジックは `domain::upsert::plan` に委譲する
/// - 別 job からの同時 upsert に耐える（last-writer-wins）
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upsert(
        &self,
        record: &CatalogRecord,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Number of stored records of one kind (placeholders included).
    async fn count(&self, phase: Phase) -> Result<u64, StoreError>;
}
