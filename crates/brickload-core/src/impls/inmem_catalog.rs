//! InMemoryCatalog - テスト用の対象ストア
//!
//! 3 つのテーブルを 1 つの Mutex で守る。
//! elements の upsert は参照先の part / color が無ければ placeholder を作る。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::upsert::{Existing, plan};
use crate::domain::{
    CatalogRecord, ColorRecord, ElementRecord, ImportStamp, PartRecord, Phase, UpsertContext,
    UpsertOutcome,
};
use crate::ports::{CatalogStore, StoreError};

#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    stamp: Option<ImportStamp>,
}

#[derive(Default)]
struct Tables {
    colors: BTreeMap<i32, Stamped<ColorRecord>>,
    parts: BTreeMap<String, Stamped<PartRecord>>,
    elements: BTreeMap<(String, i32), Stamped<ElementRecord>>,
}

fn upsert_into<K: Ord, V: PartialEq + Clone>(
    table: &mut BTreeMap<K, Stamped<V>>,
    key: K,
    incoming: &V,
    ctx: &UpsertContext,
) -> UpsertOutcome {
    let existing = table.get(&key).map(|s| Existing {
        value: &s.value,
        stamp: s.stamp,
    });
    let decision = plan(existing, incoming, ctx);
    let entry = table.entry(key).or_insert_with(|| Stamped {
        value: incoming.clone(),
        stamp: None,
    });
    if decision.write_payload {
        entry.value = incoming.clone();
    }
    if decision.write_stamp {
        entry.stamp = Some(ctx.stamp(decision.outcome));
    }
    decision.outcome
}

/// In-memory catalog. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn color(&self, id: i32) -> Option<ColorRecord> {
        self.tables.lock().await.colors.get(&id).map(|s| s.value.clone())
    }

    pub async fn part(&self, part_num: &str) -> Option<PartRecord> {
        self.tables
            .lock()
            .await
            .parts
            .get(part_num)
            .map(|s| s.value.clone())
    }

    pub async fn element(&self, part_num: &str, color_id: i32) -> Option<ElementRecord> {
        self.tables
            .lock()
            .await
            .elements
            .get(&(part_num.to_string(), color_id))
            .map(|s| s.value.clone())
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn upsert(
        &self,
        record: &CatalogRecord,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        let outcome = match record {
            CatalogRecord::Color(c) => upsert_into(&mut tables.colors, c.id, c, ctx),
            CatalogRecord::Part(p) => upsert_into(&mut tables.parts, p.part_num.clone(), p, ctx),
            CatalogRecord::Element(e) => {
                tables
                    .parts
                    .entry(e.part_num.clone())
                    .or_insert_with(|| Stamped {
                        value: PartRecord::placeholder(e.part_num.clone()),
                        stamp: None,
                    });
                tables.colors.entry(e.color_id).or_insert_with(|| Stamped {
                    value: ColorRecord::placeholder(e.color_id),
                    stamp: None,
                });
                upsert_into(
                    &mut tables.elements,
                    (e.part_num.clone(), e.color_id),
                    e,
                    ctx,
                )
            }
        };
        Ok(outcome)
    }

    async fn count(&self, phase: Phase) -> Result<u64, StoreError> {
        let tables = self.tables.lock().await;
        let n = match phase {
            Phase::Colors => tables.colors.len(),
            Phase::Parts => tables.parts.len(),
            Phase::Elements => tables.elements.len(),
        };
        Ok(n as u64)
    }
}
