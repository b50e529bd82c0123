//! ImporterBuilder - Importer の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 必須のコンポーネント（job store / catalog / scratch）が欠けていれば BuildError
//! - 設定が validate を通らなければ BuildError
//! - Clock / IdGenerator / RowSourceFactory は本番用のデフォルトを持つ

use std::sync::Arc;

use crate::config::{ConfigError, ImportConfig};
use crate::impls::CsvSourceFactory;
use crate::ports::{
    CatalogStore, Clock, IdGenerator, JobStore, RowSourceFactory, ScratchSpace, SystemClock,
    UlidGenerator,
};

/// BuildError は Importer 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}. Call ImporterBuilder::{0}() before build().")]
    MissingComponent(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// ImporterBuilder は Importer を構築
///
/// # 使用例
/// ```ignore
/// let importer = ImporterBuilder::new()
///     .config(config)
///     .job_store(SqliteJobStore::new(db.clone()))
///     .catalog(SqliteCatalog::new(db))
///     .scratch(DirScratchSpace::new(state_dir.join("scratch")))
///     .build()?;
/// ```
#[derive(Default)]
pub struct ImporterBuilder {
    config: Option<ImportConfig>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    jobs: Option<Arc<dyn JobStore>>,
    catalog: Option<Arc<dyn CatalogStore>>,
    scratch: Option<Arc<dyn ScratchSpace>>,
    sources: Option<Arc<dyn RowSourceFactory>>,
}

impl ImporterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ImportConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn job_store(mut self, jobs: impl JobStore + 'static) -> Self {
        self.jobs = Some(Arc::new(jobs));
        self
    }

    pub fn catalog(mut self, catalog: impl CatalogStore + 'static) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn scratch(mut self, scratch: impl ScratchSpace + 'static) -> Self {
        self.scratch = Some(Arc::new(scratch));
        self
    }

    pub fn row_sources(mut self, sources: impl RowSourceFactory + 'static) -> Self {
        self.sources = Some(Arc::new(sources));
        self
    }

    pub fn build(self) -> Result<Importer, BuildError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Importer {
            config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock))),
            jobs: self.jobs.ok_or(BuildError::MissingComponent("job_store"))?,
            catalog: self.catalog.ok_or(BuildError::MissingComponent("catalog"))?,
            scratch: self.scratch.ok_or(BuildError::MissingComponent("scratch"))?,
            sources: self
                .sources
                .unwrap_or_else(|| Arc::new(CsvSourceFactory)),
        })
    }
}

/// Importer は取り込みエンジンの表面
///
/// prepare / run_batch / status / reap_expired はそれぞれ
/// preparer.rs / runner.rs / status.rs / reaper.rs に実装されている。
/// すべての状態は job store にあり、Importer 自身は何も保持しない。
pub struct Importer {
    pub(crate) config: ImportConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) catalog: Arc<dyn CatalogStore>,
    pub(crate) scratch: Arc<dyn ScratchSpace>,
    pub(crate) sources: Arc<dyn RowSourceFactory>,
}

impl Importer {
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }
}
