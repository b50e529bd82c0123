//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryJobStore / InMemoryCatalog**: テスト・単一プロセス用
//! - **SqliteJobStore / SqliteCatalog**: 再起動・複数プロセスをまたいで永続
//! - **CsvRowSource**: 正規化済み CSV の cursor 読み込み
//! - **DirScratchSpace**: 展開先ディレクトリ

pub mod csv_source;
pub mod fs_scratch;
pub mod inmem_catalog;
pub mod inmem_job_store;
pub mod sqlite;

pub use self::csv_source::{CsvRowSource, CsvSourceFactory, CsvSummary, summarize};
pub use self::fs_scratch::DirScratchSpace;
pub use self::inmem_catalog::InMemoryCatalog;
pub use self::inmem_job_store::InMemoryJobStore;
pub use self::sqlite::{SqliteCatalog, SqliteDatabase, SqliteJobStore};
