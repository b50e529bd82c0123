//! brickload-core
//!
//! Resumable, lease-guarded batch importer for a colors / parts / elements catalog.
//!
//! 1 回の呼び出しは有限の作業だけを行い、状態はすべて job store に残す。
//! 呼び出し側が `run_batch` を done になるまで繰り返すことで長いインポートが進む。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, phase, job descriptor, records, upsert rules）
//! - **ports**: 抽象化レイヤー（JobStore, CatalogStore, RowSource, ScratchSpace, Clock, IdGenerator）
//! - **impls**: 実装（in-memory / SQLite / CSV / ディレクトリ）
//! - **app**: ImporterBuilder と Importer（prepare, run_batch, status, reap_expired）
//! - **config**: ImportConfig（ファイル + 環境変数 + validate）
//! - **error**: ImportError（呼び出し単位のエラー分類）
//! - **observability**: tracing の初期化と job 数の集計

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{Importer, ImporterBuilder, PrepareReport, ProgressSnapshot, ReapReport};
pub use config::ImportConfig;
pub use error::ImportError;
