//! App - アプリケーション層
//!
//! ports を組み合わせて取り込みエンジンを実装します。
//!
//! # 主要コンポーネント
//! - **ImporterBuilder / Importer**: 構築とワイヤリング、公開 API
//! - **preparer**: アーカイブの検証・展開・行数カウント
//! - **runner**: lease 付きの 1 バッチ実行
//! - **status**: 進捗スナップショット
//! - **reaper**: TTL 切れ job の回収

pub mod builder;
pub mod preparer;
pub mod reaper;
pub mod runner;
pub mod status;

pub use self::builder::{BuildError, Importer, ImporterBuilder};
pub use self::preparer::{PhaseSummary, PrepareReport};
pub use self::reaper::ReapReport;
pub use self::runner::MAX_BATCH_MESSAGES;
pub use self::status::{BatchReport, PhaseSnapshot, ProgressSnapshot};
