//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! 各 trait は外部リソース（ジョブストア、対象ストア、ファイル、時刻）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod catalog_store;
pub mod clock;
pub mod id_generator;
pub mod job_store;
pub mod row_source;
pub mod scratch;

pub use self::catalog_store::CatalogStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{JobStore, LeaseAttempt, StoreError};
pub use self::row_source::{RowSource, RowSourceFactory, SourceError, SourceRow};
pub use self::scratch::ScratchSpace;
