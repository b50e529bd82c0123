//! Errors - 行レベルのエラーと分類
//!
//! ジョブ全体のエラー（`ImportError`）は `crate::error` にあります。
//! ここには batch を止めない行単位のエラーと、運用上の分類だけを置きます。

use thiserror::Error;

/// ErrorKind はエラーの運用分類
///
/// - Retryable: 同じ呼び出しをやり直せば進む可能性がある（cursor は動いていない）
/// - Permanent: やり直しても同じ結果（新しい prepare が必要、または入力の修正が必要）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

/// A row that failed structural parsing.
///
/// Always recovered: counted in the phase's `errors` and otherwise dropped.
/// `row` is the 1-based data row number within the source (header excluded).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowParseError {
    #[error("row {row}: missing {field}")]
    MissingField { row: u64, field: &'static str },

    #[error("row {row}: invalid {field} '{value}'")]
    InvalidInteger {
        row: u64,
        field: &'static str,
        value: String,
    },

    #[error("row {row}: invalid rgb '{value}'")]
    InvalidRgb { row: u64, value: String },

    #[error("row {row}: expected {expected} fields, found {found}")]
    FieldCount { row: u64, expected: usize, found: usize },

    #[error("row {row}: not valid UTF-8")]
    Encoding { row: u64 },
}

impl RowParseError {
    pub fn row(&self) -> u64 {
        match self {
            RowParseError::MissingField { row, .. }
            | RowParseError::InvalidInteger { row, .. }
            | RowParseError::InvalidRgb { row, .. }
            | RowParseError::FieldCount { row, .. }
            | RowParseError::Encoding { row } => *row,
        }
    }
}
