//! Errors - エラー型と分類
//!
//! Ports (store, executor) return `Result<_, CourierError>`. The public
//! queue facade and the processor never propagate these for ordinary failure
//! modes; they log and downgrade to a plain value instead.

use thiserror::Error;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: ストレージ / ランタイムの障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("request store lock poisoned")]
    LockPoisoned,

    #[error("invalid priority value {0} (expected 0..=3)")]
    InvalidPriority(i64),

    #[error("header codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A failure reported by a request executor (network error, timeout, ...).
    #[error("executor error: {0}")]
    Executor(String),

    /// A request executor rejected the request outright (validation, auth).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl CourierError {
    pub fn executor(message: impl Into<String>) -> Self {
        Self::Executor(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::Executor(_) => ErrorKind::Transient,
            CourierError::Rejected(_)
            | CourierError::InvalidPriority(_)
            | CourierError::Codec(_) => ErrorKind::Permanent,
            CourierError::Storage(_) | CourierError::LockPoisoned | CourierError::TaskJoin(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}
