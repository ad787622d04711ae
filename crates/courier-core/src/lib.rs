//! courier-core
//!
//! Persistent retry queue for outbound device telemetry.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request, outcome, errors）
//! - **ports**: 抽象化レイヤー（RequestStore, RequestExecutor, Clock）
//! - **queue**: ストア実装（SQLite, InMemory）と RetryQueue ファサード
//! - **retry**: バックオフ計算と `with_retry`
//! - **app**: QueueProcessor（ドレインループ）
//! - **config**: 容量・期限などの設定
//! - **observability**: カウンタと集計ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod retry;

pub use app::{DrainOutcome, QueueProcessor};
pub use config::QueueConfig;
pub use domain::{
    CourierError, Headers, NewRequest, Priority, QueuedRequest, RequestId, RetryOutcome,
};
pub use queue::{InMemoryRequestStore, RetryQueue, SqliteRequestStore};
pub use retry::{RetryConfig, RetryResult, compute_delay, with_retry};
