//! App - アプリケーション層
//!
//! ports と queue を組み合わせて送信ループを実装します。
//!
//! # 主要コンポーネント
//! - **QueueProcessor**: キューのドレイン（peek → execute → reconcile）

pub mod processor;

pub use self::processor::{DrainOutcome, QueueProcessor};
