//! RequestStore port - 送信待ちリクエストの正本（source of truth）
//!
//! # 設計原則
//! - 1 インスタンス = 1 ロック。すべての操作はこのロックで直列化される
//! - 実装は SQLite（永続）と InMemory（テスト・ディスクなし環境）
//! - executor の await 中にロックを保持しない（呼び出し側の責務）

use async_trait::async_trait;

use crate::domain::{CourierError, NewRequest, QueuedRequest, RequestId};
use crate::observability::QueueCounts;

/// Durable, priority-ordered, deduplicating storage of queued requests.
///
/// Dequeue order: `priority` descending, then `created_at` ascending, then
/// `id` ascending.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a request.
    ///
    /// Returns `Ok(None)` without inserting when `dedup_key` is already
    /// queued. When the store is at capacity, the least important, oldest
    /// rows are evicted first (`priority` ascending, `created_at` ascending).
    async fn enqueue(&self, request: NewRequest) -> Result<Option<RequestId>, CourierError>;

    /// The head of the queue, without removing it.
    async fn peek_next(&self) -> Result<Option<QueuedRequest>, CourierError>;

    async fn get(&self, id: RequestId) -> Result<Option<QueuedRequest>, CourierError>;

    /// Delete by identity. No-op if absent.
    async fn remove(&self, id: RequestId) -> Result<(), CourierError>;

    /// `retries += 1`, `last_attempt = now`. No-op if absent.
    async fn increment_retry(&self, id: RequestId) -> Result<(), CourierError>;

    /// Delete every row older than the expiry window; returns how many.
    async fn cleanup_expired(&self) -> Result<usize, CourierError>;

    async fn size(&self) -> Result<usize, CourierError>;

    async fn is_empty(&self) -> Result<bool, CourierError> {
        Ok(self.size().await? == 0)
    }

    async fn clear(&self) -> Result<(), CourierError>;

    async fn counts_by_priority(&self) -> Result<QueueCounts, CourierError>;
}
