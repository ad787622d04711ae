//! Queue module: request stores and the non-throwing queue facade.

mod memory;
mod sqlite;

pub use memory::InMemoryRequestStore;
pub use sqlite::SqliteRequestStore;

use std::sync::Arc;

use crate::domain::{NewRequest, QueuedRequest, RequestId};
use crate::observability::QueueCounts;
use crate::ports::RequestStore;

/// The queue as seen by callers (UI, background workers, the processor).
///
/// Storage failures never cross this API: they are logged and turned into
/// `false` / `None` / `0`. A caller that cannot tolerate losing a request
/// must check the `enqueue` result and keep its own fallback.
#[derive(Clone)]
pub struct RetryQueue {
    store: Arc<dyn RequestStore>,
}

impl RetryQueue {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// `true` iff the request was persisted.
    pub async fn enqueue(&self, request: NewRequest) -> bool {
        let endpoint = request.endpoint.clone();
        match self.store.enqueue(request).await {
            Ok(Some(id)) => {
                tracing::debug!(%id, %endpoint, "request queued");
                true
            }
            Ok(None) => {
                tracing::debug!(%endpoint, "duplicate dedup key, request not queued");
                false
            }
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "failed to persist request");
                false
            }
        }
    }

    pub async fn peek_next(&self) -> Option<QueuedRequest> {
        self.store.peek_next().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read queue head");
            None
        })
    }

    pub async fn get(&self, id: RequestId) -> Option<QueuedRequest> {
        self.store.get(id).await.unwrap_or_else(|e| {
            tracing::warn!(%id, error = %e, "failed to read request");
            None
        })
    }

    pub async fn remove(&self, id: RequestId) {
        if let Err(e) = self.store.remove(id).await {
            tracing::warn!(%id, error = %e, "failed to remove request");
        }
    }

    pub async fn increment_retry(&self, id: RequestId) {
        if let Err(e) = self.store.increment_retry(id).await {
            tracing::warn!(%id, error = %e, "failed to record retry");
        }
    }

    pub async fn cleanup_expired(&self) -> usize {
        match self.store.cleanup_expired().await {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(expired = n, "dropped expired requests");
                }
                n
            }
            Err(e) => {
                tracing::warn!(error = %e, "expiry sweep failed");
                0
            }
        }
    }

    pub async fn size(&self) -> usize {
        self.store.size().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to count requests");
            0
        })
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    pub async fn clear(&self) {
        match self.store.clear().await {
            Ok(()) => tracing::info!("request queue cleared"),
            Err(e) => tracing::warn!(error = %e, "failed to clear request queue"),
        }
    }

    pub async fn counts_by_priority(&self) -> QueueCounts {
        self.store.counts_by_priority().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to count requests by priority");
            QueueCounts::default()
        })
    }
}
