//! In-memory request store.
//!
//! Same semantics as the SQLite store, minus durability. Useful in tests and
//! for callers that keep an in-memory fallback when the disk store fails.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::QueueConfig;
use crate::domain::{CourierError, NewRequest, Priority, QueuedRequest, RequestId};
use crate::observability::QueueCounts;
use crate::ports::{Clock, RequestStore, SystemClock};

/// Ordering key for the ready set.
///
/// `Ord` is arranged so that the *smallest* key is the queue head:
/// highest priority first, then oldest, then lowest id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: Priority,
    created_at: DateTime<Utc>,
    id: RequestId,
}

impl QueueKey {
    fn of(record: &QueuedRequest) -> Self {
        Self {
            priority: record.priority,
            created_at: record.created_at,
            id: record.id,
        }
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

struct InMemoryState {
    /// Single source of truth for rows.
    records: HashMap<RequestId, QueuedRequest>,

    /// Dequeue order (ids only, via keys).
    ordered: BTreeSet<QueueKey>,

    /// dedup_key -> owning row.
    dedup: HashMap<String, RequestId>,

    next_id: i64,
}

impl InMemoryState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            ordered: BTreeSet::new(),
            dedup: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn remove(&mut self, id: RequestId) -> Option<QueuedRequest> {
        let record = self.records.remove(&id)?;
        self.ordered.remove(&QueueKey::of(&record));
        if let Some(key) = &record.dedup_key {
            self.dedup.remove(key);
        }
        Some(record)
    }

    /// Least important, oldest first.
    fn evict(&mut self, n: usize) -> usize {
        let mut victims: Vec<QueueKey> = self.ordered.iter().copied().collect();
        victims.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        victims
            .into_iter()
            .take(n)
            .filter(|key| self.remove(key.id).is_some())
            .count()
    }
}

pub struct InMemoryRequestStore {
    state: Mutex<InMemoryState>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl InMemoryRequestStore {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryState::new()),
            config,
            clock,
        }
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn enqueue(&self, request: NewRequest) -> Result<Option<RequestId>, CourierError> {
        let mut state = self.state.lock().await;

        if let Some(key) = &request.dedup_key
            && state.dedup.contains_key(key)
        {
            return Ok(None);
        }

        if state.records.len() >= self.config.max_queue_size {
            let evicted = state.evict(self.config.eviction_batch);
            tracing::warn!(evicted, "request queue at capacity, evicted oldest low-priority rows");
        }

        let id = state.allocate_id();
        let record = QueuedRequest::from_new(
            id,
            request,
            self.config.default_max_retries,
            self.clock.now(),
        );
        if let Some(key) = &record.dedup_key {
            state.dedup.insert(key.clone(), id);
        }
        state.ordered.insert(QueueKey::of(&record));
        state.records.insert(id, record);
        Ok(Some(id))
    }

    async fn peek_next(&self) -> Result<Option<QueuedRequest>, CourierError> {
        let state = self.state.lock().await;
        Ok(state
            .ordered
            .first()
            .and_then(|key| state.records.get(&key.id))
            .cloned())
    }

    async fn get(&self, id: RequestId) -> Result<Option<QueuedRequest>, CourierError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn remove(&self, id: RequestId) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        state.remove(id);
        Ok(())
    }

    async fn increment_retry(&self, id: RequestId) -> Result<(), CourierError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if let Some(record) = state.records.get_mut(&id) {
            record.retries += 1;
            record.last_attempt = Some(now);
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize, CourierError> {
        let cutoff = self.clock.now() - self.config.expiry();
        let mut state = self.state.lock().await;
        let expired: Vec<RequestId> = state
            .records
            .values()
            .filter(|record| record.created_at < cutoff)
            .map(|record| record.id)
            .collect();
        for id in &expired {
            state.remove(*id);
        }
        Ok(expired.len())
    }

    async fn size(&self) -> Result<usize, CourierError> {
        Ok(self.state.lock().await.records.len())
    }

    async fn clear(&self) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        state.records.clear();
        state.ordered.clear();
        state.dedup.clear();
        Ok(())
    }

    async fn counts_by_priority(&self) -> Result<QueueCounts, CourierError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for record in state.records.values() {
            counts.add(record.priority, 1);
        }
        Ok(counts)
    }
}
