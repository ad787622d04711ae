//! SQLite-backed request store.
//!
//! One connection behind one mutex: every operation is serialized, which is
//! plenty for tens of requests per minute. rusqlite is blocking, so each
//! operation runs on the blocking pool and the async caller only awaits the
//! join handle.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::config::QueueConfig;
use crate::domain::{CourierError, NewRequest, Priority, QueuedRequest, RequestId};
use crate::observability::QueueCounts;
use crate::ports::{Clock, RequestStore, SystemClock};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queued_requests (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint      TEXT    NOT NULL,
    method        TEXT    NOT NULL,
    body          TEXT    NOT NULL,
    headers       TEXT,
    priority      INTEGER NOT NULL DEFAULT 1,
    retries       INTEGER NOT NULL DEFAULT 0,
    max_retries   INTEGER NOT NULL DEFAULT 5,
    created_at    INTEGER NOT NULL,
    last_attempt  INTEGER,
    dedup_key     TEXT
);
CREATE INDEX IF NOT EXISTS idx_queued_requests_priority
    ON queued_requests(priority);
CREATE INDEX IF NOT EXISTS idx_queued_requests_created_at
    ON queued_requests(created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_queued_requests_dedup_key
    ON queued_requests(dedup_key) WHERE dedup_key IS NOT NULL;
";

const COLUMNS: &str = "id, endpoint, method, body, headers, priority, retries, max_retries, \
                       created_at, last_attempt, dedup_key";

#[derive(Clone)]
pub struct SqliteRequestStore {
    conn: Arc<Mutex<Connection>>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl SqliteRequestStore {
    pub fn open(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self, CourierError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config, Arc::new(SystemClock))
    }

    pub fn open_in_memory(config: QueueConfig) -> Result<Self, CourierError> {
        Self::from_connection(Connection::open_in_memory()?, config, Arc::new(SystemClock))
    }

    pub fn from_connection(
        conn: Connection,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CourierError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        // In-memory databases answer "memory" here; both are fine.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(journal_mode = %mode, "request store schema ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
            clock,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `f` against the connection on the blocking pool, holding the lock.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CourierError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, CourierError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| CourierError::LockPoisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn to_u32(idx: usize, value: i64) -> rusqlite::Result<u32> {
    u32::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn read_request(row: &Row<'_>) -> rusqlite::Result<QueuedRequest> {
    let headers = match row.get::<_, Option<String>>(4)? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        None => Default::default(),
    };
    let raw_priority: i64 = row.get(5)?;
    let priority = Priority::try_from(raw_priority)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, raw_priority))?;

    Ok(QueuedRequest {
        id: RequestId::new(row.get(0)?),
        endpoint: row.get(1)?,
        method: row.get(2)?,
        body: row.get(3)?,
        headers,
        priority,
        retries: to_u32(6, row.get(6)?)?,
        max_retries: to_u32(7, row.get(7)?)?,
        created_at: from_millis(8, row.get(8)?)?,
        last_attempt: row
            .get::<_, Option<i64>>(9)?
            .map(|ms| from_millis(9, ms))
            .transpose()?,
        dedup_key: row.get(10)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn enqueue(&self, request: NewRequest) -> Result<Option<RequestId>, CourierError> {
        let now = to_millis(self.clock.now());
        let max_queue_size = self.config.max_queue_size;
        let eviction_batch = self.config.eviction_batch;
        let default_max_retries = self.config.default_max_retries;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            if let Some(key) = &request.dedup_key {
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM queued_requests WHERE dedup_key = ?1",
                        params![key],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(None);
                }
            }

            let size: i64 =
                tx.query_row("SELECT COUNT(*) FROM queued_requests", [], |row| row.get(0))?;
            if size >= max_queue_size as i64 {
                let evicted = tx.execute(
                    "DELETE FROM queued_requests WHERE id IN (
                         SELECT id FROM queued_requests
                         ORDER BY priority ASC, created_at ASC, id ASC
                         LIMIT ?1
                     )",
                    params![eviction_batch as i64],
                )?;
                tracing::warn!(
                    size,
                    evicted,
                    "request queue at capacity, evicted oldest low-priority rows"
                );
            }

            let headers = serde_json::to_string(&request.headers)?;
            let max_retries = request.max_retries.unwrap_or(default_max_retries);
            let inserted = tx.execute(
                "INSERT INTO queued_requests
                     (endpoint, method, body, headers, priority, retries, max_retries,
                      created_at, last_attempt, dedup_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, NULL, ?8)",
                params![
                    request.endpoint,
                    request.method,
                    request.body,
                    headers,
                    request.priority.as_i64(),
                    max_retries,
                    now,
                    request.dedup_key,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let id = RequestId::new(tx.last_insert_rowid());
            tx.commit()?;
            Ok(Some(id))
        })
        .await
    }

    async fn peek_next(&self) -> Result<Option<QueuedRequest>, CourierError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM queued_requests
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1"
            );
            Ok(conn.query_row(&sql, [], read_request).optional()?)
        })
        .await
    }

    async fn get(&self, id: RequestId) -> Result<Option<QueuedRequest>, CourierError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM queued_requests WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![id.get()], read_request)
                .optional()?)
        })
        .await
    }

    async fn remove(&self, id: RequestId) -> Result<(), CourierError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM queued_requests WHERE id = ?1", params![id.get()])?;
            Ok(())
        })
        .await
    }

    async fn increment_retry(&self, id: RequestId) -> Result<(), CourierError> {
        let now = to_millis(self.clock.now());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE queued_requests
                 SET retries = retries + 1, last_attempt = ?2
                 WHERE id = ?1",
                params![id.get(), now],
            )?;
            Ok(())
        })
        .await
    }

    async fn cleanup_expired(&self) -> Result<usize, CourierError> {
        let cutoff = to_millis(self.clock.now() - self.config.expiry());
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM queued_requests WHERE created_at < ?1",
                params![cutoff],
            )?)
        })
        .await
    }

    async fn size(&self) -> Result<usize, CourierError> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM queued_requests", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn clear(&self) -> Result<(), CourierError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM queued_requests", [])?;
            Ok(())
        })
        .await
    }

    async fn counts_by_priority(&self) -> Result<QueueCounts, CourierError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*) FROM queued_requests GROUP BY priority",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

            let mut counts = QueueCounts::default();
            for row in rows {
                let (priority, n) = row?;
                counts.add(Priority::try_from(priority)?, n as usize);
            }
            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn store_with(config: QueueConfig) -> (SqliteRequestStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(start()));
        let store = SqliteRequestStore::open_in_memory(config)
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn enqueue_and_peek_roundtrips_all_columns() {
        let (store, _clock) = store_with(QueueConfig::default());
        let id = store
            .enqueue(
                NewRequest::new("/messages/", "POST", r#"{"text":"hi"}"#)
                    .with_priority(Priority::High)
                    .with_max_retries(3)
                    .with_header("Authorization", "Token abc")
                    .with_dedup_key("msg-1"),
            )
            .await
            .unwrap()
            .unwrap();

        let head = store.peek_next().await.unwrap().unwrap();
        assert_eq!(head.id, id);
        assert_eq!(head.endpoint, "/messages/");
        assert_eq!(head.method, "POST");
        assert_eq!(head.body, r#"{"text":"hi"}"#);
        assert_eq!(head.priority, Priority::High);
        assert_eq!(head.max_retries, 3);
        assert_eq!(head.retries, 0);
        assert_eq!(head.created_at, start());
        assert_eq!(head.last_attempt, None);
        assert_eq!(head.dedup_key.as_deref(), Some("msg-1"));
        assert_eq!(head.headers.get("Authorization"), Some("Token abc"));

        // peek is read-only
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn headers_come_back_in_insertion_order() {
        let (store, _clock) = store_with(QueueConfig::default());
        store
            .enqueue(
                NewRequest::new("/contacts/", "POST", "[]")
                    .with_header("X-Device", "d1")
                    .with_header("Content-Type", "application/json")
                    .with_header("Authorization", "Token abc"),
            )
            .await
            .unwrap();

        let head = store.peek_next().await.unwrap().unwrap();
        let names: Vec<&str> = head.headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["X-Device", "Content-Type", "Authorization"]);
    }

    #[tokio::test]
    async fn default_max_retries_comes_from_config() {
        let (store, _clock) = store_with(QueueConfig {
            default_max_retries: 7,
            ..QueueConfig::default()
        });
        let id = store
            .enqueue(NewRequest::new("/contacts/", "POST", "[]"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().max_retries, 7);
    }

    #[tokio::test]
    async fn drains_in_priority_then_fifo_order() {
        let (store, clock) = store_with(QueueConfig::default());
        let plan = [
            Priority::Normal,
            Priority::Low,
            Priority::Critical,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ];
        for priority in plan {
            store
                .enqueue(NewRequest::new("/x", "POST", "").with_priority(priority))
                .await
                .unwrap();
            clock.advance(ChronoDuration::milliseconds(10));
        }

        let mut seen = Vec::new();
        while let Some(head) = store.peek_next().await.unwrap() {
            store.remove(head.id).await.unwrap();
            seen.push(head);
        }

        assert_eq!(seen.len(), plan.len());
        for pair in seen.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                assert!(pair[0].created_at <= pair[1].created_at);
            }
        }
    }

    #[tokio::test]
    async fn duplicate_dedup_key_is_rejected() {
        let (store, _clock) = store_with(QueueConfig::default());
        let req = NewRequest::new("/ack/", "POST", "{}").with_dedup_key("cmd-42");

        assert!(store.enqueue(req.clone()).await.unwrap().is_some());
        assert!(store.enqueue(req.clone()).await.unwrap().is_none());
        assert_eq!(store.size().await.unwrap(), 1);

        // null keys never collide
        store.enqueue(NewRequest::new("/a", "POST", "")).await.unwrap();
        store.enqueue(NewRequest::new("/a", "POST", "")).await.unwrap();
        assert_eq!(store.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn capacity_evicts_lowest_priority_oldest_batch() {
        let (store, clock) = store_with(QueueConfig::default());
        let mut low_ids = Vec::new();
        for i in 0..1000 {
            let priority = if i < 150 { Priority::Low } else { Priority::Normal };
            let id = store
                .enqueue(NewRequest::new("/x", "POST", "").with_priority(priority))
                .await
                .unwrap()
                .unwrap();
            if priority == Priority::Low {
                low_ids.push(id);
            }
            clock.advance(ChronoDuration::milliseconds(1));
        }
        assert_eq!(store.size().await.unwrap(), 1000);

        let newest = store
            .enqueue(NewRequest::new("/new", "POST", "").with_priority(Priority::Low))
            .await
            .unwrap();
        assert!(newest.is_some());
        assert_eq!(store.size().await.unwrap(), 901);

        for id in &low_ids[..100] {
            assert!(store.get(*id).await.unwrap().is_none());
        }
        for id in &low_ids[100..] {
            assert!(store.get(*id).await.unwrap().is_some());
        }
        let counts = store.counts_by_priority().await.unwrap();
        assert_eq!(counts.normal, 850);
        assert_eq!(counts.low, 51);
    }

    #[tokio::test]
    async fn cleanup_removes_rows_older_than_a_day() {
        let (store, clock) = store_with(QueueConfig::default());
        let stale = store
            .enqueue(NewRequest::new("/stale", "POST", "").with_priority(Priority::Critical))
            .await
            .unwrap()
            .unwrap();
        clock.advance(ChronoDuration::hours(2));
        let fresh = store
            .enqueue(NewRequest::new("/fresh", "POST", ""))
            .await
            .unwrap()
            .unwrap();

        // stale is now 25h old, fresh 23h
        clock.advance(ChronoDuration::hours(23));
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert!(store.get(stale).await.unwrap().is_none());
        assert!(store.get(fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn increment_retry_updates_in_place() {
        let (store, clock) = store_with(QueueConfig::default());
        let id = store
            .enqueue(NewRequest::new("/x", "POST", ""))
            .await
            .unwrap()
            .unwrap();
        clock.advance(ChronoDuration::seconds(30));

        store.increment_retry(id).await.unwrap();
        store.increment_retry(id).await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.retries, 2);
        assert_eq!(row.last_attempt, Some(start() + ChronoDuration::seconds(30)));

        // absent row: no-op
        store.increment_retry(RequestId::new(999)).await.unwrap();
        store.remove(RequestId::new(999)).await.unwrap();
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_clear() {
        let (store, _clock) = store_with(QueueConfig::default());
        let first = store
            .enqueue(NewRequest::new("/x", "POST", ""))
            .await
            .unwrap()
            .unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().await.unwrap());

        let second = store
            .enqueue(NewRequest::new("/x", "POST", ""))
            .await
            .unwrap()
            .unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let path = std::env::temp_dir().join(format!("courier-{}.db", ulid::Ulid::new()));
        {
            let store = SqliteRequestStore::open(&path, QueueConfig::default()).unwrap();
            store
                .enqueue(
                    NewRequest::new("/notifications/", "POST", "{}")
                        .with_priority(Priority::High)
                        .with_dedup_key("n-1"),
                )
                .await
                .unwrap();
        }

        let store = SqliteRequestStore::open(&path, QueueConfig::default()).unwrap();
        let head = store.peek_next().await.unwrap().unwrap();
        assert_eq!(head.endpoint, "/notifications/");
        assert_eq!(head.priority, Priority::High);
        assert!(
            store
                .enqueue(NewRequest::new("/notifications/", "POST", "{}").with_dedup_key("n-1"))
                .await
                .unwrap()
                .is_none()
        );
        drop(store);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
