use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use courier_core::domain::{CourierError, NewRequest, Priority, QueuedRequest, RetryOutcome};
use courier_core::observability::{DrainReport, ProcessorStats, QueueCounts};
use courier_core::ports::RequestExecutor;
use courier_core::{QueueConfig, QueueProcessor, RetryConfig, RetryQueue, SqliteRequestStore};

/// Pretends to be the HTTP layer: fails the first `n` calls, rejects
/// anything aimed at `/invalid/`, delivers the rest.
struct FlakyUplink {
    remaining_failures: AtomicU32,
}

impl FlakyUplink {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl RequestExecutor for FlakyUplink {
    async fn execute(&self, request: QueuedRequest) -> Result<RetryOutcome, CourierError> {
        if request.endpoint.starts_with("/invalid/") {
            return Ok(RetryOutcome::failed("HTTP 400"));
        }

        if let Ok(left) = self
            .remaining_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            return Ok(RetryOutcome::retry(format!("HTTP 503 (left={left})")));
        }

        tracing::info!(
            id = %request.id,
            method = %request.method,
            endpoint = %request.endpoint,
            "delivered"
        );
        Ok(RetryOutcome::Success)
    }
}

#[derive(Serialize)]
struct Summary {
    before: QueueCounts,
    drain: Option<DrainReport>,
    stats: ProcessorStats,
    remaining: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定と永続ストア
    let config = match std::env::var("COURIER_CONFIG") {
        Ok(path) => QueueConfig::from_json_file(path)?,
        Err(_) => QueueConfig::default(),
    }
    .with_env_overrides()?;
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "courier-queue.db".to_string());
    let store = SqliteRequestStore::open(&db_path, config)?;
    let queue = RetryQueue::new(Arc::new(store));

    // (B) テレメトリを投入（dedup_key が同じものは 1 件だけ残る）
    let samples = [
        NewRequest::new("/messages/", "POST", r#"{"thread":1,"text":"hi"}"#)
            .with_priority(Priority::High)
            .with_max_retries(3),
        NewRequest::new("/contacts/", "POST", r#"[{"name":"a"}]"#),
        NewRequest::new("/notifications/", "POST", r#"{"pkg":"x"}"#)
            .with_priority(Priority::Low),
        NewRequest::new("/commands/ack/", "POST", r#"{"command":7}"#)
            .with_priority(Priority::Critical)
            .with_dedup_key("ack-7"),
        NewRequest::new("/commands/ack/", "POST", r#"{"command":7}"#)
            .with_priority(Priority::Critical)
            .with_dedup_key("ack-7"),
        NewRequest::new("/invalid/", "POST", "{}"),
    ];
    for request in samples {
        let request = request.with_header("Content-Type", "application/json");
        let endpoint = request.endpoint.clone();
        if !queue.enqueue(request).await {
            tracing::info!(%endpoint, "not queued");
        }
    }
    let before = queue.counts_by_priority().await;

    // (C) 単発呼び出しの即時リトライ（永続化なし）
    let pings = AtomicU32::new(0);
    let ping = courier_core::with_retry(&RetryConfig::quick(), || {
        let n = pings.fetch_add(1, Ordering::Relaxed);
        async move {
            if n == 0 {
                Err(CourierError::executor("connection reset"))
            } else {
                Ok(n)
            }
        }
    })
    .await;
    tracing::info!(attempts = ping.attempts(), ok = ping.is_success(), "health ping");

    // (D) ドレイン
    let pacing = RetryConfig::default()
        .with_initial_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2));
    let processor =
        QueueProcessor::new(queue.clone(), Arc::new(FlakyUplink::new(2))).with_pacing(pacing);
    let outcome = processor.drain().await;

    let summary = Summary {
        before,
        drain: outcome.report().copied(),
        stats: processor.stats().await,
        remaining: queue.size().await,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
