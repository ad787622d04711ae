//! QueueProcessor - drains the retry queue through a request executor.
//!
//! # フロー（1 サイクル）
//! 1. single-flight ガード（実行中なら何もしない）
//! 2. 期限切れの掃除（cleanup_expired）
//! 3. peek_next → executor → 結果に応じて remove / increment_retry
//! 4. キューが空になったら終了
//!
//! When to drain is not decided here; an external network observer calls
//! `drain()` when conditions look good.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::domain::{QueuedRequest, RequestId, RetryOutcome};
use crate::observability::{DrainReport, ProcessorStats};
use crate::ports::{Clock, RequestExecutor, SystemClock};
use crate::queue::RetryQueue;
use crate::retry::{RetryConfig, compute_delay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain cycle holds the guard; nothing was done.
    AlreadyRunning,
    Completed(DrainReport),
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::AlreadyRunning => None,
            DrainOutcome::Completed(report) => Some(report),
        }
    }
}

/// Resets the in-progress flag even if the drain future is dropped midway.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QueueProcessor {
    queue: RetryQueue,
    executor: Arc<dyn RequestExecutor>,

    /// Optional spacing between re-attempts of the same persisted request.
    /// `None` re-attempts as soon as the request reaches the head again.
    pacing: Option<RetryConfig>,
    clock: Arc<dyn Clock>,

    in_progress: AtomicBool,
    stats: Mutex<ProcessorStats>,
}

impl QueueProcessor {
    pub fn new(queue: RetryQueue, executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            queue,
            executor,
            pacing: None,
            clock: Arc::new(SystemClock),
            in_progress: AtomicBool::new(false),
            stats: Mutex::new(ProcessorStats::default()),
        }
    }

    /// Hold a retried request back until `last_attempt + compute_delay(retries)`.
    ///
    /// The wait happens inside the drain, so the rest of the queue waits too.
    pub fn with_pacing(mut self, pacing: RetryConfig) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Must be the same clock the store stamps `last_attempt` with.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn is_draining(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> ProcessorStats {
        *self.stats.lock().await
    }

    /// Drain until the queue is empty.
    pub async fn drain(&self) -> DrainOutcome {
        self.drain_with_limit(None).await
    }

    /// Drain until the queue is empty or `limit` requests were attempted.
    pub async fn drain_with_limit(&self, limit: Option<usize>) -> DrainOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already in progress, skipping");
            self.stats.lock().await.skipped_cycles += 1;
            return DrainOutcome::AlreadyRunning;
        }
        let _guard = DrainGuard(&self.in_progress);

        let mut report = DrainReport {
            expired: self.queue.cleanup_expired().await as u64,
            ..DrainReport::default()
        };

        // Request we already slept for; it runs on the next peek regardless.
        let mut paced: Option<RequestId> = None;
        // (id, retries) of the last reconciled request, to detect a store
        // that stopped applying our writes.
        let mut last_seen: Option<(RequestId, u32)> = None;

        loop {
            if let Some(limit) = limit
                && report.processed >= limit as u64
            {
                tracing::debug!(limit, "drain limit reached");
                break;
            }

            let Some(request) = self.queue.peek_next().await else {
                break;
            };

            if last_seen == Some((request.id, request.retries)) {
                tracing::warn!(id = %request.id, "queue head did not change after reconcile, stopping drain");
                break;
            }

            if paced != Some(request.id)
                && let Some(wait) = self.pacing_wait(&request)
            {
                tracing::debug!(id = %request.id, retries = request.retries, ?wait, "waiting before re-attempt");
                paced = Some(request.id);
                tokio::time::sleep(wait).await;
                continue;
            }
            paced = None;

            let outcome = self.execute(request.clone()).await;
            report.processed += 1;
            last_seen = Some((request.id, request.retries));
            self.reconcile(&request, outcome, &mut report).await;
        }

        {
            let mut stats = self.stats.lock().await;
            stats.cycles += 1;
            let totals = &mut stats.totals;
            totals.processed += report.processed;
            totals.succeeded += report.succeeded;
            totals.retried += report.retried;
            totals.exhausted += report.exhausted;
            totals.failed += report.failed;
            totals.expired += report.expired;
        }

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            retried = report.retried,
            dropped = report.dropped(),
            "drain cycle finished"
        );
        DrainOutcome::Completed(report)
    }

    /// How long `request` still has to wait before its next attempt.
    ///
    /// A delay too large to represent as a timestamp counts as already due.
    fn pacing_wait(&self, request: &QueuedRequest) -> Option<Duration> {
        let pacing = self.pacing.as_ref()?;
        if request.retries == 0 {
            return None;
        }
        let last_attempt = request.last_attempt?;
        let delay = chrono::Duration::from_std(compute_delay(request.retries, pacing)).ok()?;
        let due = last_attempt.checked_add_signed(delay)?;
        let now = self.clock.now();
        if due > now {
            (due - now).to_std().ok()
        } else {
            None
        }
    }

    /// Run the executor on its own task so a panic cannot take the loop down.
    async fn execute(&self, request: QueuedRequest) -> RetryOutcome {
        let executor = Arc::clone(&self.executor);
        let id = request.id;

        match tokio::spawn(async move { executor.execute(request).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(%id, error = %e, "executor returned an error, treating as retry");
                RetryOutcome::Retry(e.to_string())
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                tracing::warn!(%id, %reason, "executor crashed, treating as retry");
                RetryOutcome::Retry(reason)
            }
        }
    }

    async fn reconcile(
        &self,
        request: &QueuedRequest,
        outcome: RetryOutcome,
        report: &mut DrainReport,
    ) {
        let id = request.id;
        match outcome {
            RetryOutcome::Success => {
                self.queue.remove(id).await;
                report.succeeded += 1;
                tracing::debug!(%id, endpoint = %request.endpoint, "request delivered");
            }
            RetryOutcome::Retry(reason) if request.is_last_attempt() => {
                self.queue.remove(id).await;
                report.exhausted += 1;
                tracing::warn!(
                    %id,
                    endpoint = %request.endpoint,
                    retries = request.retries + 1,
                    max_retries = request.max_retries,
                    %reason,
                    "retry budget exhausted, dropping request"
                );
            }
            RetryOutcome::Retry(reason) => {
                self.queue.increment_retry(id).await;
                report.retried += 1;
                tracing::debug!(
                    %id,
                    retries = request.retries + 1,
                    max_retries = request.max_retries,
                    %reason,
                    "request kept for retry"
                );
            }
            RetryOutcome::Failed(reason) => {
                self.queue.remove(id).await;
                report.failed += 1;
                tracing::warn!(%id, endpoint = %request.endpoint, %reason, "permanent failure, dropping request");
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("executor panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("executor panicked: {s}")
    } else {
        "executor panicked".to_string()
    }
}
