//! RequestExecutor port - the boundary to the transport layer.
//!
//! The executor performs the actual network call for one queued request and
//! classifies the result. It should translate ordinary network failures into
//! `RetryOutcome::Retry` / `RetryOutcome::Failed`; an `Err` (or a panic) is
//! still tolerated and treated as `Retry` by the processor.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::domain::{CourierError, QueuedRequest, RetryOutcome};

#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: QueuedRequest) -> Result<RetryOutcome, CourierError>;
}

/// Adapts a closure `Fn(QueuedRequest) -> impl Future<Output = RetryOutcome>`
/// into a [`RequestExecutor`].
///
/// ```ignore
/// let executor = FnExecutor::new(|request: QueuedRequest| async move {
///     if request.endpoint == "/messages/" {
///         RetryOutcome::Success
///     } else {
///         RetryOutcome::retry("offline")
///     }
/// });
/// ```
pub struct FnExecutor<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(QueuedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = RetryOutcome> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> RequestExecutor for FnExecutor<F, Fut>
where
    F: Fn(QueuedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = RetryOutcome> + Send,
{
    async fn execute(&self, request: QueuedRequest) -> Result<RetryOutcome, CourierError> {
        Ok((self.f)(request).await)
    }
}
