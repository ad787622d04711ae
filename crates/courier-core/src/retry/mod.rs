//! Retry/backoff policy: pure delay computation plus a bounded-retry wrapper.
//!
//! Stateless; knows nothing about the request store. Used standalone around
//! a single network call, and by the queue processor to pace retries of
//! persisted requests.

mod backoff;
mod config;
mod policy;

pub use backoff::{compute_base_delay, compute_delay, compute_delay_with_rng};
pub use config::{RetryConfig, RetryPredicate};
pub use policy::{RetryResult, with_retry};
