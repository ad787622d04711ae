//! RetryConfig and its named presets.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{CourierError, ErrorKind};

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Immutable retry/backoff parameters.
///
/// Presets are plain constructors (`default_config`, `aggressive`, `quick`,
/// `no_retry`); tweak them with the `with_*` builders.
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` means "try once".
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the capped delay used as symmetric jitter, in `[0, 1]`.
    pub jitter_factor: f64,
    should_retry: RetryPredicate,
}

impl RetryConfig {
    /// 3 retries, 1s → 30s, x2, ±10%.
    pub fn default_config() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            should_retry: Arc::new(|_: &(dyn Error + 'static)| true),
        }
    }

    /// 5 retries, 500ms → 60s, x2, ±20%.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.2,
            ..Self::default_config()
        }
    }

    /// 2 retries, 200ms → 1s, x1.5, ±10%.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
            multiplier: 1.5,
            jitter_factor: 0.1,
            ..Self::default_config()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
            ..Self::default_config()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = if jitter_factor.is_nan() {
            0.0
        } else {
            jitter_factor.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Only retry errors that are not known to be permanent.
    ///
    /// Errors that are not a [`CourierError`] are retried.
    pub fn transient_only(self) -> Self {
        self.with_should_retry(|error| match error.downcast_ref::<CourierError>() {
            Some(e) => e.kind() != ErrorKind::Permanent,
            None => true,
        })
    }

    pub fn should_retry(&self, error: &(dyn Error + 'static)) -> bool {
        (self.should_retry)(error)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_have_expected_budgets() {
        assert_eq!(RetryConfig::default().max_retries, 3);
        assert_eq!(RetryConfig::aggressive().max_retries, 5);
        assert_eq!(RetryConfig::quick().max_retries, 2);
        assert_eq!(RetryConfig::quick().max_delay, Duration::from_secs(1));
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }

    #[test]
    fn jitter_factor_is_clamped() {
        assert_eq!(RetryConfig::default().with_jitter_factor(3.0).jitter_factor, 1.0);
        assert_eq!(RetryConfig::default().with_jitter_factor(-1.0).jitter_factor, 0.0);
        assert_eq!(RetryConfig::default().with_jitter_factor(f64::NAN).jitter_factor, 0.0);
    }

    #[test]
    fn transient_only_skips_permanent_errors() {
        let config = RetryConfig::default().transient_only();
        assert!(config.should_retry(&CourierError::executor("timeout")));
        assert!(!config.should_retry(&CourierError::rejected("HTTP 400")));

        let io = std::io::Error::other("reset");
        assert!(config.should_retry(&io));
    }

    #[test]
    fn custom_predicate_is_used() {
        let config = RetryConfig::default().with_should_retry(|e| e.to_string().contains("503"));
        assert!(config.should_retry(&CourierError::executor("HTTP 503")));
        assert!(!config.should_retry(&CourierError::executor("HTTP 404")));
    }
}
