//! Request model: what callers hand to the queue and what the queue hands back.
//!
//! The queue never interprets `endpoint`, `method`, `body` or `headers`.
//! It only orders, stores and counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::headers::Headers;
use super::ids::RequestId;

/// Dequeue priority. Higher values are drained first.
///
/// The discriminants are the on-disk encoding (`priority` column).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Priority {
    type Error = CourierError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(CourierError::InvalidPriority(other)),
        }
    }
}

/// A request as submitted by a caller, before the store assigns identity.
///
/// `max_retries: None` means "use the queue's configured default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub endpoint: String,
    pub method: String,
    pub body: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl NewRequest {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            body: body.into(),
            headers: Headers::new(),
            priority: Priority::Normal,
            max_retries: None,
            dedup_key: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A request as it lives in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub endpoint: String,
    pub method: String,
    pub body: String,
    pub headers: Headers,
    pub priority: Priority,

    /// Retryable failures reconciled so far.
    pub retries: u32,
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub dedup_key: Option<String>,
}

impl QueuedRequest {
    /// Build the stored form of `new` with store-owned identity and bookkeeping.
    pub fn from_new(
        id: RequestId,
        new: NewRequest,
        default_max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            endpoint: new.endpoint,
            method: new.method,
            body: new.body,
            headers: new.headers,
            priority: new.priority,
            retries: 0,
            max_retries: new.max_retries.unwrap_or(default_max_retries),
            created_at,
            last_attempt: None,
            dedup_key: new.dedup_key,
        }
    }

    /// Would one more retryable failure exhaust this request?
    pub fn is_last_attempt(&self) -> bool {
        self.retries + 1 >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn priorities_are_ordered() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[rstest]
    #[case(0, Priority::Low)]
    #[case(1, Priority::Normal)]
    #[case(2, Priority::High)]
    #[case(3, Priority::Critical)]
    fn priority_decodes_column_value(#[case] raw: i64, #[case] expected: Priority) {
        assert_eq!(Priority::try_from(raw).unwrap(), expected);
        assert_eq!(expected.as_i64(), raw);
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        assert!(matches!(
            Priority::try_from(9),
            Err(CourierError::InvalidPriority(9))
        ));
    }

    #[test]
    fn from_new_applies_default_max_retries() {
        let new = NewRequest::new("/contacts/", "POST", "{}").with_header("X-Device", "d1");
        let stored = QueuedRequest::from_new(RequestId::new(1), new, 5, Utc::now());
        assert_eq!(stored.max_retries, 5);
        assert_eq!(stored.retries, 0);
        assert_eq!(stored.headers.get("X-Device"), Some("d1"));
        assert!(stored.last_attempt.is_none());
    }

    #[rstest]
    #[case(0, 2, false)]
    #[case(1, 2, true)]
    #[case(0, 1, true)]
    #[case(0, 0, true)]
    fn last_attempt_boundary(#[case] retries: u32, #[case] max: u32, #[case] last: bool) {
        let mut stored = QueuedRequest::from_new(
            RequestId::new(1),
            NewRequest::new("/x", "POST", "").with_max_retries(max),
            5,
            Utc::now(),
        );
        stored.retries = retries;
        assert_eq!(stored.is_last_attempt(), last);
    }
}
