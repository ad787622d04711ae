//! Domain identifiers.
//!
//! Request identity is assigned by the store (SQLite AUTOINCREMENT or the
//! in-memory counter) and is never reused, so a plain integer newtype is
//! enough. The newtype keeps it from being confused with retry counts or
//! timestamps, which are also integers on disk.

use serde::{Deserialize, Serialize};
use std::fmt;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i64);

impl RequestId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
