//! Domain model (ids, requests, headers, outcomes, errors).

pub mod errors;
pub mod headers;
pub mod ids;
pub mod outcome;
pub mod request;

pub use errors::{CourierError, ErrorKind};
pub use headers::Headers;
pub use ids::RequestId;
pub use outcome::RetryOutcome;
pub use request::{NewRequest, Priority, QueuedRequest};
