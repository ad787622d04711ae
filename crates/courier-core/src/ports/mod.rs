//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（SQLite, HTTP クライアント, 時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod executor;
pub mod request_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{FnExecutor, RequestExecutor};
pub use self::request_store::RequestStore;
