pub mod errors;
pub mod retry;

pub use errors::{ErrorCode, RuntimeError, SendableError};
pub use retry::{BackoffPolicy, MaxRetries, RetryPolicy};
