//! Generic async primitives: deadlines, bounded retries and periodic tasks

pub mod retry;
pub mod task;

pub use retry::{always_retry, retry_with_backoff, with_timeout, RetryOptions, TimeoutElapsed};
pub use task::{ScheduledTask, ScheduledTaskOptions};
