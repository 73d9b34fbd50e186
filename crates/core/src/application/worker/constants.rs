// Worker constants
use std::time::Duration;

/// How long `stop()` callers should wait for in-flight jobs before giving up (60s)
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Error message recorded when a handler panics
pub const PANIC_MESSAGE_PREFIX: &str = "handler panicked";

/// Error message recorded when a grouped handler returns fewer results than jobs
pub const MISSING_GROUP_RESULT: &str = "grouped handler returned no result for job";
