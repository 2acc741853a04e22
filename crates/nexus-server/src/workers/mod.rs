//! The two drivers behind both the HTTP routes and the scheduler: fetching
//! account activity and submitting payment initiations.

mod fetch;
mod submit;

pub use fetch::fetch_transactions;
pub use submit::{submit_all_pending, submit_initiation};

use std::time::Duration;

/// Transport failures are retried this many times within one invocation.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

pub(crate) fn backoff(attempt: u32) -> Duration {
  Duration::from_secs(1 << attempt.min(4))
}
