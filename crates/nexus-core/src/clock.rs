//! Time as an injected capability.
//!
//! Every timestamp the service produces (watermarks, `CreDtTm` values,
//! submission dates, scheduler "now") flows through a [`Clock`] handed to the
//! service root at construction. Tests install a settable clock instead of
//! mutating process-global state.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Unix seconds, as used by the scheduler bookkeeping columns.
  fn now_unix(&self) -> i64 { self.now().timestamp() }
}

/// The wall clock. The only implementation used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that returns a settable fixed instant.
#[derive(Debug)]
pub struct FixedClock {
  now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
  pub fn new(now: DateTime<Utc>) -> Self { Self { now: Mutex::new(now) } }

  pub fn set(&self, now: DateTime<Utc>) {
    *self.now.lock().expect("clock poisoned") = now;
  }

  pub fn advance(&self, duration: chrono::Duration) {
    let mut guard = self.now.lock().expect("clock poisoned");
    *guard += duration;
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> { *self.now.lock().expect("clock poisoned") }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone, Utc};

  use super::*;

  #[test]
  fn fixed_clock_advances() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let clock = FixedClock::new(t0);
    assert_eq!(clock.now(), t0);

    clock.advance(Duration::seconds(90));
    assert_eq!(clock.now(), t0 + Duration::seconds(90));
    assert_eq!(clock.now_unix(), t0.timestamp() + 90);
  }
}
