//! Injectable time source.
//!
//! Loan deadlines are wall-clock facts, so nothing in the engine calls
//! [`Utc::now`] directly. Tests pin a [`FixedClock`] and step it across due
//! dates and grace periods.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock pinned to an explicit instant, shared between the test and the
/// engine under test.
#[derive(Debug, Clone)]
pub struct FixedClock {
  current: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
  pub fn at(start: DateTime<Utc>) -> Self {
    Self { current: Arc::new(Mutex::new(start)) }
  }

  /// Move the clock forward.
  pub fn advance(&self, by: Duration) {
    let mut current =
      self.current.lock().unwrap_or_else(|e| e.into_inner());
    *current += by;
  }

  /// Jump the clock to a specific instant.
  pub fn set(&self, to: DateTime<Utc>) {
    let mut current =
      self.current.lock().unwrap_or_else(|e| e.into_inner());
    *current = to;
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    *self.current.lock().unwrap_or_else(|e| e.into_inner())
  }
}
