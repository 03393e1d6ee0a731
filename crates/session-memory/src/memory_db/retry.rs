//! Bounded retry with exponential backoff for lock contention at the storage boundary

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{MemoryError, MemoryResult};

/// How many times, and how patiently, to retry a storage operation that hit a locked database.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails with a non-contention error, or the budget runs out.
    ///
    /// Blocks the calling thread while backing off; callers on an async runtime
    /// must already be on a blocking worker.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> MemoryResult<T>
    where
        F: FnMut() -> MemoryResult<T>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 0..attempts {
            match op() {
                Err(e) if e.is_contention() => {
                    if attempt + 1 == attempts {
                        warn!("{}: database still locked after {} attempts", label, attempts);
                        break;
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!("{}: database locked, retrying in {:?} ({}/{})", label, delay, attempt + 1, attempts);
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
        Err(MemoryError::Busy { attempts })
    }
}
