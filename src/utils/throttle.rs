//! Log throttling
//!
//! Media errors tend to repeat once per packet; the throttler lets one line
//! per key through per interval and counts what it swallowed in between.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Slot {
    last: Instant,
    suppressed: u64,
}

/// Rate limiter for repeated log lines
pub struct LogThrottler {
    slots: Mutex<HashMap<String, Slot>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// `true` when a line for `key` may be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.admit(key).is_some()
    }

    /// Like `should_log`, returning how many lines were suppressed since the
    /// last admitted one
    pub fn admit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot) if now.duration_since(slot.last) < self.interval => {
                slot.suppressed += 1;
                None
            }
            Some(slot) => {
                let suppressed = std::mem::take(&mut slot.suppressed);
                slot.last = now;
                Some(suppressed)
            }
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        last: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key` so its next occurrence is logged at once
    pub fn clear(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// `warn!` at most once per throttler interval for `key`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}
