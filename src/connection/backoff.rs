//! Reconnect backoff and the clock it waits on.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capped exponential backoff with symmetric jitter.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
    /// Fraction of the base delay added or removed at random.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
            multiplier: 2,
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial.as_millis() as u64;
        let factor = (self.multiplier.max(1) as u64).saturating_pow(attempt);
        let ms = initial_ms.saturating_mul(factor);
        Duration::from_millis(ms).min(self.max)
    }

    /// Jittered delay. `entropy` picks the offset inside the jitter window;
    /// the result never exceeds `max`.
    pub fn delay(&self, attempt: u32, entropy: u64) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as u64;
        let span = (base_ms as f64 * self.jitter_ratio.clamp(0.0, 1.0)) as u64;
        if span == 0 {
            return Duration::from_millis(base_ms);
        }

        let offset = (entropy % (2 * span + 1)) as i64 - span as i64;
        let jittered = if offset >= 0 {
            base_ms.saturating_add(offset as u64)
        } else {
            base_ms.saturating_sub(offset.unsigned_abs()).max(1)
        };

        Duration::from_millis(jittered).min(self.max)
    }
}

/// Time source for reconnect waits.
pub trait Clock: Send + Sync {
    /// Seed for jitter.
    fn entropy(&self) -> u64;

    /// Block for `delay` unless `stop` fires first. `stop` is disconnected
    /// when the connection closes.
    ///
    /// Returns `true` when the full delay elapsed and `false` when stopped.
    fn wait(&self, delay: Duration, stop: &Receiver<()>) -> bool;
}

/// Wall-clock implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn entropy(&self) -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        nanos.hash(&mut hasher);
        std::thread::current().id().hash(&mut hasher);
        hasher.finish()
    }

    fn wait(&self, delay: Duration, stop: &Receiver<()>) -> bool {
        matches!(stop.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
    }
}
