//! Exponential retry delays with jitter for elevation requests.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    current: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            max: max.max(base),
            current: base,
            jitter_ratio: 0.2,
        }
    }

    /// Delay before the next attempt. The first failure waits `base`, each
    /// later one doubles up to `max`, plus up to 20% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = with_jitter(self.current, self.jitter_ratio);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

fn with_jitter(delay: Duration, ratio: f64) -> Duration {
    let spread_ms = (delay.as_millis() as f64 * ratio) as u64;
    if spread_ms == 0 {
        return delay;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    delay + Duration::from_millis(seed % (spread_ms + 1))
}
