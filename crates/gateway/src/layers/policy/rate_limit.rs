use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hard ceiling applied to any configured per-second rate.
pub const MAX_RATE_PER_SEC: u32 = 1000;

const SWEEP_THRESHOLD: usize = 4096;

/// Fixed-window counter per key. A key's window opens on its first hit and
/// resets once `unit` has elapsed.
#[derive(Debug)]
pub struct RateLimit {
    unit: Duration,
    max_count: u32,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    count: u32,
}

impl RateLimit {
    pub fn new(unit_secs: u64, max_count: u32) -> Self {
        let unit_secs = unit_secs.max(1);
        let ceiling = u64::from(MAX_RATE_PER_SEC).saturating_mul(unit_secs);
        let max_count = u64::from(max_count.max(1)).min(ceiling) as u32;
        Self {
            unit: Duration::from_secs(unit_secs),
            max_count,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Whether `key` is still within budget. With `consume` the hit is counted.
    pub fn add(&self, key: &str, consume: bool) -> bool {
        self.add_at(key, consume, Instant::now())
    }

    fn add_at(&self, key: &str, consume: bool, now: Instant) -> bool {
        let mut windows = self.windows.lock().expect("rate limit lock");
        if windows.len() >= SWEEP_THRESHOLD && !windows.contains_key(key) {
            let unit = self.unit;
            windows.retain(|_, window| now.duration_since(window.opened_at) < unit);
        }
        let window = windows.entry(key.to_string()).or_insert(Window {
            opened_at: now,
            count: 0,
        });
        if now.duration_since(window.opened_at) >= self.unit {
            window.opened_at = now;
            window.count = 0;
        }
        if window.count >= self.max_count {
            tracing::debug!(event = "rate_limit.hit", key = %key, max = self.max_count);
            return false;
        }
        if consume {
            window.count += 1;
        }
        true
    }
}
