use std::time::Duration;

/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Exponential reconnect delay with ±10 % jitter.
///
/// Schedule: base → 2·base → 4·base → … → max (cap). [`reset`](Backoff::reset)
/// after a successful connection starts the schedule over.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            attempt: 0,
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Delay to wait before the next attempt, then advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = with_jitter(self.current);
        self.attempt = self.attempt.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempt = 0;
    }
}

/// Apply ±`JITTER_FRACTION` to `delay`.
///
/// Uses a pseudo-random value derived from the current timestamp, avoiding a
/// rand dependency in the channel layer.
fn with_jitter(delay: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter_ms = (delay.as_millis() as f64 * JITTER_FRACTION) as u64;
    if max_jitter_ms == 0 {
        return delay;
    }
    // Spread over [-max_jitter, +max_jitter].
    let offset = (nanos as u64) % (2 * max_jitter_ms + 1);
    let ms = delay.as_millis() as u64 + offset - max_jitter_ms;
    Duration::from_millis(ms)
}
