use std::time::Duration;

/// Экспоненциальный backoff с потолком и jitter'ом.
///
/// `delay(attempt) = min(base * 2^attempt, max) + U[0, jitter]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// Задержка без jitter'а.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return ceiling;
        }
        ceiling + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
    }
}
