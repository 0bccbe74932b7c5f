use std::time::Duration;

/// Upper bound on consecutive reconnects for one logical retry sequence.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Bounded exponential backoff for transient client exits.
///
/// `delay(attempt) = min(base * 2^(attempt - 1), cap)` for attempts in
/// `1..=MAX_RECONNECT_ATTEMPTS`. With the defaults that is 1s, 2s, 4s, 8s, 16s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(16),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let scaled = self.base.saturating_mul(1u32 << exponent);
        scaled.min(self.cap)
    }

    /// The attempt number to schedule after a transient exit, or `None`
    /// when `attempts_so_far` already exhausted the budget.
    pub fn next_attempt(&self, attempts_so_far: u32) -> Option<u32> {
        if attempts_so_far < MAX_RECONNECT_ATTEMPTS {
            Some(attempts_so_far + 1)
        } else {
            None
        }
    }
}
