use std::time::Duration;

/// Default pause between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Fixed-delay reconnect policy. There is no attempt cap: reconnects continue
/// until the session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay_ms: u64,
}

impl ReconnectPolicy {
    /// Create a policy with `delay_ms` between attempts (`delay_ms >= 1`).
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms: delay_ms.max(1),
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Delay before the given attempt. Every attempt waits the same amount.
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_waits_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_ms(), 5_000);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
    }

    #[test]
    fn delay_does_not_grow_with_attempts() {
        let policy = ReconnectPolicy::new(250);
        assert_eq!(
            policy.delay_for_attempt(0),
            policy.delay_for_attempt(1_000)
        );
    }

    #[test]
    fn clamps_zero_delay() {
        assert_eq!(ReconnectPolicy::new(0).delay_ms(), 1);
    }
}
