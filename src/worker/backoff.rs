use std::time::Duration;

/// Base and ceiling of an exponential delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}

/// Delay that doubles on every consecutive failure, up to the policy's cap.
///
/// Used two ways by a worker:
/// - connect backoff starts at the initial delay; `next_delay` hands out the
///   delay to sleep now and doubles the one after (8, 16, 32, ...), `reset`
///   goes back to the initial delay after a successful connect.
/// - failure penalty starts at zero; `escalate` moves it to the initial delay
///   or doubles it (1, 2, 4, ...), `clear` drops it back to zero.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// Start at the initial delay
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial.min(policy.cap),
        }
    }

    /// Start at zero: no delay until the first failure
    pub fn idle(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: Duration::ZERO,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay to wait now and double the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.doubled();
        delay
    }

    /// Grow the delay after a failure and return the new value
    pub fn escalate(&mut self) -> Duration {
        self.current = if self.current.is_zero() {
            self.policy.initial.min(self.policy.cap)
        } else {
            self.doubled()
        };
        self.current
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.cap);
    }

    /// Back to no delay at all
    pub fn clear(&mut self) {
        self.current = Duration::ZERO;
    }

    fn doubled(&self) -> Duration {
        self.current.saturating_mul(2).min(self.policy.cap)
    }
}
