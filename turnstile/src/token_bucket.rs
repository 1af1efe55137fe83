use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use super::Quota;
use super::Reason;
use super::Strategy;

/// A token bucket with continuous refill.
///
/// The bucket starts full. Tokens accrue at the quota's rate, capped at its
/// capacity, and every admitted request removes exactly one.
///
/// Rather than storing a token count and a refill timestamp side by side, the
/// bucket stores the single instant at which its balance is zero. The balance
/// at any moment is then `min(capacity, (now - drained_at) * rate)`, which lets
/// one Compare-And-Swap update both halves of the state.
#[derive(Debug)]
pub struct TokenBucket {
    quota: Quota,
    /// Nanoseconds from `anchor`, shifted by one full burst, at which the balance is zero.
    drained_at: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl Strategy for TokenBucket {
    #[inline]
    fn process(&self) -> ControlFlow<Reason> {
        let now = self.now();
        let floor = now - self.quota.burst_ns();
        let mut drained_at = self.drained_at.load(Ordering::Acquire);

        loop {
            // Credit beyond a full bucket is discarded.
            let next = drained_at.max(floor) + self.quota.interval_ns();

            if next > now {
                return ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(next - now),
                });
            }

            match self.drained_at.compare_exchange_weak(
                drained_at,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ControlFlow::Continue(()),
                Err(actual) => drained_at = actual,
            }
        }
    }
}

impl TokenBucket {
    /// Creates a full bucket that reads time from the system clock.
    pub fn new(quota: Quota) -> Self {
        Self::with_clock(quota, Clock::new())
    }

    /// Creates a full bucket that reads time from `clock`.
    pub fn with_clock(quota: Quota, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            quota,
            drained_at: AtomicU64::new(0),
            clock,
            anchor,
        }
    }

    /// Takes one token if available.
    ///
    /// Returns `false`, leaving the balance untouched, when less than one whole
    /// token has accrued.
    #[inline]
    pub fn try_consume(&self) -> bool {
        self.process().is_continue()
    }

    /// The current balance, including fractional credit.
    pub fn tokens(&self) -> f64 {
        let now = self.now();
        let floor = now - self.quota.burst_ns();
        let drained_at = self.drained_at.load(Ordering::Acquire).max(floor);
        let tokens = now.saturating_sub(drained_at) as f64 / self.quota.interval_ns() as f64;
        debug_assert!(
            tokens <= self.quota.capacity() as f64,
            "token balance {tokens} exceeds capacity {}",
            self.quota.capacity()
        );
        tokens
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    // Shifted by a full burst so that a `drained_at` of zero means "full".
    fn now(&self) -> u64 {
        let elapsed = self.clock.now().duration_since(self.anchor).as_nanos() as u64;
        elapsed.saturating_add(self.quota.burst_ns())
    }
}
