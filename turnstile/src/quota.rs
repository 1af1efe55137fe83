use std::num::NonZeroUsize;
use std::time::Duration;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Errors produced when building a [`Quota`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuotaError {
    /// The refill rate was zero, negative, NaN or infinite.
    #[error("refill rate must be a positive, finite number of tokens per second; got {0}")]
    InvalidRate(f64),

    /// One token would refill in less than a nanosecond.
    #[error("refill rate of {0} tokens per second is too fast to measure")]
    RateTooFast(f64),

    /// Refilling a full bucket would take longer than the clock can represent.
    #[error("a capacity of {capacity} at {rate} tokens per second overflows the clock")]
    Overflow { capacity: usize, rate: f64 },
}

/// Capacity and refill rate for a [`TokenBucket`](crate::TokenBucket).
///
/// The rate is held as the number of nanoseconds needed to refill a single
/// token, so admission decisions are made in integer time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    capacity: usize,
    interval_ns: u64,
    burst_ns: u64,
}

impl Quota {
    /// Creates a new `Quota`.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum burst size, which is also the starting balance.
    /// * `refill_per_second` - Tokens added per second. Fractions are allowed.
    pub fn new(capacity: NonZeroUsize, refill_per_second: f64) -> Result<Self, QuotaError> {
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(QuotaError::InvalidRate(refill_per_second));
        }
        let interval = (NANOS_PER_SEC / refill_per_second).round();
        if interval < 1.0 {
            return Err(QuotaError::RateTooFast(refill_per_second));
        }
        if interval >= u64::MAX as f64 {
            return Err(QuotaError::Overflow {
                capacity: capacity.get(),
                rate: refill_per_second,
            });
        }
        let interval_ns = interval as u64;
        let burst_ns = (capacity.get() as u64)
            .checked_mul(interval_ns)
            .ok_or(QuotaError::Overflow {
                capacity: capacity.get(),
                rate: refill_per_second,
            })?;

        Ok(Self {
            capacity: capacity.get(),
            interval_ns,
            burst_ns,
        })
    }

    /// A burst of `n`, refilled at `n` tokens per second.
    ///
    /// Rates beyond one token per nanosecond are clamped to one per nanosecond.
    pub fn per_second(n: NonZeroUsize) -> Self {
        let n = n.get() as u64;
        let interval_ns = ((1_000_000_000 + n / 2) / n).max(1);
        Self::from_parts(n as usize, interval_ns)
    }

    /// Four tokens of burst, refilled at two per second.
    pub const fn per_client_default() -> Self {
        Self::from_parts(4, 500_000_000)
    }

    /// Forty tokens of burst, refilled at twenty per second.
    pub const fn global_default() -> Self {
        Self::from_parts(40, 50_000_000)
    }

    /// A single token, refilled once per second.
    pub const fn strict_default() -> Self {
        Self::from_parts(1, 1_000_000_000)
    }

    const fn from_parts(capacity: usize, interval_ns: u64) -> Self {
        Self {
            capacity,
            interval_ns,
            burst_ns: capacity as u64 * interval_ns,
        }
    }

    /// The maximum number of tokens a bucket can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_per_second(&self) -> f64 {
        NANOS_PER_SEC / self.interval_ns as f64
    }

    /// Time needed to refill one token.
    pub fn replenish_interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }

    pub(crate) fn interval_ns(&self) -> u64 {
        self.interval_ns
    }

    /// Time needed to refill an empty bucket to capacity.
    pub(crate) fn burst_ns(&self) -> u64 {
        self.burst_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn it_derives_the_replenish_interval() {
        let quota = Quota::new(cap(4), 2.0).unwrap();
        assert_eq!(quota.capacity(), 4);
        assert_eq!(quota.replenish_interval(), Duration::from_millis(500));
        assert_eq!(quota.refill_per_second(), 2.0);

        let quota = Quota::new(cap(1), 0.5).unwrap();
        assert_eq!(quota.replenish_interval(), Duration::from_secs(2));
    }

    #[test]
    fn presets_match_their_explicit_form() {
        assert_eq!(
            Quota::per_client_default(),
            Quota::new(cap(4), 2.0).unwrap()
        );
        assert_eq!(Quota::global_default(), Quota::new(cap(40), 20.0).unwrap());
        assert_eq!(Quota::strict_default(), Quota::new(cap(1), 1.0).unwrap());
    }

    #[test]
    fn per_second_matches_new() {
        assert_eq!(Quota::per_second(cap(20)), Quota::new(cap(20), 20.0).unwrap());
        assert_eq!(Quota::per_second(cap(3)), Quota::new(cap(3), 3.0).unwrap());

        let fastest = Quota::per_second(cap(2_000_000_000));
        assert_eq!(fastest.replenish_interval(), Duration::from_nanos(1));
    }

    #[test]
    fn it_rejects_unusable_rates() {
        assert_eq!(
            Quota::new(cap(1), 0.0),
            Err(QuotaError::InvalidRate(0.0))
        );
        assert_eq!(
            Quota::new(cap(1), -3.0),
            Err(QuotaError::InvalidRate(-3.0))
        );
        assert!(matches!(
            Quota::new(cap(1), f64::NAN),
            Err(QuotaError::InvalidRate(_))
        ));
        assert!(matches!(
            Quota::new(cap(1), f64::INFINITY),
            Err(QuotaError::InvalidRate(_))
        ));
        assert_eq!(
            Quota::new(cap(1), 1e10),
            Err(QuotaError::RateTooFast(1e10))
        );
    }

    #[test]
    fn it_rejects_a_burst_that_overflows() {
        let result = Quota::new(cap(usize::MAX), 1.0);
        assert!(matches!(result, Err(QuotaError::Overflow { .. })));
    }
}
