//! # turnstile
//!
//! `turnstile` provides per-client token bucket admission with bounded memory.
//!
//! ## Core Philosophy
//!
//! Each client key owns an independent [`TokenBucket`]. Buckets are created lazily
//! in a [`ClientRegistry`] the first time a key is seen and are forgotten again by
//! an [`EvictionSweeper`] once the key has been idle for long enough.
//!
//! ## Key Concepts
//!
//! * **Lock-Free Buckets**: A bucket's balance lives in a single atomic and is
//!   updated with a Compare-And-Swap loop, so concurrent checks on one key form a
//!   linear history without a `Mutex`.
//! * **Sharded Registry**: The key map is a `DashMap`. Shard locks are held only
//!   for the lookup, never while a bucket is consulted.
//! * **Continuous Refill**: Tokens accrue in proportion to elapsed time, not in
//!   whole-second ticks.
//! * **Injectable Time**: Every component reads time from a `quanta::Clock`, so
//!   tests can drive a mock clock.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//!
//! use turnstile::ClientRegistry;
//! use turnstile::Quota;
//!
//! let quota = Quota::new(NonZeroUsize::new(4).unwrap(), 2.0).unwrap();
//! let registry = ClientRegistry::<String>::new(quota);
//!
//! let bucket = registry.get_or_create("10.0.0.1".to_string());
//! if bucket.try_consume() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod quota;
mod registry;
mod sweeper;
mod token_bucket;

pub use quota::Quota;
pub use quota::QuotaError;
pub use registry::ClientRegistry;
pub use sweeper::EvictionSweeper;
pub use sweeper::SweepConfig;
pub use sweeper::SweeperHandle;
pub use token_bucket::TokenBucket;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The core trait for admission algorithms.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to admit a single request.
    ///
    /// This method is non-blocking and uses atomic operations to update
    /// internal state.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the rate limit has been reached.
    fn process(&self) -> ControlFlow<Reason>;
}
