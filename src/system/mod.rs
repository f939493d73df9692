//! System services for the event loop.
//!
//! This module provides the time and randomness contracts the session manager
//! depends on, plus the cooperative [`scheduler`] that multiplexes timers.
//!
//! # Available Utilities
//!
//! - **[`Clock`]**: monotonic millisecond time source
//! - **[`Rng`]**: entropy source for backoff jitter
//! - **[`scheduler`]**: deadline-ordered timed task table
//!
//! # Design Principles
//!
//! - **Embedded-First**: no heap, fixed-capacity tables
//! - **Deterministic**: time only advances through [`Clock`], so tests can
//!   drive the whole stack with a virtual clock
//!
//! # Usage
//!
//! ```rust
//! use libiot_connect::system::{Clock, scheduler::Scheduler};
//!
//! struct Ticks(u64);
//! impl Clock for Ticks {
//!     fn now_ms(&self) -> u64 { self.0 }
//! }
//!
//! let clock = Ticks(0);
//! let mut scheduler: Scheduler<&str, 4> = Scheduler::new();
//! scheduler.schedule(clock.now_ms(), 500, None, "blink").unwrap();
//! assert_eq!(scheduler.next_deadline(), Some(500));
//! ```

/// Timed task table driven by the event loop.
///
/// Holds one-shot and repeating jobs ordered by deadline, with ties
/// broken by submission order.
pub mod scheduler;

/// Monotonic time source in milliseconds.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin. Must never go backwards.
    fn now_ms(&self) -> u64;
}

/// Entropy source used for backoff jitter. Need not be cryptographic.
pub trait Rng {
    /// Returns the next random value.
    fn next_u32(&mut self) -> u32;
}

/// [`Clock`] backed by `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Starts counting from now.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Small xorshift generator for host builds and tests.
///
/// Not available on embedded targets, where the board supplies its own
/// [`Rng`].
#[cfg(any(test, feature = "std"))]
#[derive(Debug, Clone, Copy)]
pub struct XorShiftRng {
    state: u32,
}

#[cfg(any(test, feature = "std"))]
impl XorShiftRng {
    /// Seeds the generator. A zero seed is replaced by a fixed constant.
    pub const fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }
}

#[cfg(any(test, feature = "std"))]
impl Rng for XorShiftRng {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}
