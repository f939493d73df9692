//! Reconnection delay policy.
//!
//! After a connection attempt fails, the next one is delayed so that a fleet
//! of devices does not hammer a broker that is recovering. The delay grows
//! exponentially and is capped:
//!
//! ```text
//! base[0] = 0
//! base[n] = min(initial * multiplier^(n-1), max)        n >= 1
//! delay[n] = min(base[n] + jitter, max)                  jitter in [0, base[n] * (multiplier-1) / 2]
//! ```
//!
//! The jitter window is narrow enough that `delay[n] <= base[n+1]`, so the
//! delay never shrinks as the attempt count grows.
//!
//! The policy is a pure function. The attempt counter lives in the
//! connection, which resets it to zero on every successful CONNACK.
//!
//! # Examples
//!
//! ```rust
//! use core::time::Duration;
//! use libiot_connect::Error;
//! use libiot_connect::network::application::mqtt::backoff::{Backoff, BackoffConfig};
//!
//! let backoff = Backoff::new(BackoffConfig {
//!     initial_delay_ms: 1_000,
//!     max_delay_ms: 8_000,
//!     multiplier: 2,
//!     max_attempts: 5,
//!     jitter: false,
//! });
//!
//! let lost = Err(Error::ConnectionReset);
//! assert_eq!(backoff.next_delay(1, lost, 0), Ok(Duration::from_millis(1_000)));
//! assert_eq!(backoff.next_delay(3, lost, 0), Ok(Duration::from_millis(4_000)));
//! assert_eq!(backoff.next_delay(5, lost, 0), Ok(Duration::from_millis(8_000)));
//! assert_eq!(backoff.next_delay(6, lost, 0), Err(Error::BackoffTerminal));
//! ```

use core::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Shape of the delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay_ms: u32,
    /// Upper bound for any delay.
    pub max_delay_ms: u32,
    /// Growth factor per attempt. `1` gives a constant delay.
    pub multiplier: u32,
    /// Attempts allowed before giving up with [`Error::BackoffTerminal`].
    pub max_attempts: u32,
    /// Adds random spread on top of the base delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 512_000,
            multiplier: 2,
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Rejects curves that cannot be evaluated.
    pub fn validate(&self) -> Result<()> {
        if self.multiplier == 0 || self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

/// How an outcome affects reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackoffClass {
    /// Success. The attempt counter is not advanced.
    None,
    /// Transient. Retry after a delay.
    Recoverable,
    /// Retrying cannot help until the device is reconfigured.
    Terminal,
}

impl BackoffClass {
    /// Classifies the outcome of a connection attempt or of a lost connection.
    pub fn classify(outcome: Result<()>) -> Self {
        match outcome {
            Ok(()) => BackoffClass::None,
            Err(
                Error::UnacceptableProtocolVersion
                | Error::IdentifierRejected
                | Error::BadCredentials
                | Error::NotAuthorized
                | Error::BackoffTerminal
                | Error::InvalidParameter,
            ) => BackoffClass::Terminal,
            Err(_) => BackoffClass::Recoverable,
        }
    }
}

/// Stateless delay calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    /// Wraps a configuration.
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// The wrapped configuration.
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// `true` once `attempt` is past the configured ceiling.
    pub const fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.config.max_attempts
    }

    /// Delay without jitter for the given attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(u64::from(self.base_ms(attempt)))
    }

    /// Delay before retry number `attempt`, given the outcome that caused it.
    ///
    /// `random` is any value from the platform RNG; it only matters when
    /// jitter is enabled.
    ///
    /// # Errors
    ///
    /// [`Error::BackoffTerminal`] if `attempt` exceeds the ceiling or the
    /// outcome is terminal.
    pub fn next_delay(&self, attempt: u32, previous: Result<()>, random: u32) -> Result<Duration> {
        match BackoffClass::classify(previous) {
            BackoffClass::None => return Ok(Duration::ZERO),
            BackoffClass::Terminal => return Err(Error::BackoffTerminal),
            BackoffClass::Recoverable => {}
        }
        if self.exhausted(attempt) {
            return Err(Error::BackoffTerminal);
        }

        let base = self.base_ms(attempt);
        let mut delay = base;
        if self.config.jitter && self.config.multiplier > 1 {
            let window = (base / 2).saturating_mul(self.config.multiplier - 1);
            if window > 0 {
                delay = base.saturating_add(random % window.saturating_add(1));
            }
        }
        let delay = delay.min(self.config.max_delay_ms);
        Ok(Duration::from_millis(u64::from(delay)))
    }

    fn base_ms(&self, attempt: u32) -> u32 {
        if attempt == 0 {
            return 0;
        }
        let mut delay = self.config.initial_delay_ms;
        for _ in 1..attempt.min(64) {
            if delay >= self.config.max_delay_ms {
                break;
            }
            delay = delay.saturating_mul(self.config.multiplier);
        }
        delay.min(self.config.max_delay_ms)
    }
}
