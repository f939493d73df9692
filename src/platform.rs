//! Board support package bundle.
//!
//! A [`Platform`] names the concrete capability types of one target, and
//! [`Bsp`] carries their instances into a
//! [`Context`](crate::network::application::mqtt::Context). Swapping a
//! POSIX backend for an RTOS one is a matter of implementing the same traits
//! and naming them in a different `Platform`.
//!
//! ```rust,ignore
//! struct Esp32;
//!
//! impl Platform for Esp32 {
//!     type Net = LwipSockets;
//!     type Tls = MbedTls;
//!     type Fs = MemoryFs<'static>;
//!     type Clock = SysTick;
//!     type Rng = HwRng;
//! }
//! ```

use crate::network::Network;
use crate::network::tls::Tls;
use crate::storage::FileSystem;
use crate::system::{Clock, Rng};

/// Type-level description of a target's board support package.
pub trait Platform {
    /// Socket layer.
    type Net: Network;
    /// TLS library.
    type Tls: Tls;
    /// Resource store holding the CA certificates.
    type Fs: FileSystem;
    /// Monotonic time source.
    type Clock: Clock;
    /// Jitter source.
    type Rng: Rng;
}

/// Concrete board support package instances.
#[allow(missing_debug_implementations)]
pub struct Bsp<P: Platform> {
    /// Socket layer.
    pub net: P::Net,
    /// TLS library.
    pub tls: P::Tls,
    /// Resource store.
    pub fs: P::Fs,
    /// Time source.
    pub clock: P::Clock,
    /// Jitter source.
    pub rng: P::Rng,
}
