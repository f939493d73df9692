//! Platform network contract
//!
//! The session manager never touches sockets directly. Everything goes
//! through the [`Network`] trait, which a board support package implements
//! on top of whatever stack it has (POSIX sockets, lwIP, smoltcp, a modem
//! AT-command driver, ...).
//!
//! All operations are non-blocking. A call that cannot make progress
//! returns [`Error::WouldBlock`](error::Error::WouldBlock) and the caller
//! waits on [`Network::select`] before trying again.
//!
//! ```text
//!   connect() ──► handle ──► connection_check() ──WouldBlock──► select(writable)
//!                                    │
//!                                    ▼ Ok
//!                     read()/write() ◄──WouldBlock──► select(readable|writable)
//! ```

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Socket state codes
pub mod error;

/// Platform TLS contract
pub mod tls;

/// Application protocols built on the network contract
pub mod application;

/// Re-exports of common traits
pub mod prelude {
    pub use super::Network;
    pub use super::tls::{Tls, Transport};
}

/// Opaque socket identifier handed out by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketHandle(pub u32);

/// Transport protocol requested from [`Network::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Readiness a caller is interested in, or that a socket reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    /// Union of two interests.
    pub const fn or(self, other: Interest) -> Interest {
        Interest {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }

    pub const fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// One row of a [`Network::select`] request.
///
/// The caller fills `socket` and `interest`; the platform fills `ready`
/// and sets `error` if the socket failed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SelectEntry {
    pub socket: SocketHandle,
    pub interest: Interest,
    pub ready: Interest,
    pub error: bool,
}

impl SelectEntry {
    pub const fn new(socket: SocketHandle, interest: Interest) -> Self {
        Self {
            socket,
            interest,
            ready: Interest::NONE,
            error: false,
        }
    }
}

/// The socket half of the board support package.
pub trait Network {
    /// Starts a non-blocking connect and returns the socket immediately.
    ///
    /// Completion is reported by [`Network::connection_check`].
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        protocol: Protocol,
    ) -> Result<SocketHandle, error::Error>;

    /// `Ok` once the connect finished, `WouldBlock` while it is pending.
    fn connection_check(&mut self, socket: SocketHandle) -> Result<(), error::Error>;

    /// Reads available bytes. `Ok(0)` means the peer closed the stream.
    fn read(&mut self, socket: SocketHandle, buf: &mut [u8]) -> Result<usize, error::Error>;

    /// Writes as much of `buf` as possible and returns the count written.
    fn write(&mut self, socket: SocketHandle, buf: &[u8]) -> Result<usize, error::Error>;

    /// Waits up to `timeout_ms` for any entry to become ready.
    ///
    /// An empty `entries` slice turns this into a plain sleep. Returns the
    /// number of entries with readiness or error set.
    fn select(&mut self, entries: &mut [SelectEntry], timeout_ms: u32)
    -> Result<usize, error::Error>;

    /// Closes the socket and releases the handle.
    fn close(&mut self, socket: SocketHandle) -> Result<(), error::Error>;
}
