//! State codes reported by the platform socket layer

/// A state code returned by [`Network`](super::Network) operations.
///
/// `WouldBlock` is not a failure: the operation could not make progress
/// right now and should be retried once the socket becomes ready.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The operation cannot complete without blocking.
    WouldBlock,
    /// The socket handle is not open.
    NotOpen,
    /// An error occurred during a write operation.
    WriteError,
    /// An error occurred during a read operation.
    ReadError,
    /// A connection attempt was refused.
    ConnectionRefused,
    /// The peer reset or closed the connection.
    ConnectionReset,
    /// A timeout occurred.
    Timeout,
    /// An invalid address was provided.
    InvalidAddress,
    /// The requested transport protocol is not available.
    Unsupported,
    /// Any other socket failure.
    SocketError,
}

impl From<Error> for crate::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::ConnectionReset => crate::Error::ConnectionReset,
            Error::Timeout => crate::Error::SocketTimeout,
            Error::InvalidAddress => crate::Error::InvalidParameter,
            Error::Unsupported => crate::Error::NotSupported,
            Error::WouldBlock
            | Error::NotOpen
            | Error::WriteError
            | Error::ReadError
            | Error::ConnectionRefused
            | Error::SocketError => crate::Error::SocketError,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::WouldBlock => defmt::write!(f, "WouldBlock"),
            Error::NotOpen => defmt::write!(f, "NotOpen"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::ConnectionRefused => defmt::write!(f, "ConnectionRefused"),
            Error::ConnectionReset => defmt::write!(f, "ConnectionReset"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::InvalidAddress => defmt::write!(f, "InvalidAddress"),
            Error::Unsupported => defmt::write!(f, "Unsupported"),
            Error::SocketError => defmt::write!(f, "SocketError"),
        }
    }
}
