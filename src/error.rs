//! The closed set of outcomes returned by every fallible operation.
//!
//! Success is `Ok(..)`. Everything else is one [`Error`] variant, whether it
//! comes back synchronously from an API call or later through a completion
//! callback. Lower layers (socket, TLS, filesystem, crypto) have their own
//! narrower state codes which are folded into [`Error`] through `From`.
//!
//! Transient conditions such as "would block" or "want read" never show up
//! here. The connection state machine consumes them as suspension points.

use core::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Outcome codes for connection, session and platform operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A bounded wait expired (CONNACK, handshake, PINGRESP).
    Timeout,
    /// Automatic reconnection gave up after the configured attempt ceiling.
    BackoffTerminal,
    /// A fixed-capacity table or buffer is full.
    OutOfMemory,
    /// A publish payload exceeds the supported maximum.
    PayloadTooLarge,
    /// A caller-supplied buffer or string is too small or too long.
    BufferTooSmall,
    /// The operation requires an open connection.
    NoActiveConnection,
    /// A connection is already being opened, is open, or is closing.
    AlreadyInProgress,
    /// The peer reset or closed the socket.
    ConnectionReset,
    /// The connection went away while the operation was outstanding.
    ConnectionLost,
    /// The socket layer reported an unrecoverable error.
    SocketError,
    /// The socket layer timed out.
    SocketTimeout,
    /// The TLS layer could not be initialized.
    TlsInitialization,
    /// The CA certificate bundle could not be loaded or parsed.
    TlsCertificate,
    /// The TLS handshake failed.
    TlsConnect,
    /// Reading a TLS record failed.
    TlsRead,
    /// Writing a TLS record failed.
    TlsWrite,
    /// CONNACK: the broker does not support the protocol level.
    UnacceptableProtocolVersion,
    /// CONNACK: the client identifier was rejected.
    IdentifierRejected,
    /// CONNACK: the broker is unavailable.
    ServerUnavailable,
    /// CONNACK: bad username or password.
    BadCredentials,
    /// CONNACK: the client is not authorized.
    NotAuthorized,
    /// CONNACK carried a return code outside the MQTT 3.1.1 range.
    UnknownConnackCode,
    /// A frame from the broker could not be decoded.
    MalformedPacket,
    /// A well-formed frame arrived that is not valid in the current state.
    UnexpectedPacket,
    /// An acknowledgment referenced a message id that is not outstanding.
    UnknownMessageId,
    /// The broker refused a subscription.
    SubscriptionFailed,
    /// A QoS 1/2 publish exhausted its retransmissions.
    DeliveryFailed,
    /// Unexpected internal condition.
    InternalError,
    /// The context was shut down.
    NotInitialized,
    /// An argument failed validation.
    InvalidParameter,
    /// The platform does not implement the requested capability.
    NotImplemented,
    /// The request is well-formed but unsupported.
    NotSupported,
    /// The event loop was stopped.
    EventProcessStopped,
    /// A filesystem resource does not exist.
    ResourceNotAvailable,
    /// The filesystem reported an error.
    FilesystemError,
    /// A crypto primitive failed.
    CryptoError,
    /// The JWT could not be assembled.
    JwtFormation,
}

impl Error {
    /// Returns a short, stable name for the outcome.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Error::Timeout => "timeout",
            Error::BackoffTerminal => "backoff terminal",
            Error::OutOfMemory => "out of memory",
            Error::PayloadTooLarge => "payload too large",
            Error::BufferTooSmall => "buffer too small",
            Error::NoActiveConnection => "no active connection",
            Error::AlreadyInProgress => "already in progress",
            Error::ConnectionReset => "connection reset by peer",
            Error::ConnectionLost => "connection lost",
            Error::SocketError => "socket error",
            Error::SocketTimeout => "socket timeout",
            Error::TlsInitialization => "tls initialization failed",
            Error::TlsCertificate => "tls certificate error",
            Error::TlsConnect => "tls connect failed",
            Error::TlsRead => "tls read failed",
            Error::TlsWrite => "tls write failed",
            Error::UnacceptableProtocolVersion => "unacceptable protocol version",
            Error::IdentifierRejected => "identifier rejected",
            Error::ServerUnavailable => "server unavailable",
            Error::BadCredentials => "bad username or password",
            Error::NotAuthorized => "not authorized",
            Error::UnknownConnackCode => "unknown connack return code",
            Error::MalformedPacket => "malformed packet",
            Error::UnexpectedPacket => "unexpected packet",
            Error::UnknownMessageId => "unknown message id",
            Error::SubscriptionFailed => "subscription failed",
            Error::DeliveryFailed => "delivery failed",
            Error::InternalError => "internal error",
            Error::NotInitialized => "not initialized",
            Error::InvalidParameter => "invalid parameter",
            Error::NotImplemented => "not implemented",
            Error::NotSupported => "not supported",
            Error::EventProcessStopped => "event processing stopped",
            Error::ResourceNotAvailable => "resource not available",
            Error::FilesystemError => "filesystem error",
            Error::CryptoError => "crypto error",
            Error::JwtFormation => "jwt formation failed",
        }
    }

    /// Maps a CONNACK return code to its outcome. `0` is accepted.
    pub const fn from_connack_code(code: u8) -> Result<()> {
        match code {
            0 => Ok(()),
            1 => Err(Error::UnacceptableProtocolVersion),
            2 => Err(Error::IdentifierRejected),
            3 => Err(Error::ServerUnavailable),
            4 => Err(Error::BadCredentials),
            5 => Err(Error::NotAuthorized),
            _ => Err(Error::UnknownConnackCode),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}
