//! Platform TLS contract.
//!
//! The TLS library lives in the board support package (mbedTLS, wolfSSL,
//! rustls, a secure element, ...). It never owns the socket. Instead every
//! call receives a [`Transport`] through which it sends and receives raw
//! record bytes, so that the session manager keeps full control of the
//! non-blocking socket.

use super::error::Error as NetError;
use super::{Network, SocketHandle};

/// Parameters for creating one TLS session.
#[derive(Debug, Clone, Copy)]
pub struct TlsInitParams<'a> {
    /// PEM or DER encoded CA certificates used to verify the broker.
    pub ca_certificates: &'a [u8],
    /// Server name used for SNI and certificate hostname verification.
    pub domain_name: &'a str,
}

/// State codes returned by [`Tls`] operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TlsError {
    /// The operation needs the socket to become readable.
    WantRead,
    /// The operation needs the socket to become writable.
    WantWrite,
    /// The library could not be initialized.
    InitError,
    /// The CA certificates could not be parsed.
    CertError,
    /// The handshake failed.
    ConnectError,
    /// Record decryption or socket read failed.
    ReadError,
    /// Record encryption or socket write failed.
    WriteError,
}

impl From<TlsError> for crate::Error {
    fn from(value: TlsError) -> Self {
        match value {
            TlsError::InitError => crate::Error::TlsInitialization,
            TlsError::CertError => crate::Error::TlsCertificate,
            TlsError::ConnectError => crate::Error::TlsConnect,
            TlsError::ReadError | TlsError::WantRead => crate::Error::TlsRead,
            TlsError::WriteError | TlsError::WantWrite => crate::Error::TlsWrite,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TlsError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            TlsError::WantRead => defmt::write!(f, "WantRead"),
            TlsError::WantWrite => defmt::write!(f, "WantWrite"),
            TlsError::InitError => defmt::write!(f, "InitError"),
            TlsError::CertError => defmt::write!(f, "CertError"),
            TlsError::ConnectError => defmt::write!(f, "ConnectError"),
            TlsError::ReadError => defmt::write!(f, "ReadError"),
            TlsError::WriteError => defmt::write!(f, "WriteError"),
        }
    }
}

/// Raw byte pipe handed to the TLS library.
pub trait Transport {
    /// Sends record bytes. `WouldBlock` maps to [`TlsError::WantWrite`].
    fn send(&mut self, buf: &[u8]) -> Result<usize, NetError>;
    /// Receives record bytes. `WouldBlock` maps to [`TlsError::WantRead`].
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;
}

/// [`Transport`] over a platform socket.
#[derive(Debug)]
pub struct SocketTransport<'a, N: Network> {
    net: &'a mut N,
    socket: SocketHandle,
}

impl<'a, N: Network> SocketTransport<'a, N> {
    /// Borrows `net` for the duration of one TLS call.
    pub fn new(net: &'a mut N, socket: SocketHandle) -> Self {
        Self { net, socket }
    }
}

impl<N: Network> Transport for SocketTransport<'_, N> {
    fn send(&mut self, buf: &[u8]) -> Result<usize, NetError> {
        self.net.write(self.socket, buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.net.read(self.socket, buf)
    }
}

/// The TLS half of the board support package.
///
/// Every method is non-blocking and reports `WantRead`/`WantWrite` when it
/// must wait for the socket.
pub trait Tls {
    /// Per-connection TLS state.
    type Session;

    /// Creates a session. No bytes are exchanged yet.
    fn init(&mut self, params: &TlsInitParams<'_>) -> Result<Self::Session, TlsError>;

    /// Advances the handshake by as much as the transport allows.
    fn connect(
        &mut self,
        session: &mut Self::Session,
        io: &mut dyn Transport,
    ) -> Result<(), TlsError>;

    /// Reads decrypted application bytes. `Ok(0)` means close-notify.
    fn read(
        &mut self,
        session: &mut Self::Session,
        io: &mut dyn Transport,
        buf: &mut [u8],
    ) -> Result<usize, TlsError>;

    /// Encrypts and sends application bytes.
    fn write(
        &mut self,
        session: &mut Self::Session,
        io: &mut dyn Transport,
        buf: &[u8],
    ) -> Result<usize, TlsError>;

    /// `true` when decrypted bytes are buffered inside the library.
    fn pending(&self, session: &Self::Session) -> bool;

    /// Releases the session.
    fn cleanup(&mut self, session: Self::Session);
}
