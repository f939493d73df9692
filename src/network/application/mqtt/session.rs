//! TLS session adapter.
//!
//! Wraps one platform [`Tls`] session and translates its `WantRead` /
//! `WantWrite` codes into socket [`Interest`] that the event loop waits on.
//! Nothing here retries or sleeps: every call does as much as the transport
//! allows and returns.
//!
//! ```text
//!  advance_handshake ──► InProgress(interest) ──select──► advance_handshake
//!          │
//!          └──► Established ──► read()/write() ──► Done(n) | Blocked(interest)
//! ```

use core::fmt;

use crate::network::tls::{SocketTransport, Tls, TlsError, TlsInitParams};
use crate::network::{Interest, Network, SocketHandle};
use crate::{Error, Result};

/// Outcome of one handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Not finished; wait for the given readiness and call again.
    InProgress(Interest),
    /// The session is ready for application data.
    Established,
    /// The handshake cannot complete.
    Failed(Error),
}

/// Outcome of one read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Bytes moved.
    Done(usize),
    /// Nothing moved; wait for the given readiness.
    Blocked(Interest),
}

fn want(error: TlsError) -> Option<Interest> {
    match error {
        TlsError::WantRead => Some(Interest::READ),
        TlsError::WantWrite => Some(Interest::WRITE),
        _ => None,
    }
}

/// One TLS session bound to one socket.
pub struct TlsSession<T: Tls> {
    session: T::Session,
    established: bool,
}

impl<T: Tls> fmt::Debug for TlsSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("established", &self.established)
            .finish_non_exhaustive()
    }
}

impl<T: Tls> TlsSession<T> {
    /// Creates the platform session. No bytes are exchanged.
    ///
    /// # Errors
    ///
    /// [`Error::TlsInitialization`] or [`Error::TlsCertificate`].
    pub fn new(tls: &mut T, params: &TlsInitParams<'_>) -> Result<Self> {
        let session = tls.init(params).map_err(|e| {
            error!("tls init failed: {:?}", e);
            Error::from(e)
        })?;
        Ok(Self {
            session,
            established: false,
        })
    }

    /// `true` once the handshake completed.
    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Runs the handshake as far as the socket allows.
    pub fn advance_handshake<N: Network>(
        &mut self,
        tls: &mut T,
        net: &mut N,
        socket: SocketHandle,
    ) -> Handshake {
        if self.established {
            return Handshake::Established;
        }
        let mut io = SocketTransport::new(net, socket);
        match tls.connect(&mut self.session, &mut io) {
            Ok(()) => {
                self.established = true;
                Handshake::Established
            }
            Err(e) => match want(e) {
                Some(interest) => Handshake::InProgress(interest),
                None => {
                    warn!("tls handshake failed: {:?}", e);
                    Handshake::Failed(match e {
                        TlsError::CertError => Error::TlsCertificate,
                        _ => Error::TlsConnect,
                    })
                }
            },
        }
    }

    /// Reads decrypted bytes into `buf`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionReset`] if the peer closed the session
    /// - [`Error::TlsRead`] for record or socket failures
    pub fn read<N: Network>(
        &mut self,
        tls: &mut T,
        net: &mut N,
        socket: SocketHandle,
        buf: &mut [u8],
    ) -> Result<Progress> {
        if !self.established {
            return Err(Error::InternalError);
        }
        let mut io = SocketTransport::new(net, socket);
        match tls.read(&mut self.session, &mut io, buf) {
            Ok(0) if !buf.is_empty() => Err(Error::ConnectionReset),
            Ok(n) => Ok(Progress::Done(n)),
            Err(e) => want(e).map(Progress::Blocked).ok_or(Error::TlsRead),
        }
    }

    /// Encrypts and sends bytes from `buf`.
    ///
    /// # Errors
    ///
    /// [`Error::TlsWrite`] for record or socket failures.
    pub fn write<N: Network>(
        &mut self,
        tls: &mut T,
        net: &mut N,
        socket: SocketHandle,
        buf: &[u8],
    ) -> Result<Progress> {
        if !self.established {
            return Err(Error::InternalError);
        }
        let mut io = SocketTransport::new(net, socket);
        match tls.write(&mut self.session, &mut io, buf) {
            Ok(n) => Ok(Progress::Done(n)),
            Err(e) => want(e).map(Progress::Blocked).ok_or(Error::TlsWrite),
        }
    }

    /// `true` when decrypted bytes are waiting inside the TLS library, which
    /// socket readiness cannot reveal.
    pub fn pending(&self, tls: &T) -> bool {
        self.established && tls.pending(&self.session)
    }

    /// Releases the platform session.
    pub fn close(self, tls: &mut T) {
        tls.cleanup(self.session);
    }
}
