//! Platform cryptography contract.
//!
//! The session manager itself does not need cryptography beyond what the
//! TLS library does internally. Cloud brokers, however, commonly
//! authenticate devices with a short-lived JWT passed as the MQTT password,
//! and that token is signed with the device key. [`Crypto`] is the seam
//! through which a board support package exposes its hash and signature
//! primitives (software, a secure element, a hardware accelerator), and
//! [`jwt`] builds tokens on top of it.
//!
//! Only base64url has a default implementation, backed by `base64ct`. The
//! other primitives report [`CryptoError::NotImplemented`] until a platform
//! provides them.

use base64ct::{Base64UrlUnpadded, Encoding};

/// JSON Web Token creation and verification
pub mod jwt;

/// SHA-256 digest length in bytes.
pub const SHA256_LEN: usize = 32;

/// State codes returned by [`Crypto`] operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CryptoError {
    /// The output buffer cannot hold the result.
    BufferTooSmall,
    /// An input was rejected (malformed key, bad encoding, ...).
    InvalidInput,
    /// The platform does not provide this primitive.
    NotImplemented,
    /// The primitive failed.
    Failure,
}

impl From<CryptoError> for crate::Error {
    fn from(value: CryptoError) -> Self {
        match value {
            CryptoError::BufferTooSmall => crate::Error::BufferTooSmall,
            CryptoError::InvalidInput => crate::Error::InvalidParameter,
            CryptoError::NotImplemented => crate::Error::NotImplemented,
            CryptoError::Failure => crate::Error::CryptoError,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CryptoError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            CryptoError::BufferTooSmall => defmt::write!(f, "BufferTooSmall"),
            CryptoError::InvalidInput => defmt::write!(f, "InvalidInput"),
            CryptoError::NotImplemented => defmt::write!(f, "NotImplemented"),
            CryptoError::Failure => defmt::write!(f, "Failure"),
        }
    }
}

/// Where the signing key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateKey<'a> {
    /// PEM encoded key material held in memory.
    Pem(&'a [u8]),
    /// Key stored in a secure element slot.
    Slot(u8),
    /// Platform-defined key reference.
    Custom(&'a [u8]),
}

/// The crypto half of the board support package.
pub trait Crypto {
    /// URL-safe base64 without padding. Returns the bytes written to `dst`.
    fn base64url_encode(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, CryptoError> {
        Base64UrlUnpadded::encode(src, dst)
            .map(|encoded| encoded.len())
            .map_err(|_| CryptoError::BufferTooSmall)
    }

    /// Inverse of [`Crypto::base64url_encode`].
    fn base64url_decode(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, CryptoError> {
        match Base64UrlUnpadded::decode(src, dst) {
            Ok(decoded) => Ok(decoded.len()),
            Err(base64ct::Error::InvalidEncoding) => Err(CryptoError::InvalidInput),
            Err(_) => Err(CryptoError::BufferTooSmall),
        }
    }

    /// SHA-256 of `data`.
    fn sha256(&mut self, data: &[u8], digest: &mut [u8; SHA256_LEN]) -> Result<(), CryptoError> {
        let _ = (data, digest);
        Err(CryptoError::NotImplemented)
    }

    /// ECDSA P-256 signature over `digest`. Returns the signature length.
    fn ecc_sign(
        &mut self,
        key: &PrivateKey<'_>,
        digest: &[u8; SHA256_LEN],
        signature: &mut [u8],
    ) -> Result<usize, CryptoError> {
        let _ = (key, digest, signature);
        Err(CryptoError::NotImplemented)
    }

    /// Checks an ECDSA P-256 signature against `public_key`.
    fn ecc_verify(
        &mut self,
        public_key: &[u8],
        digest: &[u8; SHA256_LEN],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        let _ = (public_key, digest, signature);
        Err(CryptoError::NotImplemented)
    }
}
