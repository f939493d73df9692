//! ES256 JSON Web Tokens for broker authentication.
//!
//! The token layout is
//!
//! ```text
//! b64url(header) "." b64url(claims) "." b64url(ecdsa(sha256(b64url(header) "." b64url(claims))))
//! ```
//!
//! with header `{"alg":"ES256","typ":"JWT"}` and claims
//! `{"iat":<now>,"exp":<now + lifetime>,"aud":"<project id>"}`. The result
//! is passed as the MQTT password, so it is written into a caller buffer
//! and returned as `&str`.

use serde::Serialize;

use super::{Crypto, CryptoError, PrivateKey, SHA256_LEN};
use crate::{Error, Result};

/// Longest accepted audience (project id).
pub const PROJECT_ID_MAX_LEN: usize = 200;

/// Largest signature a platform may return (DER encoded P-256).
pub const SIGNATURE_MAX_LEN: usize = 72;

const ALGORITHM: &str = "ES256";
const CLAIMS_BUF_LEN: usize = 64 + PROJECT_ID_MAX_LEN * 2;

#[derive(Serialize)]
struct Header<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Serialize)]
struct Claims<'a> {
    iat: u64,
    exp: u64,
    aud: &'a str,
}

/// Builds and signs a token into `out`.
///
/// `issued_at` is the current Unix time in seconds.
///
/// # Errors
///
/// - [`Error::InvalidParameter`] if `project_id` exceeds [`PROJECT_ID_MAX_LEN`],
///   or the platform reports a signature longer than [`SIGNATURE_MAX_LEN`]
/// - [`Error::BufferTooSmall`] if `out` cannot hold the token
/// - [`Error::NotImplemented`] if the platform lacks SHA-256 or ECDSA
/// - [`Error::JwtFormation`] for any other crypto failure
///
/// # Examples
///
/// ```rust,no_run
/// use libiot_connect::crypto::{Crypto, PrivateKey, jwt};
/// # struct SecureElement;
/// # impl Crypto for SecureElement {}
///
/// let mut crypto = SecureElement;
/// let mut buf = [0u8; 512];
/// let token = jwt::create_es256(
///     &mut crypto,
///     "my-project",
///     1_700_000_000,
///     3600,
///     &PrivateKey::Slot(0),
///     &mut buf,
/// )?;
/// # Ok::<(), libiot_connect::Error>(())
/// ```
pub fn create_es256<'o, C: Crypto>(
    crypto: &mut C,
    project_id: &str,
    issued_at: u64,
    lifetime_secs: u32,
    key: &PrivateKey<'_>,
    out: &'o mut [u8],
) -> Result<&'o str> {
    if project_id.len() > PROJECT_ID_MAX_LEN {
        return Err(Error::InvalidParameter);
    }

    let mut header = [0u8; 32];
    let header_len = serde_json_core::to_slice(
        &Header {
            alg: ALGORITHM,
            typ: "JWT",
        },
        &mut header,
    )
    .map_err(|_| Error::JwtFormation)?;

    let mut claims = [0u8; CLAIMS_BUF_LEN];
    let claims_len = serde_json_core::to_slice(
        &Claims {
            iat: issued_at,
            exp: issued_at.saturating_add(u64::from(lifetime_secs)),
            aud: project_id,
        },
        &mut claims,
    )
    .map_err(|_| Error::JwtFormation)?;

    let mut pos = crypto
        .base64url_encode(&header[..header_len], out)
        .map_err(jwt_error)?;
    pos = push_dot(out, pos)?;
    pos += crypto
        .base64url_encode(&claims[..claims_len], &mut out[pos..])
        .map_err(jwt_error)?;

    let mut digest = [0u8; SHA256_LEN];
    crypto.sha256(&out[..pos], &mut digest).map_err(jwt_error)?;

    let mut signature = [0u8; SIGNATURE_MAX_LEN];
    let signature_len = crypto
        .ecc_sign(key, &digest, &mut signature)
        .map_err(jwt_error)?;
    let signature = signature.get(..signature_len).ok_or(Error::InvalidParameter)?;

    pos = push_dot(out, pos)?;
    pos += crypto
        .base64url_encode(signature, &mut out[pos..])
        .map_err(jwt_error)?;

    debug!("jwt created, {} bytes", pos);
    core::str::from_utf8(&out[..pos]).map_err(|_| Error::JwtFormation)
}

/// Checks the signature of a token produced by [`create_es256`].
///
/// Returns `Ok(false)` for a well-formed token whose signature does not
/// match, and [`Error::InvalidParameter`] for a token that is not three
/// dot-separated base64url segments.
pub fn verify_es256<C: Crypto>(crypto: &mut C, token: &str, public_key: &[u8]) -> Result<bool> {
    let (signing_input, encoded_signature) =
        token.rsplit_once('.').ok_or(Error::InvalidParameter)?;
    if signing_input.split('.').count() != 2 {
        return Err(Error::InvalidParameter);
    }

    let mut signature = [0u8; SIGNATURE_MAX_LEN];
    let signature_len = crypto
        .base64url_decode(encoded_signature.as_bytes(), &mut signature)
        .map_err(|_| Error::InvalidParameter)?;

    let mut digest = [0u8; SHA256_LEN];
    crypto
        .sha256(signing_input.as_bytes(), &mut digest)
        .map_err(jwt_error)?;

    crypto
        .ecc_verify(public_key, &digest, &signature[..signature_len])
        .map_err(jwt_error)
}

fn push_dot(out: &mut [u8], pos: usize) -> Result<usize> {
    let slot = out.get_mut(pos).ok_or(Error::BufferTooSmall)?;
    *slot = b'.';
    Ok(pos + 1)
}

fn jwt_error(error: CryptoError) -> Error {
    match error {
        CryptoError::Failure => Error::JwtFormation,
        other => other.into(),
    }
}
