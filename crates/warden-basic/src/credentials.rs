//! Decoding of `Basic` authorization header values.

use std::fmt;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::error::DecodeError;

/// Standard alphabet, padding optional, stray trailing bits tolerated.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Username and password taken from a header.
///
/// Both are raw bytes; legacy clients send Latin-1.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    /// Pair already-decoded fields.
    #[must_use]
    pub fn new(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username bytes, case-folded when the scheme is case-insensitive.
    #[must_use]
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    /// Password bytes.
    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.password
    }

    /// Username rendered for logs and identities.
    #[must_use]
    pub fn username_lossy(&self) -> String {
        String::from_utf8_lossy(&self.username).into_owned()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username_lossy())
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode a header value such as `Basic dXNlcjpwYXNz`.
///
/// The scheme token is skipped without being checked; callers route by
/// scheme before getting here.
///
/// # Errors
///
/// [`DecodeError::Malformed`] for a missing or undecodable payload, line
/// breaks in the decoded text or an empty username;
/// [`DecodeError::NoPassword`] and [`DecodeError::EmptyPassword`] when the
/// password part is absent or empty.
pub fn decode(header: &[u8], case_sensitive: bool) -> Result<Credentials, DecodeError> {
    let payload = encoded_payload(header);
    if payload.is_empty() {
        return Err(DecodeError::Malformed);
    }

    let mut decoded = LENIENT
        .decode(payload)
        .map_err(|_| DecodeError::Malformed)?;
    if decoded.iter().any(|&byte| byte == b'\r' || byte == b'\n') {
        return Err(DecodeError::Malformed);
    }

    let Some(colon) = decoded.iter().position(|&byte| byte == b':') else {
        if !case_sensitive {
            decoded.make_ascii_lowercase();
        }
        return Err(DecodeError::NoPassword {
            username: String::from_utf8_lossy(&decoded).into_owned(),
        });
    };

    let password = decoded.split_off(colon + 1);
    decoded.truncate(colon);
    let mut username = decoded;
    if username.is_empty() {
        return Err(DecodeError::Malformed);
    }
    if !case_sensitive {
        username.make_ascii_lowercase();
    }
    if password.is_empty() {
        return Err(DecodeError::EmptyPassword {
            username: String::from_utf8_lossy(&username).into_owned(),
        });
    }

    Ok(Credentials { username, password })
}

fn encoded_payload(header: &[u8]) -> &[u8] {
    let scheme_end = header
        .iter()
        .position(u8::is_ascii_whitespace)
        .unwrap_or(header.len());
    let rest = &header[scheme_end..];
    let start = rest
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(rest.len());
    let rest = &rest[start..];
    let line = rest
        .iter()
        .position(|&byte| byte == b'\n')
        .map_or(rest, |end| &rest[..end]);
    line.trim_ascii_end()
}
