//! Access token claims decoding.
//!
//! Tokens are JWS compact serializations (`header.payload.signature`). Only the
//! payload is read, and only for its `exp` claim. The signature is NOT
//! verified: the server remains the authority on whether a token is valid, the
//! decoded expiry is used purely to decide when to renew locally.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// base64url, accepting both padded and unpadded payload segments
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Number of dot-separated segments in a compact token
const TOKEN_SEGMENTS: usize = 3;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Expected 3 token segments, found {0}")]
    Segments(usize),

    #[error("Token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Token expiry {0} is out of range")]
    ExpiryOutOfRange(i64),
}

/// Claims read from an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claims {
    pub expiry: DateTime<Utc>,
}

/// NumericDate per RFC 7519, which allows fractional seconds
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericDate {
    Seconds(i64),
    Fractional(f64),
}

impl NumericDate {
    fn as_seconds(&self) -> i64 {
        match *self {
            NumericDate::Seconds(s) => s,
            NumericDate::Fractional(f) => f.floor() as i64,
        }
    }
}

#[derive(Deserialize)]
struct RawClaims {
    exp: NumericDate,
}

/// Decode the claims of `token` without verifying its signature.
pub fn decode(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != TOKEN_SEGMENTS {
        return Err(TokenError::Segments(segments.len()));
    }

    let payload = PAYLOAD_ENGINE.decode(segments[1])?;
    let raw: RawClaims = serde_json::from_slice(&payload)?;

    let seconds = raw.exp.as_seconds();
    let expiry =
        DateTime::from_timestamp(seconds, 0).ok_or(TokenError::ExpiryOutOfRange(seconds))?;

    Ok(Claims { expiry })
}
