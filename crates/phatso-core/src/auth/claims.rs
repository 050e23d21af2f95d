use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// URL-safe base64 that accepts segments with or without `=` padding.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid token format: expected 3 segments, found {0}")]
    Malformed(usize),

    #[error("Invalid payload encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid claims: {0}")]
    Claims(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No credential stored")]
    Missing,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Claims carried in the payload segment of a bearer credential.
/// Only `exp` is required. Times are NumericDate seconds since the Unix
/// epoch and may carry a fractional part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerClaims {
    pub exp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl BearerClaims {
    /// Decode the payload segment without checking the signature.
    /// The server owns verification; the client only needs the expiry.
    ///
    /// The token must have exactly three dot-separated segments
    /// (`header.payload.signature`). Two-segment tokens are rejected as
    /// `DecodeError::Malformed` even though their payload is readable.
    pub fn decode(token: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(DecodeError::Malformed(parts.len()));
        }

        let payload = SEGMENT_ENGINE.decode(parts[1])?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Expiry as milliseconds since the Unix epoch, rounded up so that
    /// `now_ms >= expires_at_millis()` matches `now_ms >= exp * 1000`.
    /// Out-of-range values saturate.
    pub fn expires_at_millis(&self) -> i64 {
        (self.exp * 1000.0).ceil() as i64
    }
}

/// Build an unsigned token around the given payload.
#[cfg(test)]
pub(crate) fn unsigned_token(payload: &serde_json::Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
