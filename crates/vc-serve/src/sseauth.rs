use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_PREFIX: &str = "sse1";
pub const SCOPE_SSE: &str = "sse";
pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token format")]
    InvalidFormat,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid token scope")]
    InvalidScope,
    #[error("secret cannot be empty")]
    EmptySecret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub exp: i64,
    pub iat: i64,
    pub scope: String,
}

/// Mint a `sse1.<payload>.<sig>` token: payload is URL-safe base64 of the
/// claims JSON, sig is HMAC-SHA256 over `"sse1." + payload`.
pub fn generate_token(
    secret: &[u8],
    scope: &str,
    now: DateTime<Utc>,
) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let claims = Claims {
        exp: (now + Duration::seconds(DEFAULT_TTL_SECS)).timestamp(),
        iat: now.timestamp(),
        scope: scope.to_string(),
    };
    let payload_json = serde_json::to_vec(&claims).map_err(|_| TokenError::InvalidFormat)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
    let sig_input = format!("{TOKEN_PREFIX}.{payload_b64}");

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::EmptySecret)?;
    mac.update(sig_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{sig_input}.{sig_b64}"))
}

/// Verify prefix, signature (constant time), expiry, and scope.
pub fn validate_token(
    token: &str,
    secret: &[u8],
    expected_scope: &str,
    now: DateTime<Utc>,
) -> Result<Claims, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let mut parts = token.split('.');
    let (prefix, payload_b64, sig_b64) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(payload), Some(sig), None) => (prefix, payload, sig),
            _ => return Err(TokenError::InvalidFormat),
        };

    if prefix != TOKEN_PREFIX {
        return Err(TokenError::InvalidFormat);
    }

    let sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::InvalidFormat)?;

    let sig_input = format!("{prefix}.{payload_b64}");
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::EmptySecret)?;
    mac.update(sig_input.as_bytes());
    mac.verify_slice(&sig)
        .map_err(|_| TokenError::InvalidSignature)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::InvalidFormat)?;
    let claims: Claims =
        serde_json::from_slice(&payload_json).map_err(|_| TokenError::InvalidFormat)?;

    if now.timestamp() > claims.exp {
        return Err(TokenError::Expired);
    }
    if claims.scope != expected_scope {
        return Err(TokenError::InvalidScope);
    }

    Ok(claims)
}
