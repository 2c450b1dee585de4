use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::roles::Role;

type HmacSha256 = Hmac<Sha256>;
const TOKEN_VERSION_V1: &str = "v1";
const MAX_TOKEN_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenErrorCode {
    InvalidFormat,
    UnsupportedVersion,
    InvalidSignature,
    InvalidPayload,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError {
    pub code: TokenErrorCode,
    pub message: String,
}

impl TokenError {
    pub fn new(code: TokenErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for TokenError {}

/// Authenticated caller, carried explicitly through each request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    /// Unix seconds.
    pub issued_at: i64,
    pub expires_at: i64,
}

impl Session {
    pub fn new(user_id: impl Into<String>, role: Role, issued_at: i64, ttl_secs: i64) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            issued_at,
            expires_at: issued_at + ttl_secs,
        }
    }
}

/// 32 random bytes for a fresh signing key.
pub fn new_secret() -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    out.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    out
}

pub fn encode_token(session: &Session, secret: &[u8]) -> Result<String, TokenError> {
    let payload_bytes = serde_json::to_vec(session)
        .map_err(|e| TokenError::new(TokenErrorCode::InvalidPayload, e.to_string()))?;
    let payload_part = URL_SAFE_NO_PAD.encode(payload_bytes);
    let sig_part = URL_SAFE_NO_PAD.encode(sign(payload_part.as_bytes(), secret)?);
    Ok(format!("{}.{}.{}", TOKEN_VERSION_V1, payload_part, sig_part))
}

pub fn decode_token(token: &str, secret: &[u8], now: i64) -> Result<Session, TokenError> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(TokenError::new(
            TokenErrorCode::InvalidFormat,
            "token exceeds max length",
        ));
    }
    let parts: Vec<&str> = token.trim().split('.').collect();
    let (payload_part, sig_part) = match parts.as_slice() {
        [version, payload, sig] if *version == TOKEN_VERSION_V1 => (*payload, *sig),
        [version, _, _] => {
            return Err(TokenError::new(
                TokenErrorCode::UnsupportedVersion,
                format!("unsupported token version: {version}"),
            ))
        }
        _ => {
            return Err(TokenError::new(
                TokenErrorCode::InvalidFormat,
                "invalid token format",
            ))
        }
    };

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| TokenError::new(TokenErrorCode::InvalidPayload, e.to_string()))?;
    mac.update(payload_part.as_bytes());
    let expected = URL_SAFE_NO_PAD
        .decode(sig_part)
        .map_err(|e| TokenError::new(TokenErrorCode::InvalidFormat, e.to_string()))?;
    mac.verify_slice(&expected).map_err(|_| {
        TokenError::new(TokenErrorCode::InvalidSignature, "token signature mismatch")
    })?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_part)
        .map_err(|e| TokenError::new(TokenErrorCode::InvalidFormat, e.to_string()))?;
    let session: Session = serde_json::from_slice(&payload_bytes)
        .map_err(|e| TokenError::new(TokenErrorCode::InvalidPayload, e.to_string()))?;

    if now >= session.expires_at {
        return Err(TokenError::new(TokenErrorCode::Expired, "token expired"));
    }
    Ok(session)
}

fn sign(data: &[u8], secret: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| TokenError::new(TokenErrorCode::InvalidPayload, e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
