//! Unverified decoding of bearer-token claims.
//!
//! Only used to decide when to refresh proactively. The server stays the
//! authority on whether a token is valid, so the signature is never checked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Claims {
    /// Expiry as seconds since the Unix epoch
    pub exp: Option<i64>,
}

/// Decode the claims segment of a three-part token. Returns `None` on any malformed input.
pub fn decode(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || payload.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    let obj = value.as_object()?;

    let exp = obj.get("exp").and_then(|e| {
        e.as_i64()
            .or_else(|| e.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
    });

    Some(Claims { exp })
}

/// Expiry of `token`, if it carries a decodable one
pub fn expiry(token: &str) -> Option<i64> {
    decode(token).and_then(|c| c.exp)
}

#[cfg(test)]
pub(crate) fn encode_unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}
