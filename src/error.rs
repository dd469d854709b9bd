//! Error types shared by the store, session manager and request gateway.
//!
//! `ApiError` is the normalized payload handed to command code for any
//! non-2xx response. Its JSON shape (`status`, `message`, optional `details`)
//! is what form-error display keys off, so it is serialized as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

/// Normalized error payload for a non-2xx API response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    /// Build from a status code and raw response body.
    /// `details` is only populated for 400 and 422 responses.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();

        let message = parsed
            .as_ref()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
            })
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_message(status).to_string());

        let details = if status == 400 || status == 422 {
            parsed.as_ref().and_then(|v| {
                let arr = v
                    .get("details")
                    .or_else(|| v.get("errors"))
                    .and_then(|d| d.as_array())?;
                Some(
                    arr.iter()
                        .filter_map(|d| serde_json::from_value::<FieldError>(d.clone()).ok())
                        .collect(),
                )
            })
        } else {
            None
        };

        Self {
            status,
            message,
            details,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.details.is_some()
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not found",
        409 => "Conflict",
        422 => "Validation failed",
        429 => "Too many requests",
        500..=599 => "Server error",
        _ => "Request failed",
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API error {}: {}", self.status, self.message)
    }
}

/// No HTTP response was received at all
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures from login, register and refresh.
///
/// Cloneable because every waiter on a shared refresh receives the same outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("network request failed: {0}")]
    Network(String),

    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Api(ApiError),

    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("session ended while the refresh was in flight")]
    Superseded,

    #[error("{0}")]
    Store(String),
}

impl From<TransportError> for AuthError {
    fn from(e: TransportError) -> Self {
        AuthError::Network(e.0)
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Store(e.to_string())
    }
}

/// Failures surfaced by the authenticated request gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("network request failed: {0}")]
    Network(String),

    #[error("session expired, please log in again")]
    SessionExpired,

    #[error("{0}")]
    Api(ApiError),

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TransportError> for GatewayError {
    fn from(e: TransportError) -> Self {
        GatewayError::Network(e.0)
    }
}
