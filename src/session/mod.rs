//! Client-side session: the logged-in principal, its credentials and the
//! typed decode step that turns an auth response into one.

mod manager;
mod timer;

pub use manager::{SessionManager, SessionOptions};
#[cfg(test)]
pub use manager::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Always lower-case
    pub role: String,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Wire shape shared by login, register and refresh responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload {
    #[serde(default)]
    token: Option<Value>,
    #[serde(default)]
    refresh_token: Option<Value>,
    #[serde(default)]
    email: Option<Value>,
    #[serde(default)]
    role: Option<Value>,
    #[serde(default)]
    first_name: Option<Value>,
    #[serde(default)]
    last_name: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
}

fn required(field: &str, value: Option<Value>) -> Result<String, AuthError> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(AuthError::InvalidResponse(format!("{} is empty", field))),
        Some(_) => Err(AuthError::InvalidResponse(format!("{} is not a string", field))),
        None => Err(AuthError::InvalidResponse(format!("{} is missing", field))),
    }
}

/// Validate an auth response body and build the session it describes.
///
/// Fails with `InvalidResponse` unless token, refreshToken, email, role,
/// firstName and lastName are all non-empty strings.
pub fn decode_auth_response(body: &str) -> Result<Session, AuthError> {
    let payload: AuthPayload = serde_json::from_str(body)
        .map_err(|e| AuthError::InvalidResponse(format!("body is not an auth payload: {}", e)))?;

    let token = required("token", payload.token)?;
    let refresh_token = required("refreshToken", payload.refresh_token)?;
    let email = required("email", payload.email)?;
    let role = required("role", payload.role)?;
    let first_name = required("firstName", payload.first_name)?;
    let last_name = required("lastName", payload.last_name)?;

    let id = match payload.user_id {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(Session {
        token,
        refresh_token,
        user: User {
            id,
            email,
            first_name,
            last_name,
            role: role.to_lowercase(),
        },
    })
}
