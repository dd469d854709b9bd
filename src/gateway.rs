//! Authenticated request path for every API call that needs a principal.
//!
//! A 401 triggers exactly one retry: with the current token if the session
//! already moved on since the request went out, else with the token from one
//! refresh. If neither is available the login redirect fires and the call
//! fails with `SessionExpired`. A session started while the request was in
//! flight is never torn down by it.

use crate::error::{ApiError, GatewayError};
use crate::http::{join_url, HttpRequest, HttpResponse, HttpTransport, Method};
use crate::session::SessionManager;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the user is sent when the session cannot be recovered
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

pub struct Gateway {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    session: SessionManager,
    redirect: Arc<dyn LoginRedirect>,
}

impl Gateway {
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        session: SessionManager,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            transport,
            session,
            redirect,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send a request, returning whatever response the server gave
    /// (after at most one refresh-and-retry on 401).
    pub fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, GatewayError> {
        let url = join_url(&self.base_url, path);
        let body = body.map(serde_json::to_string).transpose()?;

        let sent = self.session.token();
        let resp = self.issue(method, &url, body.as_deref(), sent.as_deref())?;
        if resp.status != 401 {
            return Ok(resp);
        }

        match self.recover(sent.as_deref()) {
            Some(token) => {
                debug!(url = %url, "retrying with refreshed token");
                self.issue(method, &url, body.as_deref(), Some(&token))
            }
            None => {
                // only end the session this request was rejected with
                if sent.is_some() && self.session.token() == sent {
                    if let Err(e) = self.session.logout() {
                        warn!(error = %e, "logout after rejected request left credentials behind");
                    }
                }
                self.session.note_session_expired(&url);
                self.redirect.redirect_to_login();
                Err(GatewayError::SessionExpired)
            }
        }
    }

    /// Token to retry a 401 with, if the session can be recovered.
    ///
    /// A session that changed while the request was in flight is used as is.
    /// Otherwise one refresh is attempted.
    fn recover(&self, sent: Option<&str>) -> Option<String> {
        let current = self.session.token()?;
        if Some(current.as_str()) != sent {
            debug!("session replaced while the request was in flight");
            return Some(current);
        }

        match self.session.refresh() {
            Ok(session) => Some(session.token),
            Err(e) => {
                debug!(error = %e, "refresh after 401 failed");
                // a login may have replaced the session while refreshing
                self.session.token().filter(|t| Some(t.as_str()) != sent)
            }
        }
    }

    /// `send`, then normalize non-2xx into `GatewayError::Api` and decode the body
    pub fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, GatewayError> {
        let resp = self.send(method, path, body)?;
        if !resp.is_success() {
            return Err(GatewayError::Api(ApiError::from_response(
                resp.status,
                &resp.body,
            )));
        }
        let raw = if resp.body.trim().is_empty() {
            "null"
        } else {
            resp.body.as_str()
        };
        serde_json::from_str(raw).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    fn issue(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
        token: Option<&str>,
    ) -> Result<HttpResponse, GatewayError> {
        let mut request = HttpRequest::new(method, url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(token) = token {
            request = request.bearer(token);
        }
        if let Some(body) = body {
            request = request.json_body(body.to_string());
        }

        debug!(method = method.as_str(), url = %url, "api request");
        let resp = self.transport.execute(&request)?;
        debug!(status = resp.status, "api response");
        Ok(resp)
    }
}
