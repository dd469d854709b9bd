//! Loan application submission.

use crate::error::{ApiError, GatewayError};
use crate::gateway::Gateway;
use crate::http::Method;
use crate::store::USER_ID_KEY;
use serde::Serialize;
use serde_json::Value;

pub const LOAN_ADD_PATH: &str = "/loan/add";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplication {
    pub loan_type: String,
    pub amount: f64,
    pub tenure_months: u32,
    pub monthly_income: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted {
        message: String,
        application_id: Option<String>,
    },
    /// Business-rule rejection; the session is unaffected
    Ineligible { title: String, message: String },
}

/// Submit through the gateway, attaching the stored `userId`.
pub fn submit(gateway: &Gateway, application: &LoanApplication) -> Result<SubmitOutcome, GatewayError> {
    let mut payload = serde_json::to_value(application)?;
    if let Some(user_id) = gateway.session().store().get(USER_ID_KEY)? {
        payload["userId"] = Value::String(user_id);
    }

    let resp = gateway.send(Method::Post, LOAN_ADD_PATH, Some(&payload))?;
    let body: Option<Value> = serde_json::from_str(&resp.body).ok();

    if let Some(body) = body.as_ref().filter(|b| is_ineligible(b)) {
        return Ok(SubmitOutcome::Ineligible {
            title: text(body, "title").unwrap_or_else(|| "Not eligible".to_string()),
            message: text(body, "message")
                .unwrap_or_else(|| "This application does not meet the lending criteria".to_string()),
        });
    }

    if !resp.is_success() {
        return Err(GatewayError::Api(ApiError::from_response(resp.status, &resp.body)));
    }

    let body = body.unwrap_or(Value::Null);
    Ok(SubmitOutcome::Submitted {
        message: text(&body, "message").unwrap_or_else(|| "Application submitted".to_string()),
        application_id: ["applicationId", "id"]
            .iter()
            .find_map(|k| match body.get(*k) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            }),
    })
}

fn is_ineligible(body: &Value) -> bool {
    body.get("eligible").and_then(Value::as_bool) == Some(false)
}

fn text(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
