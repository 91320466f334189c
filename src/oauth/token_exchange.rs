//! Usage: Token endpoint helpers (authorization_code + refresh_token grants).

use crate::oauth::authority::scope_param;
use crate::shared::error::{AppError, AppResult, UI_REQUIRED};
use crate::shared::security::mask_token;
use serde_json::Value;
use std::collections::HashMap;

/// OAuth `error` values that only an interactive login can resolve.
const UI_REQUIRED_ERRORS: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "login_required",
];
/// Microsoft `suberror` values that only an interactive login can resolve.
const UI_REQUIRED_SUBERRORS: &[&str] = &[
    "consent_required",
    "basic_action",
    "additional_action",
    "message_only",
    "user_password_expired",
];
const ERROR_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub(crate) struct TokenExchangeRequest {
    pub(crate) token_uri: String,
    pub(crate) client_id: String,
    pub(crate) code: String,
    pub(crate) redirect_uri: String,
    pub(crate) code_verifier: String,
    pub(crate) scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct TokenRefreshRequest {
    pub(crate) token_uri: String,
    pub(crate) client_id: String,
    pub(crate) refresh_token: String,
    pub(crate) scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct OAuthTokenSet {
    pub(crate) access_token: String,
    pub(crate) refresh_token: Option<String>,
    pub(crate) expires_at: Option<i64>,
    pub(crate) id_token: Option<String>,
    /// Scopes the token was actually issued for (`scope` field of the response).
    pub(crate) granted_scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct OAuthErrorDetails {
    pub(crate) error: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) suberror: Option<String>,
    pub(crate) error_codes: Vec<i64>,
}

pub(crate) async fn exchange_authorization_code(
    client: &reqwest::Client,
    req: &TokenExchangeRequest,
) -> AppResult<OAuthTokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "authorization_code".to_string());
    form.insert("client_id", req.client_id.trim().to_string());
    form.insert("code", req.code.trim().to_string());
    form.insert("redirect_uri", req.redirect_uri.trim().to_string());
    form.insert("code_verifier", req.code_verifier.trim().to_string());
    form.insert("scope", scope_param(&req.scopes));

    let response = client
        .post(req.token_uri.trim())
        .form(&form)
        .send()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: oauth token exchange request failed: {e}"))?;

    parse_token_response(response, &req.scopes).await
}

pub(crate) async fn refresh_access_token(
    client: &reqwest::Client,
    req: &TokenRefreshRequest,
) -> AppResult<OAuthTokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "refresh_token".to_string());
    form.insert("client_id", req.client_id.trim().to_string());
    form.insert("refresh_token", req.refresh_token.trim().to_string());
    form.insert("scope", scope_param(&req.scopes));

    let response = client
        .post(req.token_uri.trim())
        .form(&form)
        .send()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: oauth refresh request failed: {e}"))?;

    parse_token_response(response, &req.scopes).await
}

async fn parse_token_response(
    response: reqwest::Response,
    requested_scopes: &[String],
) -> AppResult<OAuthTokenSet> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: oauth token response read failed: {e}"))?;

    if !status.is_success() {
        return Err(token_error(status.as_u16(), &body));
    }

    parse_token_body(&body, requested_scopes, crate::shared::time::now_unix_seconds())
}

pub(crate) fn parse_token_body(
    body: &str,
    requested_scopes: &[String],
    now_unix: i64,
) -> AppResult<OAuthTokenSet> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| format!("SYSTEM_ERROR: oauth token response json invalid: {e}"))?;

    let access_token = string_field(&value, "access_token")
        .ok_or_else(|| "SYSTEM_ERROR: oauth token response missing access_token".to_string())?;
    let refresh_token = string_field(&value, "refresh_token");
    let id_token = string_field(&value, "id_token");

    // Absent `scope` means the request was granted as asked (RFC 6749 section 5.1).
    let granted_scopes = match string_field(&value, "scope") {
        Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
        None => requested_scopes.to_vec(),
    };

    let expires_in = value.get("expires_in").and_then(parse_i64_lossy);
    let expires_at = expires_in.and_then(|v| {
        if v <= 0 {
            None
        } else {
            Some(now_unix.saturating_add(v))
        }
    });

    Ok(OAuthTokenSet {
        access_token,
        refresh_token,
        expires_at,
        id_token,
        granted_scopes,
    })
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub(crate) fn parse_oauth_error_details(body: &str) -> OAuthErrorDetails {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return OAuthErrorDetails::default();
    };

    OAuthErrorDetails {
        error: string_field(&value, "error"),
        description: string_field(&value, "error_description"),
        suberror: string_field(&value, "suberror"),
        error_codes: value
            .get("error_codes")
            .and_then(Value::as_array)
            .map(|codes| codes.iter().filter_map(parse_i64_lossy).collect())
            .unwrap_or_default(),
    }
}

pub(crate) fn requires_interaction(details: &OAuthErrorDetails) -> bool {
    let listed = |value: Option<&str>, list: &[&str]| {
        value.is_some_and(|v| list.iter().any(|item| item.eq_ignore_ascii_case(v.trim())))
    };
    listed(details.error.as_deref(), UI_REQUIRED_ERRORS)
        || listed(details.suberror.as_deref(), UI_REQUIRED_SUBERRORS)
}

fn token_error(status: u16, body: &str) -> AppError {
    let details = parse_oauth_error_details(body);
    tracing::debug!(
        status,
        error = details.error.as_deref().unwrap_or(""),
        error_codes = ?details.error_codes,
        "token endpoint rejected request"
    );
    let description = details
        .description
        .as_deref()
        .map(|d| d.chars().take(240).collect::<String>());

    if requires_interaction(&details) {
        let mut msg = format!(
            "token endpoint requires user interaction (error={}",
            details.error.as_deref().unwrap_or("unknown")
        );
        if let Some(sub) = details.suberror.as_deref() {
            msg.push_str(" suberror=");
            msg.push_str(sub);
        }
        msg.push(')');
        if let Some(description) = description {
            msg.push_str(": ");
            msg.push_str(&description);
        }
        return AppError::new(UI_REQUIRED, msg);
    }

    let mut msg = format!("oauth token endpoint returned status={status}");
    if let Some(code) = details.error.as_deref() {
        msg.push_str(" code=");
        msg.push_str(code);
    }
    if let Some(description) = description {
        msg.push_str(" message=");
        msg.push_str(&description);
    }
    msg.push_str(" body=");
    msg.push_str(&sanitize_oauth_error_body_snippet(body));
    AppError::new("AUTH_PROVIDER_ERROR", msg)
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc == "code"
        || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_oauth_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_SNIPPET_CHARS).collect();
        }
    }
    body.chars().take(ERROR_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_i64_lossy_supports_number_and_string() {
        assert_eq!(parse_i64_lossy(&Value::from(3599)), Some(3599));
        assert_eq!(parse_i64_lossy(&Value::from("3599")), Some(3599));
        assert_eq!(parse_i64_lossy(&Value::from("x")), None);
    }

    #[test]
    fn token_body_is_parsed_with_granted_scopes() {
        let body = r#"{
          "token_type": "Bearer",
          "scope": "https://contoso.sharepoint.com/AllSites.Manage https://contoso.sharepoint.com/User.Read",
          "expires_in": "3599",
          "access_token": "eyJ0eXAi.access",
          "refresh_token": "0.AAAA.refresh",
          "id_token": "eyJ.id.sig"
        }"#;
        let set = parse_token_body(body, &[], 1_000).expect("token set");
        assert_eq!(set.access_token, "eyJ0eXAi.access");
        assert_eq!(set.refresh_token.as_deref(), Some("0.AAAA.refresh"));
        assert_eq!(set.expires_at, Some(4_599));
        assert_eq!(set.granted_scopes.len(), 2);
    }

    #[test]
    fn missing_scope_falls_back_to_requested() {
        let requested = vec!["https://graph.microsoft.com/user.read".to_string()];
        let set = parse_token_body(r#"{"access_token":"at"}"#, &requested, 0).expect("set");
        assert_eq!(set.granted_scopes, requested);
        assert_eq!(set.expires_at, None);
    }

    #[test]
    fn missing_access_token_is_rejected() {
        let err = parse_token_body(r#"{"refresh_token":"rt"}"#, &[], 0).expect_err("fail");
        assert!(err.to_string().contains("missing access_token"));
    }

    #[test]
    fn consent_required_maps_to_ui_required() {
        let body = r#"{
          "error": "invalid_grant",
          "error_description": "AADSTS65001: The user or administrator has not consented to use the application.",
          "error_codes": [65001],
          "suberror": "consent_required"
        }"#;
        let details = parse_oauth_error_details(body);
        assert_eq!(details.error_codes, vec![65001]);
        assert!(requires_interaction(&details));

        let err = token_error(400, body);
        assert!(err.is_ui_required());
        assert!(err.to_string().contains("AADSTS65001"));
    }

    #[test]
    fn other_errors_map_to_provider_error_with_masked_body() {
        let body = r#"{
          "error": "invalid_client",
          "error_description": "AADSTS7000218: client_assertion missing",
          "refresh_token": "0.AAAAverysecretrefresh"
        }"#;
        let err = token_error(401, body);
        assert_eq!(err.code(), "AUTH_PROVIDER_ERROR");
        assert!(err.to_string().contains("status=401"));
        assert!(err.to_string().contains("code=invalid_client"));
        assert!(!err.to_string().contains("verysecretrefresh"));
    }

    #[test]
    fn non_json_error_body_is_truncated() {
        let body = "x".repeat(2_000);
        let err = token_error(502, &body);
        assert_eq!(err.code(), "AUTH_PROVIDER_ERROR");
        assert!(err.message().len() < 700);
    }
}
