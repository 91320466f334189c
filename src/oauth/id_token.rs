//! Usage: Reads account identity out of an ID token payload.
//!
//! The token arrives straight from the token endpoint over TLS, so only the payload is decoded;
//! the signature is not checked.

use crate::shared::error::AppResult;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct IdTokenClaims {
    #[serde(default)]
    pub(crate) oid: Option<String>,
    #[serde(default)]
    pub(crate) tid: Option<String>,
    #[serde(default)]
    pub(crate) sub: Option<String>,
    #[serde(default)]
    pub(crate) preferred_username: Option<String>,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

/// A signed-in user as tracked by the session cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// `{oid}.{tid}`; stable across resources and tokens.
    pub home_account_id: String,
    pub username: String,
    pub name: Option<String>,
    pub tenant_id: String,
}

pub(crate) fn decode_claims(id_token: &str) -> AppResult<IdTokenClaims> {
    let mut parts = id_token.trim().split('.');
    let (Some(_header), Some(payload)) = (parts.next(), parts.next()) else {
        return Err("SYSTEM_ERROR: id_token is not a JWT".to_string().into());
    };

    // Some issuers pad the segments despite RFC 7515.
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| format!("SYSTEM_ERROR: id_token payload is not base64url: {e}"))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| format!("SYSTEM_ERROR: id_token payload json invalid: {e}").into())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl IdTokenClaims {
    pub(crate) fn into_account(self) -> AppResult<Account> {
        let object_id = non_empty(self.oid.as_ref())
            .or_else(|| non_empty(self.sub.as_ref()))
            .ok_or_else(|| "SYSTEM_ERROR: id_token has neither oid nor sub".to_string())?
            .to_string();
        let tenant_id = non_empty(self.tid.as_ref())
            .ok_or_else(|| "SYSTEM_ERROR: id_token missing tid".to_string())?
            .to_string();
        let username = non_empty(self.preferred_username.as_ref())
            .unwrap_or(object_id.as_str())
            .to_string();

        Ok(Account {
            home_account_id: format!("{object_id}.{tenant_id}"),
            username,
            name: non_empty(self.name.as_ref()).map(str::to_string),
            tenant_id,
        })
    }
}

pub(crate) fn account_from_id_token(id_token: &str) -> AppResult<Account> {
    decode_claims(id_token)?.into_account()
}

#[cfg(test)]
pub(crate) fn fake_id_token(oid: &str, tid: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = serde_json::json!({
        "oid": oid,
        "tid": tid,
        "preferred_username": username,
        "name": "Adele Vance",
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_is_built_from_oid_and_tid() {
        let token = fake_id_token("oid-1", "tid-1", "adele@contoso.com");
        let account = account_from_id_token(&token).expect("account");
        assert_eq!(account.home_account_id, "oid-1.tid-1");
        assert_eq!(account.username, "adele@contoso.com");
        assert_eq!(account.name.as_deref(), Some("Adele Vance"));
        assert_eq!(account.tenant_id, "tid-1");
    }

    #[test]
    fn username_falls_back_to_object_id() {
        let claims = IdTokenClaims {
            sub: Some("sub-1".to_string()),
            tid: Some("tid-1".to_string()),
            ..IdTokenClaims::default()
        };
        let account = claims.into_account().expect("account");
        assert_eq!(account.home_account_id, "sub-1.tid-1");
        assert_eq!(account.username, "sub-1");
    }

    #[test]
    fn missing_tenant_is_rejected() {
        let claims = IdTokenClaims {
            oid: Some("oid-1".to_string()),
            ..IdTokenClaims::default()
        };
        assert!(claims.into_account().is_err());
    }

    #[test]
    fn non_jwt_is_rejected() {
        assert!(decode_claims("opaque").is_err());
        assert!(decode_claims("a.!!!.c").is_err());
    }
}
