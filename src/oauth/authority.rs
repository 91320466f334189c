//! Usage: Microsoft identity platform v2.0 endpoints and authorize URL construction.

use crate::shared::error::AppResult;
use reqwest::Url;

/// Scopes the identity platform always grants alongside resource scopes.
pub(crate) const RESERVED_SCOPES: &[&str] = &["openid", "profile", "offline_access"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Authority {
    base: String,
}

impl Authority {
    pub(crate) fn parse(raw: &str) -> AppResult<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let url = Url::parse(trimmed)
            .map_err(|e| format!("SEC_INVALID_INPUT: invalid authority url: {e}"))?;
        if url.host_str().is_none() {
            return Err("SEC_INVALID_INPUT: authority url has no host"
                .to_string()
                .into());
        }
        Ok(Self {
            base: trimmed.to_string(),
        })
    }

    pub(crate) fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.base)
    }

    pub(crate) fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.base)
    }
}

pub(crate) fn is_reserved_scope(scope: &str) -> bool {
    RESERVED_SCOPES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(scope.trim()))
}

/// Requested scopes followed by the reserved ones, de-duplicated case-insensitively.
pub(crate) fn scope_param(scopes: &[String]) -> String {
    let mut out: Vec<&str> = Vec::new();
    let requested = scopes.iter().map(|s| s.trim());
    for scope in requested.chain(RESERVED_SCOPES.iter().copied()) {
        if scope.is_empty() || out.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
            continue;
        }
        out.push(scope);
    }
    out.join(" ")
}

#[derive(Debug, Clone)]
pub(crate) struct AuthorizeRequest<'a> {
    pub(crate) client_id: &'a str,
    pub(crate) redirect_uri: &'a str,
    pub(crate) scopes: &'a [String],
    pub(crate) state: &'a str,
    pub(crate) code_challenge: &'a str,
    pub(crate) login_hint: Option<&'a str>,
}

pub(crate) fn build_authorize_url(
    authority: &Authority,
    req: &AuthorizeRequest<'_>,
) -> AppResult<String> {
    let mut url = Url::parse(&authority.authorize_endpoint())
        .map_err(|e| format!("SYSTEM_ERROR: invalid authorize url: {e}"))?;
    {
        let scope = scope_param(req.scopes);
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", req.client_id);
        query.append_pair("response_type", "code");
        query.append_pair("redirect_uri", req.redirect_uri);
        query.append_pair("response_mode", "query");
        query.append_pair("scope", &scope);
        query.append_pair("state", req.state);
        query.append_pair("code_challenge", req.code_challenge);
        query.append_pair("code_challenge_method", "S256");
        match req.login_hint.map(str::trim).filter(|v| !v.is_empty()) {
            Some(hint) => {
                query.append_pair("login_hint", hint);
            }
            None => {
                query.append_pair("prompt", "select_account");
            }
        }
    }
    Ok(url.to_string())
}

pub(crate) fn make_redirect_uri(redirect_host: &str, port: u16, callback_path: &str) -> String {
    format!("http://{redirect_host}:{port}{callback_path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_value(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .expect("url")
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn endpoints_are_derived_from_authority() {
        let authority = Authority::parse("https://login.microsoftonline.com/organizations/").unwrap();
        assert_eq!(
            authority.authorize_endpoint(),
            "https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize"
        );
        assert_eq!(
            authority.token_endpoint(),
            "https://login.microsoftonline.com/organizations/oauth2/v2.0/token"
        );
    }

    #[test]
    fn authority_without_host_is_rejected() {
        assert!(Authority::parse("not a url").is_err());
    }

    #[test]
    fn scope_param_appends_reserved_scopes_once() {
        let scopes = vec![
            "https://graph.microsoft.com/user.read".to_string(),
            "OpenID".to_string(),
        ];
        assert_eq!(
            scope_param(&scopes),
            "https://graph.microsoft.com/user.read OpenID profile offline_access"
        );
        assert!(is_reserved_scope(" offline_access "));
        assert!(!is_reserved_scope("user.read"));
    }

    #[test]
    fn authorize_url_carries_pkce_and_prompt_without_hint() {
        let authority = Authority::parse("https://login.microsoftonline.com/organizations").unwrap();
        let scopes = vec!["https://contoso.sharepoint.com/allsites.manage".to_string()];
        let url = build_authorize_url(
            &authority,
            &AuthorizeRequest {
                client_id: "client-1",
                redirect_uri: "http://localhost:5123/",
                scopes: &scopes,
                state: "st",
                code_challenge: "challenge",
                login_hint: None,
            },
        )
        .unwrap();

        assert!(url.starts_with("https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize?"));
        assert_eq!(query_value(&url, "client_id").as_deref(), Some("client-1"));
        assert_eq!(query_value(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(
            query_value(&url, "redirect_uri").as_deref(),
            Some("http://localhost:5123/")
        );
        assert_eq!(
            query_value(&url, "scope").as_deref(),
            Some("https://contoso.sharepoint.com/allsites.manage openid profile offline_access")
        );
        assert_eq!(query_value(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(query_value(&url, "prompt").as_deref(), Some("select_account"));
        assert!(query_value(&url, "login_hint").is_none());
    }

    #[test]
    fn authorize_url_uses_login_hint_for_known_account() {
        let authority = Authority::parse("https://login.microsoftonline.com/organizations").unwrap();
        let url = build_authorize_url(
            &authority,
            &AuthorizeRequest {
                client_id: "client-1",
                redirect_uri: "http://localhost:5123/",
                scopes: &[],
                state: "st",
                code_challenge: "challenge",
                login_hint: Some("adele@contoso.com"),
            },
        )
        .unwrap();
        assert_eq!(
            query_value(&url, "login_hint").as_deref(),
            Some("adele@contoso.com")
        );
        assert!(query_value(&url, "prompt").is_none());
    }

    #[test]
    fn redirect_uri_uses_bound_port() {
        assert_eq!(make_redirect_uri("localhost", 5123, "/"), "http://localhost:5123/");
    }
}
