//! Usage: Security-sensitive helpers (token masking, URL redaction, constant-time equality).

use reqwest::Url;
use subtle::ConstantTimeEq;

const TOKEN_MASK_PREFIX_LEN: usize = 6;
const TOKEN_MASK_SUFFIX_LEN: usize = 4;
const SENSITIVE_QUERY_KEYS: &[&str] = &["code", "state", "code_verifier", "login_hint"];

pub(crate) fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let len = trimmed.chars().count();
    if len <= TOKEN_MASK_PREFIX_LEN + TOKEN_MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }

    let prefix: String = trimmed.chars().take(TOKEN_MASK_PREFIX_LEN).collect();
    let suffix: String = trimmed
        .chars()
        .skip(len - TOKEN_MASK_SUFFIX_LEN)
        .collect();
    format!("{prefix}...{suffix}")
}

/// Masks per-login secrets in a URL's query so it can be logged.
pub(crate) fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return mask_token(raw);
    };
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SENSITIVE_QUERY_KEYS.contains(&k.as_ref()) {
                mask_token(&v)
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();
    if pairs.is_empty() {
        return url.to_string();
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
