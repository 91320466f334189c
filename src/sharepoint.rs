//! Usage: SharePoint REST calls made with a delegated bearer token.

use crate::shared::error::{AppError, AppResult};
use reqwest::header::{ACCEPT, AUTHORIZATION};

const USER_PROFILE_PATH: &str = "/_api/SP.UserProfiles.PeopleManager/GetMyProperties";
const ODATA_VERBOSE_JSON: &str = "application/json;odata=verbose";
const ERROR_BODY_CHARS: usize = 300;

pub fn user_profile_url(tenant_url: &str) -> String {
    format!("{}{USER_PROFILE_PATH}", tenant_url.trim().trim_end_matches('/'))
}

/// GETs `url` and returns the body; a non-2xx status is an `HTTP_STATUS` error.
pub async fn get_string(client: &reqwest::Client, url: &str, access_token: &str) -> AppResult<String> {
    let response = client
        .get(url)
        .header(AUTHORIZATION, format!("Bearer {}", access_token.trim()))
        .header(ACCEPT, ODATA_VERBOSE_JSON)
        .send()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: sharepoint request failed: {e}"))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: sharepoint response read failed: {e}"))?;

    if !status.is_success() {
        let mut msg = format!(
            "Response status code does not indicate success: {} ({})",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
        let detail = preview(body.trim(), ERROR_BODY_CHARS);
        if !detail.is_empty() {
            msg.push_str(". ");
            msg.push_str(detail);
        }
        tracing::debug!(status = status.as_u16(), url, "sharepoint call rejected");
        return Err(AppError::new("HTTP_STATUS", msg));
    }

    Ok(body)
}

/// First `max_chars` characters of `body`; shorter bodies are returned whole.
pub fn preview(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_profile_url_trims_trailing_slash() {
        assert_eq!(
            user_profile_url("https://contoso.sharepoint.com/"),
            "https://contoso.sharepoint.com/_api/SP.UserProfiles.PeopleManager/GetMyProperties"
        );
    }

    #[test]
    fn preview_is_char_boundary_safe() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("short", 500), "short");
        assert_eq!(preview("", 3), "");
    }
}
