//! Usage: Public test helpers for integration tests.

use crate::infra::settings::{self, ProbeSettings};
use crate::oauth::client::{AuthenticationResult, PublicClientApp};
use crate::oauth::id_token::Account;
use crate::shared::error::AppResult;
use crate::walkthrough::{self, WalkthroughReport};
use std::io::Write;

pub fn settings_from_toml(content: &str) -> AppResult<ProbeSettings> {
    let mut parsed = settings::parse_toml(content)?;
    settings::sanitize(&mut parsed);
    Ok(parsed)
}

pub fn settings_read(path: &std::path::Path) -> AppResult<ProbeSettings> {
    settings::read(Some(path))
}

pub fn settings_validate(value: &ProbeSettings) -> AppResult<()> {
    settings::validate(value)
}

pub async fn authenticate(
    app: &PublicClientApp,
    scopes: &[String],
    account: Option<&Account>,
) -> AppResult<AuthenticationResult> {
    walkthrough::authenticate(app, scopes, account).await
}

pub async fn probe_user_profile(
    app: &PublicClientApp,
    settings: &ProbeSettings,
    out: &mut impl Write,
) -> AppResult<bool> {
    walkthrough::probe_user_profile(app, settings, out).await
}

pub fn clear_accounts(app: &PublicClientApp) -> usize {
    walkthrough::clear_accounts(app)
}

pub async fn run_walkthrough(
    app: &PublicClientApp,
    settings: &ProbeSettings,
    out: &mut impl Write,
) -> AppResult<WalkthroughReport> {
    walkthrough::run(app, settings, out).await
}

pub async fn sharepoint_get_string(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> AppResult<String> {
    crate::sharepoint::get_string(client, url, access_token).await
}

pub fn sharepoint_user_profile_url(tenant_url: &str) -> String {
    crate::sharepoint::user_profile_url(tenant_url)
}
