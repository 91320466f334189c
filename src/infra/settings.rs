//! Usage: Probe settings (schema, TOML loading, sanitize + validate helpers).

use crate::shared::error::AppResult;
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CLIENT_ID: &str = "8fd1129c-f58e-4d41-b4b3-177f3df1a106";
pub const PLACEHOLDER_TENANT_URL: &str = "https://YOUR-TENANT.sharepoint.com";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/organizations";
pub const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/user.read";
pub const DEFAULT_SHAREPOINT_SCOPE_NAME: &str = "allsites.manage";
const DEFAULT_REDIRECT_HOST: &str = "localhost";
const DEFAULT_CALLBACK_PATH: &str = "/";
pub const DEFAULT_CONSENT_PROPAGATION_DELAY_SECONDS: u64 = 30;
pub const DEFAULT_LOGIN_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_RESPONSE_PREVIEW_CHARS: usize = 500;
const DEFAULT_LOG_LEVEL: &str = "warn";
const MAX_CONSENT_PROPAGATION_DELAY_SECONDS: u64 = 10 * 60;
const MAX_LOGIN_TIMEOUT_SECONDS: u64 = 60 * 60;
const MAX_RESPONSE_PREVIEW_CHARS: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Multi-tenant public client registration used for every login.
    pub client_id: String,
    pub sharepoint_tenant_url: String,
    pub authority: String,
    pub graph_scope: String,
    pub sharepoint_scope_name: String,
    pub redirect_host: String,
    pub callback_path: String,
    // 0 = pick a free port.
    pub callback_port: u16,
    pub consent_propagation_delay_seconds: u64,
    pub login_timeout_seconds: u64,
    pub response_preview_chars: usize,
    pub wait_for_keypress: bool,
    pub log_level: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            sharepoint_tenant_url: PLACEHOLDER_TENANT_URL.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            graph_scope: DEFAULT_GRAPH_SCOPE.to_string(),
            sharepoint_scope_name: DEFAULT_SHAREPOINT_SCOPE_NAME.to_string(),
            redirect_host: DEFAULT_REDIRECT_HOST.to_string(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            callback_port: 0,
            consent_propagation_delay_seconds: DEFAULT_CONSENT_PROPAGATION_DELAY_SECONDS,
            login_timeout_seconds: DEFAULT_LOGIN_TIMEOUT_SECONDS,
            response_preview_chars: DEFAULT_RESPONSE_PREVIEW_CHARS,
            wait_for_keypress: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ProbeSettings {
    /// Scope requested for the SharePoint resource, e.g. `https://contoso.sharepoint.com/allsites.manage`.
    pub fn sharepoint_scopes(&self) -> Vec<String> {
        vec![format!(
            "{}/{}",
            self.sharepoint_tenant_url,
            self.sharepoint_scope_name.trim_start_matches('/')
        )]
    }

    pub fn graph_scopes(&self) -> Vec<String> {
        vec![self.graph_scope.clone()]
    }
}

fn trim_url(value: &mut String) -> bool {
    let trimmed = value.trim().trim_end_matches('/').to_string();
    if trimmed != *value {
        *value = trimmed;
        return true;
    }
    false
}

fn sanitize_urls(settings: &mut ProbeSettings) -> bool {
    let mut changed = false;
    changed |= trim_url(&mut settings.sharepoint_tenant_url);
    changed |= trim_url(&mut settings.authority);

    let client_id = settings.client_id.trim().to_string();
    if client_id != settings.client_id {
        settings.client_id = client_id;
        changed = true;
    }

    changed
}

fn sanitize_durations(settings: &mut ProbeSettings) -> bool {
    let mut changed = false;

    if settings.consent_propagation_delay_seconds > MAX_CONSENT_PROPAGATION_DELAY_SECONDS {
        settings.consent_propagation_delay_seconds = MAX_CONSENT_PROPAGATION_DELAY_SECONDS;
        changed = true;
    }

    if settings.login_timeout_seconds == 0 {
        settings.login_timeout_seconds = DEFAULT_LOGIN_TIMEOUT_SECONDS;
        changed = true;
    }
    if settings.login_timeout_seconds > MAX_LOGIN_TIMEOUT_SECONDS {
        settings.login_timeout_seconds = MAX_LOGIN_TIMEOUT_SECONDS;
        changed = true;
    }

    changed
}

fn sanitize_preview(settings: &mut ProbeSettings) -> bool {
    let mut changed = false;

    if settings.response_preview_chars == 0 {
        settings.response_preview_chars = DEFAULT_RESPONSE_PREVIEW_CHARS;
        changed = true;
    }
    if settings.response_preview_chars > MAX_RESPONSE_PREVIEW_CHARS {
        settings.response_preview_chars = MAX_RESPONSE_PREVIEW_CHARS;
        changed = true;
    }

    changed
}

/// Normalizes values in place; returns `true` when anything was adjusted.
pub fn sanitize(settings: &mut ProbeSettings) -> bool {
    let mut changed = false;
    changed |= sanitize_urls(settings);
    changed |= sanitize_durations(settings);
    changed |= sanitize_preview(settings);
    changed
}

fn require_url(field: &str, value: &str, https_only: bool) -> AppResult<Url> {
    let url = Url::parse(value).map_err(|e| {
        format!("SEC_INVALID_INPUT: invalid settings: {field} is not a valid url: {e}")
    })?;
    if url.host_str().is_none() {
        return Err(format!("SEC_INVALID_INPUT: invalid settings: {field} has no host").into());
    }
    if https_only && url.scheme() != "https" {
        return Err(format!("SEC_INVALID_INPUT: invalid settings: {field} must use https").into());
    }
    Ok(url)
}

pub fn validate(settings: &ProbeSettings) -> AppResult<()> {
    if settings.client_id.is_empty() {
        return Err("SEC_INVALID_INPUT: invalid settings: client_id is required"
            .to_string()
            .into());
    }

    let tenant = require_url("sharepoint_tenant_url", &settings.sharepoint_tenant_url, true)?;
    if tenant
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case("your-tenant.sharepoint.com"))
    {
        return Err(
            "SEC_INVALID_INPUT: invalid settings: replace sharepoint_tenant_url with your SharePoint tenant (e.g. https://contoso.sharepoint.com)"
                .to_string()
                .into(),
        );
    }

    // Loopback authorities are allowed so the flow can run against a local identity stub.
    let authority = require_url("authority", &settings.authority, false)?;
    let loopback = matches!(authority.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    if authority.scheme() != "https" && !loopback {
        return Err("SEC_INVALID_INPUT: invalid settings: authority must use https"
            .to_string()
            .into());
    }

    require_url("graph_scope", &settings.graph_scope, true)?;

    if settings.sharepoint_scope_name.trim().is_empty() {
        return Err("SEC_INVALID_INPUT: invalid settings: sharepoint_scope_name is required"
            .to_string()
            .into());
    }
    if settings.redirect_host.trim().is_empty() {
        return Err("SEC_INVALID_INPUT: invalid settings: redirect_host is required"
            .to_string()
            .into());
    }
    if !settings.callback_path.starts_with('/') {
        return Err("SEC_INVALID_INPUT: invalid settings: callback_path must start with '/'"
            .to_string()
            .into());
    }

    Ok(())
}

pub fn parse_toml(content: &str) -> AppResult<ProbeSettings> {
    toml::from_str(content)
        .map_err(|e| format!("CONFIG_ERROR: failed to parse settings file: {e}").into())
}

/// Reads a TOML settings file; a missing path yields defaults.
pub fn read(path: Option<&Path>) -> AppResult<ProbeSettings> {
    let Some(path) = path else {
        return Ok(ProbeSettings::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        format!(
            "CONFIG_ERROR: failed to read settings file {}: {e}",
            path.display()
        )
    })?;
    let mut settings = parse_toml(&content)?;
    if sanitize(&mut settings) {
        tracing::debug!(path = %path.display(), "settings normalized after load");
    }
    Ok(settings)
}
