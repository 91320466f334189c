//! Usage: Command-line flags layered over the settings file.

use crate::infra::settings::{self, ProbeSettings};
use crate::shared::error::AppResult;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    name = "sharepoint-consent-probe",
    version,
    about = "Shows that the SharePoint user profile REST API is authorized by the Graph user.read scope",
    long_about = "Signs in for the SharePoint AllSites.Manage scope and calls the user profile REST API (expected to fail),\n\
                  consents to Microsoft Graph user.read, clears the token cache, waits for the grant to propagate\n\
                  and calls the same API again (expected to succeed)."
)]
pub struct Cli {
    /// TOML settings file; flags below override its values
    #[arg(long, short = 'c', env = "SPO_PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// SharePoint tenant root, e.g. https://contoso.sharepoint.com
    #[arg(long, env = "SPO_PROBE_TENANT_URL")]
    pub tenant_url: Option<String>,

    /// Public client (app registration) id
    #[arg(long, env = "SPO_PROBE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Authority, e.g. https://login.microsoftonline.com/organizations
    #[arg(long, env = "SPO_PROBE_AUTHORITY")]
    pub authority: Option<String>,

    /// Seconds to wait after the Graph consent before retrying SharePoint
    #[arg(long, env = "SPO_PROBE_CONSENT_DELAY")]
    pub consent_delay: Option<u64>,

    /// Seconds to wait for the browser login to complete
    #[arg(long, env = "SPO_PROBE_LOGIN_TIMEOUT")]
    pub login_timeout: Option<u64>,

    /// Loopback port for the login redirect (0 = any free port)
    #[arg(long, env = "SPO_PROBE_CALLBACK_PORT")]
    pub callback_port: Option<u16>,

    /// Exit right after the walkthrough instead of waiting for Enter
    #[arg(long)]
    pub no_wait: bool,

    /// Log level or filter directives (RUST_LOG takes precedence)
    #[arg(long, env = "SPO_PROBE_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut ProbeSettings) {
        if let Some(v) = self.tenant_url.as_ref() {
            settings.sharepoint_tenant_url = v.clone();
        }
        if let Some(v) = self.client_id.as_ref() {
            settings.client_id = v.clone();
        }
        if let Some(v) = self.authority.as_ref() {
            settings.authority = v.clone();
        }
        if let Some(v) = self.consent_delay {
            settings.consent_propagation_delay_seconds = v;
        }
        if let Some(v) = self.login_timeout {
            settings.login_timeout_seconds = v;
        }
        if let Some(v) = self.callback_port {
            settings.callback_port = v;
        }
        if self.no_wait {
            settings.wait_for_keypress = false;
        }
        if let Some(v) = self.log_level.as_ref() {
            settings.log_level = v.clone();
        }
    }

    /// File (or defaults), then flags, then sanitize + validate.
    pub fn resolve_settings(&self) -> AppResult<ProbeSettings> {
        let mut resolved = settings::read(self.config.as_deref())?;
        self.apply(&mut resolved);
        settings::sanitize(&mut resolved);
        settings::validate(&resolved)?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "sharepoint-consent-probe",
            "--tenant-url",
            "https://contoso.sharepoint.com/",
            "--consent-delay",
            "5",
            "--no-wait",
        ])
        .expect("parse");
        let resolved = cli.resolve_settings().expect("settings");
        assert_eq!(resolved.sharepoint_tenant_url, "https://contoso.sharepoint.com");
        assert_eq!(resolved.consent_propagation_delay_seconds, 5);
        assert!(!resolved.wait_for_keypress);
    }

    #[test]
    fn placeholder_tenant_fails_resolution() {
        let cli = Cli::default();
        let err = cli.resolve_settings().expect_err("placeholder");
        assert_eq!(err.code(), "SEC_INVALID_INPUT");
    }
}
