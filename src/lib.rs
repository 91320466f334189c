mod app;
mod infra;
mod oauth;
mod shared;
mod sharepoint;
mod walkthrough;
pub mod test_support;

pub use app::cli::Cli;
pub use infra::settings::ProbeSettings;
pub use oauth::browser::{AuthorizationPrompt, SystemBrowser};
pub use oauth::client::{build_http_client, AuthenticationResult, PublicClientApp};
pub use oauth::id_token::Account;
pub use shared::error::{AppError, AppResult};
pub use walkthrough::WalkthroughReport;

use std::sync::Arc;

/// Resolves settings, installs logging and runs the walkthrough against the system browser.
pub async fn run(cli: Cli) -> AppResult<WalkthroughReport> {
    let settings = cli.resolve_settings()?;
    app::logging::init(&settings.log_level)?;
    tracing::info!(
        tenant = %settings.sharepoint_tenant_url,
        authority = %settings.authority,
        client_id = %settings.client_id,
        "starting consent walkthrough"
    );

    let client = PublicClientApp::new(&settings, build_http_client()?, Arc::new(SystemBrowser))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let report = walkthrough::run(&client, &settings, &mut out).await?;
    tracing::info!(
        first_call_succeeded = report.first_call_succeeded,
        second_call_succeeded = report.second_call_succeeded,
        accounts_removed = report.accounts_removed,
        "walkthrough finished"
    );

    if settings.wait_for_keypress {
        let stdin = std::io::stdin();
        walkthrough::pause_for_enter(&mut out, &mut stdin.lock())?;
    }

    Ok(report)
}
