//! Usage: The consent walkthrough: SharePoint call, Graph consent, cache clear, SharePoint retry.

use crate::infra::settings::ProbeSettings;
use crate::oauth::client::{AuthenticationResult, PublicClientApp};
use crate::oauth::id_token::Account;
use crate::sharepoint;
use crate::shared::error::{AppError, AppResult};
use std::io::{BufRead, Write};
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkthroughReport {
    pub first_call_succeeded: bool,
    pub second_call_succeeded: bool,
    pub accounts_removed: usize,
}

fn say(out: &mut impl Write, line: &str) -> AppResult<()> {
    writeln!(out, "{line}")
        .and_then(|_| out.flush())
        .map_err(|e| AppError::new("SYSTEM_ERROR", format!("console write failed: {e}")).with_source(e))
}

/// Interactive when no account is known; otherwise silent with an interactive fallback.
pub async fn authenticate(
    app: &PublicClientApp,
    scopes: &[String],
    account: Option<&Account>,
) -> AppResult<AuthenticationResult> {
    let Some(account) = account else {
        return app.acquire_token_interactive(scopes, None).await;
    };

    match app.acquire_token_silent(scopes, account).await {
        Ok(result) => Ok(result),
        Err(err) if err.is_ui_required() => {
            tracing::info!(
                account = %account.username,
                "silent acquisition needs interaction: {}",
                err.message()
            );
            app.acquire_token_interactive(scopes, Some(account)).await
        }
        Err(err) => Err(err),
    }
}

/// Gets a SharePoint token and calls the user profile endpoint with it.
///
/// Returns whether the REST call succeeded; only authentication failures are errors.
pub async fn probe_user_profile(
    app: &PublicClientApp,
    settings: &ProbeSettings,
    out: &mut impl Write,
) -> AppResult<bool> {
    say(
        out,
        &format!(
            "Getting an access token for the SharePoint resource requesting '{}' scope",
            settings.sharepoint_scope_name
        ),
    )?;
    let account = app.accounts().into_iter().next();
    let auth = authenticate(app, &settings.sharepoint_scopes(), account.as_ref()).await?;

    let url = sharepoint::user_profile_url(&settings.sharepoint_tenant_url);
    say(out, &format!("Calling {url}"))?;
    match sharepoint::get_string(app.http(), &url, &auth.access_token).await {
        Ok(body) => {
            let limit = settings.response_preview_chars;
            say(
                out,
                &format!(
                    "[SharePoint REST API response] (first {limit} chars):\n{}",
                    sharepoint::preview(&body, limit)
                ),
            )?;
            Ok(true)
        }
        Err(err) => {
            tracing::warn!(code = err.code(), "sharepoint user profile call failed");
            say(
                out,
                &format!(
                    "With just the SharePoint scope ({}) calling the SharePoint API user profile service we get this error because we don't have enough permissions:\n{}",
                    settings.sharepoint_scope_name,
                    err.message()
                ),
            )?;
            Ok(false)
        }
    }
}

/// Removes cached accounts one at a time, re-reading the cache after each removal.
pub fn clear_accounts(app: &PublicClientApp) -> usize {
    let mut removed = 0;
    let mut accounts = app.accounts();
    while let Some(account) = accounts.first() {
        if app.remove(account) {
            removed += 1;
        }
        accounts = app.accounts();
    }
    removed
}

pub async fn run(
    app: &PublicClientApp,
    settings: &ProbeSettings,
    out: &mut impl Write,
) -> AppResult<WalkthroughReport> {
    say(out, "SharePoint delegated permission consent probe")?;
    say(
        out,
        "You should be prompted to login into M365, if you have no existing consent for this\napp you should be presented initially just for SharePoint scopes.\n\n",
    )?;

    let first_call_succeeded = probe_user_profile(app, settings, out).await?;

    say(
        out,
        &format!(
            "Getting user to consent to the Graph API '{}' scope",
            graph_permission_name(&settings.graph_scope)
        ),
    )?;
    let account = app.accounts().into_iter().next();
    let graph = authenticate(app, &settings.graph_scopes(), account.as_ref()).await?;
    tracing::info!(
        account = %graph.account.username,
        scopes = %graph.scopes.join(" "),
        "graph consent step completed"
    );

    say(
        out,
        "Clearing the token cache to force a fresh trip to the identity platform for the SharePoint refresh and access token now that the Graph permission is consented",
    )?;
    let accounts_removed = clear_accounts(app);
    tracing::info!(accounts_removed, "token cache cleared");

    let delay = settings.consent_propagation_delay_seconds;
    if delay > 0 {
        say(
            out,
            &format!(
                "Waiting {delay} secs to give the identity service time to acknowledge the new Graph permission granted"
            ),
        )?;
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }

    let second_call_succeeded = probe_user_profile(app, settings, out).await?;

    say(
        out,
        &format!(
            "If you got here and saw the user profile data come back we've proven access to the user profile (in the SharePoint REST API) is driven by the Graph {} scope!",
            graph_permission_name(&settings.graph_scope)
        ),
    )?;

    Ok(WalkthroughReport {
        first_call_succeeded,
        second_call_succeeded,
        accounts_removed,
    })
}

/// `https://graph.microsoft.com/user.read` -> `user.read`.
fn graph_permission_name(scope: &str) -> &str {
    scope.rsplit('/').next().unwrap_or(scope)
}

pub fn pause_for_enter(out: &mut impl Write, input: &mut impl BufRead) -> AppResult<()> {
    say(out, "\nPress Enter to finish")?;
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|e| format!("SYSTEM_ERROR: console read failed: {e}"))?;
    Ok(())
}
