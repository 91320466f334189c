//! Usage: Public client application: interactive + silent token acquisition over a session cache.

use crate::infra::settings::ProbeSettings;
use crate::oauth::authority::{build_authorize_url, make_redirect_uri, Authority, AuthorizeRequest};
use crate::oauth::browser::AuthorizationPrompt;
use crate::oauth::callback_server;
use crate::oauth::id_token::{account_from_id_token, Account};
use crate::oauth::pkce;
use crate::oauth::token_cache::TokenCache;
use crate::oauth::token_exchange::{
    exchange_authorization_code, refresh_access_token, OAuthTokenSet, TokenExchangeRequest,
    TokenRefreshRequest,
};
use crate::shared::error::{AppError, AppResult, UI_REQUIRED};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::{mask_token, redact_url};
use crate::shared::time::now_unix_seconds;
use std::sync::{Arc, Mutex};
use tokio::{task, time::Duration};

#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub access_token: String,
    /// Scopes the access token carries, as reported by the token endpoint.
    pub scopes: Vec<String>,
    pub expires_at: Option<i64>,
    pub account: Account,
    pub from_cache: bool,
}

pub fn build_http_client() -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!(
            "sharepoint-consent-probe/{}",
            env!("CARGO_PKG_VERSION")
        ))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| format!("SYSTEM_ERROR: http client init failed: {e}").into())
}

pub struct PublicClientApp {
    client_id: String,
    authority: Authority,
    redirect_host: String,
    callback_path: String,
    callback_port: u16,
    login_timeout: Duration,
    http: reqwest::Client,
    prompt: Arc<dyn AuthorizationPrompt>,
    cache: Mutex<TokenCache>,
}

impl PublicClientApp {
    pub fn new(
        settings: &ProbeSettings,
        http: reqwest::Client,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> AppResult<Self> {
        Ok(Self {
            client_id: settings.client_id.clone(),
            authority: Authority::parse(&settings.authority)?,
            redirect_host: settings.redirect_host.clone(),
            callback_path: settings.callback_path.clone(),
            callback_port: settings.callback_port,
            login_timeout: Duration::from_secs(settings.login_timeout_seconds),
            http,
            prompt,
            cache: Mutex::new(TokenCache::default()),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Accounts currently held in the session cache.
    pub fn accounts(&self) -> Vec<Account> {
        self.cache.lock_or_recover().accounts()
    }

    /// Signs the account out of the session cache (refresh and access tokens included).
    pub fn remove(&self, account: &Account) -> bool {
        let removed = self.cache.lock_or_recover().remove_account(account);
        tracing::info!(account = %account.username, removed, "account removed from cache");
        removed
    }

    /// Browser login for `scopes`; `account` only pre-fills the sign-in page.
    pub async fn acquire_token_interactive(
        &self,
        scopes: &[String],
        account: Option<&Account>,
    ) -> AppResult<AuthenticationResult> {
        let pkce = pkce::generate_pkce_pair();
        let state = pkce::generate_state();
        let listener = callback_server::bind_callback_listener(self.callback_port).await?;
        let redirect_uri = make_redirect_uri(&self.redirect_host, listener.port(), &self.callback_path);
        let auth_url = build_authorize_url(
            &self.authority,
            &AuthorizeRequest {
                client_id: &self.client_id,
                redirect_uri: &redirect_uri,
                scopes,
                state: &state,
                code_challenge: &pkce.code_challenge,
                login_hint: account.map(|a| a.username.as_str()),
            },
        )?;
        tracing::info!(url = %redact_url(&auth_url), "starting interactive login");

        let callback_path = self.callback_path.clone();
        let callback_state = state.clone();
        let timeout = self.login_timeout;
        let callback_task = task::spawn(async move {
            callback_server::wait_for_callback(listener, &callback_path, &callback_state, timeout)
                .await
        });
        task::yield_now().await;

        if let Err(err) = self.prompt.open(&auth_url) {
            callback_task.abort();
            return Err(err);
        }

        let payload = callback_task
            .await
            .map_err(|e| format!("SYSTEM_ERROR: oauth callback task failed: {e}"))??;
        if let Some(err_code) = payload.error.as_deref() {
            let description = payload
                .error_description
                .as_deref()
                .unwrap_or("interactive login failed");
            return Err(AppError::new(
                "AUTH_PROVIDER_ERROR",
                format!("authorization endpoint returned error={err_code}: {description}"),
            ));
        }
        let code = payload
            .code
            .ok_or_else(|| "SYSTEM_ERROR: oauth callback missing code".to_string())?;

        let tokens = exchange_authorization_code(
            &self.http,
            &TokenExchangeRequest {
                token_uri: self.authority.token_endpoint(),
                client_id: self.client_id.clone(),
                code,
                redirect_uri,
                code_verifier: pkce.code_verifier,
                scopes: scopes.to_vec(),
            },
        )
        .await?;

        let signed_in = match (tokens.id_token.as_deref(), account) {
            (Some(id_token), _) => account_from_id_token(id_token)?,
            (None, Some(hint)) => hint.clone(),
            (None, None) => {
                return Err("SYSTEM_ERROR: token response missing id_token"
                    .to_string()
                    .into())
            }
        };
        if let Some(hint) = account {
            if hint.home_account_id != signed_in.home_account_id {
                tracing::warn!(
                    expected = %hint.username,
                    actual = %signed_in.username,
                    "interactive login completed for a different account"
                );
            }
        }

        Ok(self.store(signed_in, scopes, tokens))
    }

    /// Cached access token, else refresh-token grant; anything needing the user is `AUTH_UI_REQUIRED`.
    pub async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> AppResult<AuthenticationResult> {
        let (cached, refresh_token) = {
            let cache = self.cache.lock_or_recover();
            (
                cache.find_access_token(account, scopes, now_unix_seconds()),
                cache.refresh_token(account),
            )
        };

        if let Some(at) = cached {
            tracing::debug!(account = %account.username, "access token served from cache");
            return Ok(AuthenticationResult {
                access_token: at.secret,
                scopes: at.scopes.into_iter().collect(),
                expires_at: at.expires_at,
                account: account.clone(),
                from_cache: true,
            });
        }

        let Some(refresh_token) = refresh_token else {
            return Err(AppError::new(
                UI_REQUIRED,
                format!("no refresh token cached for {}", account.username),
            ));
        };
        tracing::debug!(
            account = %account.username,
            refresh_token = %mask_token(&refresh_token),
            "redeeming refresh token"
        );

        let tokens = refresh_access_token(
            &self.http,
            &TokenRefreshRequest {
                token_uri: self.authority.token_endpoint(),
                client_id: self.client_id.clone(),
                refresh_token,
                scopes: scopes.to_vec(),
            },
        )
        .await?;

        let refreshed = match tokens.id_token.as_deref() {
            Some(id_token) => account_from_id_token(id_token)?,
            None => account.clone(),
        };
        Ok(self.store(refreshed, scopes, tokens))
    }

    fn store(&self, account: Account, scopes: &[String], tokens: OAuthTokenSet) -> AuthenticationResult {
        self.cache.lock_or_recover().save(&account, scopes, &tokens);
        tracing::info!(
            account = %account.username,
            access_token = %mask_token(&tokens.access_token),
            scopes = %tokens.granted_scopes.join(" "),
            "token acquired"
        );
        AuthenticationResult {
            access_token: tokens.access_token,
            scopes: tokens.granted_scopes,
            expires_at: tokens.expires_at,
            account,
            from_cache: false,
        }
    }
}
