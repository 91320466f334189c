//! Usage: In-memory session cache of accounts, refresh tokens and access tokens.
//!
//! Lives for the process only. Entries are keyed by home account id; an account keeps a single
//! refresh token (the identity platform issues family refresh tokens that work across
//! resources) and any number of access tokens keyed by scope set.

use crate::oauth::authority::is_reserved_scope;
use crate::oauth::id_token::Account;
use crate::oauth::token_exchange::OAuthTokenSet;
use std::collections::BTreeSet;

/// Access tokens this close to expiry are not handed out.
pub(crate) const EXPIRY_BUFFER_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedAccessToken {
    pub(crate) secret: String,
    pub(crate) scopes: BTreeSet<String>,
    pub(crate) expires_at: Option<i64>,
}

impl CachedAccessToken {
    fn is_fresh(&self, now_unix: i64) -> bool {
        // Unknown lifetime is treated as unusable.
        self.expires_at
            .is_some_and(|exp| exp.saturating_sub(EXPIRY_BUFFER_SECS) > now_unix)
    }
}

#[derive(Debug, Clone)]
struct AccountEntry {
    account: Account,
    refresh_token: Option<String>,
    access_tokens: Vec<CachedAccessToken>,
}

#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    entries: Vec<AccountEntry>,
}

/// Lowercased, trimmed, reserved OIDC scopes dropped.
pub(crate) fn normalize_scopes<'a>(scopes: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    scopes
        .into_iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty() && !is_reserved_scope(s))
        .collect()
}

impl TokenCache {
    fn entry(&self, account: &Account) -> Option<&AccountEntry> {
        self.entries
            .iter()
            .find(|e| e.account.home_account_id == account.home_account_id)
    }

    /// Accounts in sign-in order.
    pub(crate) fn accounts(&self) -> Vec<Account> {
        self.entries.iter().map(|e| e.account.clone()).collect()
    }

    pub(crate) fn find_access_token(
        &self,
        account: &Account,
        scopes: &[String],
        now_unix: i64,
    ) -> Option<CachedAccessToken> {
        let wanted = normalize_scopes(scopes);
        if wanted.is_empty() {
            return None;
        }
        self.entry(account)?
            .access_tokens
            .iter()
            .find(|at| at.is_fresh(now_unix) && wanted.is_subset(&at.scopes))
            .cloned()
    }

    pub(crate) fn refresh_token(&self, account: &Account) -> Option<String> {
        self.entry(account)?.refresh_token.clone()
    }

    /// Stores a token response for `account`.
    ///
    /// The access token is indexed under both the requested and the granted scopes, since the
    /// endpoint may echo scopes in a different form (e.g. `User.Read` for a Graph request).
    /// Older access tokens sharing any of those scopes are replaced.
    pub(crate) fn save(&mut self, account: &Account, requested: &[String], tokens: &OAuthTokenSet) {
        let mut scopes = normalize_scopes(requested);
        scopes.extend(normalize_scopes(&tokens.granted_scopes));

        let idx = match self
            .entries
            .iter()
            .position(|e| e.account.home_account_id == account.home_account_id)
        {
            Some(idx) => {
                self.entries[idx].account = account.clone();
                idx
            }
            None => {
                self.entries.push(AccountEntry {
                    account: account.clone(),
                    refresh_token: None,
                    access_tokens: Vec::new(),
                });
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[idx];
        if let Some(rt) = tokens.refresh_token.as_deref() {
            entry.refresh_token = Some(rt.to_string());
        }
        entry
            .access_tokens
            .retain(|at| at.scopes.is_disjoint(&scopes));
        entry.access_tokens.push(CachedAccessToken {
            secret: tokens.access_token.clone(),
            scopes,
            expires_at: tokens.expires_at,
        });
    }

    /// Drops the account and every token cached for it.
    pub(crate) fn remove_account(&mut self, account: &Account) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.account.home_account_id != account.home_account_id);
        before != self.entries.len()
    }
}
