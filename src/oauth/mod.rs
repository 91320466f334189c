//! Usage: Public-client OAuth for the Microsoft identity platform.
//!
//! Authorization code + PKCE over a loopback redirect, refresh-token redemption, and an
//! in-memory account/token cache shared by both.

pub(crate) mod authority;
pub(crate) mod browser;
pub(crate) mod callback_server;
pub(crate) mod client;
pub(crate) mod id_token;
pub(crate) mod pkce;
pub(crate) mod token_cache;
pub(crate) mod token_exchange;
