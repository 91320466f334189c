#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Url;
use serde_json::{json, Value};
use sharepoint_consent_probe_lib::{
    AppResult, AuthorizationPrompt, ProbeSettings, PublicClientApp,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USERNAME: &str = "adele@contoso.com";
pub const TOKEN_PATH: &str = "/organizations/oauth2/v2.0/token";
pub const PROFILE_PATH: &str = "/_api/SP.UserProfiles.PeopleManager/GetMyProperties";

pub fn fake_id_token(oid: &str, tid: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({ "oid": oid, "tid": tid, "preferred_username": username, "name": "Adele Vance" })
            .to_string(),
    );
    format!("{header}.{payload}.")
}

pub fn token_body(access_token: &str, refresh_token: &str, scope: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "scope": format!("{scope} openid profile"),
        "expires_in": 3599,
        "ext_expires_in": 3599,
        "access_token": access_token,
        "refresh_token": refresh_token,
        "id_token": fake_id_token("oid-adele", "tid-contoso", USERNAME),
    })
}

pub fn consent_required_body() -> Value {
    json!({
        "error": "invalid_grant",
        "error_description": "AADSTS65001: The user or administrator has not consented to use the application with ID 'test-client'.",
        "error_codes": [65001],
        "suberror": "consent_required",
    })
}

/// Stands in for the system browser: answers every authorize URL by hitting the loopback
/// redirect with the next queued code, or with `access_denied` when the queue is empty.
#[derive(Default)]
pub struct FakeBrowser {
    codes: Mutex<VecDeque<String>>,
    opened: Mutex<Vec<String>>,
}

impl FakeBrowser {
    pub fn with_codes(codes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            codes: Mutex::new(codes.iter().map(|c| c.to_string()).collect()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock").clone()
    }
}

pub fn query_value(url: &str, key: &str) -> Option<String> {
    Url::parse(url)
        .expect("authorize url")
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl AuthorizationPrompt for FakeBrowser {
    fn open(&self, authorize_url: &str) -> AppResult<()> {
        self.opened
            .lock()
            .expect("opened lock")
            .push(authorize_url.to_string());

        let redirect_uri = query_value(authorize_url, "redirect_uri").expect("redirect_uri");
        let state = query_value(authorize_url, "state").expect("state");
        let next = self.codes.lock().expect("codes lock").pop_front();

        let mut target = Url::parse(&redirect_uri).expect("redirect url");
        {
            let mut query = target.query_pairs_mut();
            match next {
                Some(code) => {
                    query.append_pair("code", &code);
                }
                None => {
                    query.append_pair("error", "access_denied");
                    query.append_pair("error_description", "AADSTS65004: User declined to consent");
                }
            }
            query.append_pair("state", &state);
        }

        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
        Ok(())
    }
}

pub struct TestEnv {
    pub server: MockServer,
    pub settings: ProbeSettings,
    pub browser: Arc<FakeBrowser>,
    pub app: PublicClientApp,
}

impl TestEnv {
    pub async fn new(codes: &[&str]) -> Self {
        let server = MockServer::start().await;
        let settings = ProbeSettings {
            client_id: "test-client".to_string(),
            sharepoint_tenant_url: server.uri(),
            authority: format!("{}/organizations", server.uri()),
            redirect_host: "127.0.0.1".to_string(),
            consent_propagation_delay_seconds: 0,
            login_timeout_seconds: 10,
            wait_for_keypress: false,
            ..ProbeSettings::default()
        };
        let browser = FakeBrowser::with_codes(codes);
        let app = PublicClientApp::new(&settings, reqwest::Client::new(), browser.clone())
            .expect("client app");
        Self {
            server,
            settings,
            browser,
            app,
        }
    }

    pub fn sharepoint_scope(&self) -> String {
        format!("{}/allsites.manage", self.server.uri())
    }

    /// Codes must not be prefixes of each other; the match is a substring test on the form body.
    pub async fn mount_code_exchange(&self, code: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }
}
