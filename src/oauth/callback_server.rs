//! Usage: One-shot loopback listener that receives the authorization code redirect.

use crate::shared::error::AppResult;
use crate::shared::security::constant_time_eq;
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SUCCESS_HTML: &str =
    "<html><body><h1>Authentication complete</h1><p>You can close this window and return to the console.</p></body></html>";
const ERROR_HTML: &str =
    "<html><body><h1>Authentication failed</h1><p>Check the console for details.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not found</h1></body></html>";
const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OAuthCallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

#[derive(Debug)]
pub(crate) struct BoundCallbackListener {
    port: u16,
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

impl BoundCallbackListener {
    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    async fn accept(&mut self) -> std::io::Result<TcpStream> {
        let (socket, _) = match (self.listener_v4.as_mut(), self.listener_v6.as_mut()) {
            (Some(v4), Some(v6)) => {
                tokio::select! {
                    result = v4.accept() => result?,
                    result = v6.accept() => result?,
                }
            }
            (Some(v4), None) => v4.accept().await?,
            (None, Some(v6)) => v6.accept().await?,
            (None, None) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no loopback listener bound",
                ))
            }
        };
        Ok(socket)
    }
}

/// Binds 127.0.0.1 and ::1 on the same port; a busy preferred port falls back to a dynamic one.
pub(crate) async fn bind_callback_listener(preferred_port: u16) -> AppResult<BoundCallbackListener> {
    match try_bind_on_port(preferred_port).await {
        Ok(bound) => Ok(bound),
        Err(preferred_err) if preferred_port == 0 => Err(format!(
            "SYSTEM_ERROR: oauth callback bind failed: {preferred_err}"
        )
        .into()),
        Err(preferred_err) => {
            tracing::warn!(
                preferred_port,
                "oauth callback port unavailable; falling back to a dynamic port: {}",
                preferred_err
            );
            try_bind_on_port(0).await.map_err(|fallback_err| {
                format!(
                    "SYSTEM_ERROR: oauth callback bind failed: {preferred_err}; fallback_dynamic_port: {fallback_err}"
                )
                .into()
            })
        }
    }
}

async fn bind_one(host: &str, port: u16, errors: &mut Vec<String>) -> Option<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            errors.push(format!("{host}:{port} ({err})"));
            None
        }
    }
}

async fn try_bind_on_port(port: u16) -> Result<BoundCallbackListener, String> {
    let mut bind_errors: Vec<String> = Vec::new();

    if port != 0 {
        let listener_v4 = bind_one("127.0.0.1", port, &mut bind_errors).await;
        let listener_v6 = bind_one("::1", port, &mut bind_errors).await;
        if listener_v4.is_none() && listener_v6.is_none() {
            return Err(bind_errors.join("; "));
        }
        return Ok(BoundCallbackListener {
            port,
            listener_v4,
            listener_v6,
        });
    }

    // Let the OS pick on one family, then claim the same port on the other.
    if let Some(listener_v4) = bind_one("127.0.0.1", 0, &mut bind_errors).await {
        let port = listener_v4
            .local_addr()
            .map_err(|e| format!("127.0.0.1:0 (local_addr failed: {e})"))?
            .port();
        let listener_v6 = bind_one("::1", port, &mut bind_errors).await;
        return Ok(BoundCallbackListener {
            port,
            listener_v4: Some(listener_v4),
            listener_v6,
        });
    }

    if let Some(listener_v6) = bind_one("::1", 0, &mut bind_errors).await {
        let port = listener_v6
            .local_addr()
            .map_err(|e| format!("::1:0 (local_addr failed: {e})"))?
            .port();
        let listener_v4 = bind_one("127.0.0.1", port, &mut bind_errors).await;
        return Ok(BoundCallbackListener {
            port,
            listener_v4,
            listener_v6: Some(listener_v6),
        });
    }

    Err(bind_errors.join("; "))
}

/// Serves requests until one hits `callback_path`, then returns its parsed query.
///
/// Other paths (e.g. `/favicon.ico`) get a 404 and the listener keeps waiting.
pub(crate) async fn wait_for_callback(
    mut listener: BoundCallbackListener,
    callback_path: &str,
    expected_state: &str,
    timeout: Duration,
) -> AppResult<OAuthCallbackPayload> {
    tokio::time::timeout(
        timeout,
        serve_until_callback(&mut listener, callback_path, expected_state),
    )
    .await
    .map_err(|_| "SYSTEM_ERROR: oauth callback timed out waiting for the browser login".to_string())?
}

async fn serve_until_callback(
    listener: &mut BoundCallbackListener,
    callback_path: &str,
    expected_state: &str,
) -> AppResult<OAuthCallbackPayload> {
    loop {
        let mut socket = listener
            .accept()
            .await
            .map_err(|e| format!("SYSTEM_ERROR: oauth callback accept failed: {e}"))?;

        let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
        let size = match socket.read(&mut buffer).await {
            Ok(size) => size,
            Err(err) => {
                tracing::debug!("oauth callback read failed: {}", err);
                continue;
            }
        };
        if size == 0 {
            // Speculative preconnects close without sending a request.
            continue;
        }

        let request = String::from_utf8_lossy(&buffer[..size]).into_owned();
        let target = match extract_request_target(&request) {
            Ok(target) => target,
            Err(err) => {
                tracing::debug!("ignoring malformed loopback request: {}", err);
                write_response(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML).await;
                continue;
            }
        };

        let payload = match parse_callback_target(target, callback_path) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                write_response(&mut socket, "HTTP/1.1 404 Not Found", NOT_FOUND_HTML).await;
                continue;
            }
            Err(err) => {
                tracing::debug!("ignoring loopback request without code or error: {}", err);
                write_response(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML).await;
                continue;
            }
        };
        if let Err(err) = validate_state(&payload, expected_state) {
            write_response(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML).await;
            return Err(err);
        }
        if payload.error.is_some() {
            write_response(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML).await;
        } else {
            write_response(&mut socket, "HTTP/1.1 200 OK", SUCCESS_HTML).await;
        }
        return Ok(payload);
    }
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "{status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn extract_request_target(request: &str) -> AppResult<&str> {
    let first = request
        .lines()
        .next()
        .ok_or_else(|| "SYSTEM_ERROR: oauth callback malformed request".to_string())?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        return Err("SYSTEM_ERROR: oauth callback must be GET"
            .to_string()
            .into());
    }
    Ok(target)
}

/// Returns `Ok(None)` for requests that are not aimed at `callback_path`.
pub(crate) fn parse_callback_target(
    target: &str,
    callback_path: &str,
) -> AppResult<Option<OAuthCallbackPayload>> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| format!("SYSTEM_ERROR: invalid oauth callback target: {e}"))?;

    if url.path() != callback_path {
        return Ok(None);
    }

    let mut payload = OAuthCallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.into_owned()),
            "state" => payload.state = Some(value.into_owned()),
            "error" => payload.error = Some(value.into_owned()),
            "error_description" => payload.error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if payload.code.is_none() && payload.error.is_none() {
        // A bare hit on the redirect root (no query) is not the redirect.
        if url.query().is_none() {
            return Ok(None);
        }
        return Err("SYSTEM_ERROR: oauth callback missing code/error"
            .to_string()
            .into());
    }

    Ok(Some(payload))
}

fn validate_state(payload: &OAuthCallbackPayload, expected_state: &str) -> AppResult<()> {
    let state = payload
        .state
        .as_deref()
        .ok_or_else(|| "SYSTEM_ERROR: oauth callback missing state".to_string())?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err("SEC_INVALID_INPUT: oauth callback state mismatch"
            .to_string()
            .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_get(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost:{port}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[test]
    fn parse_callback_target_extracts_code_and_state() {
        let payload = parse_callback_target("/?code=abc123&state=xyz", "/")
            .expect("parse")
            .expect("payload");
        assert_eq!(payload.code.as_deref(), Some("abc123"));
        assert_eq!(payload.state.as_deref(), Some("xyz"));
        assert!(payload.error.is_none());
    }

    #[test]
    fn parse_callback_target_accepts_provider_error() {
        let payload = parse_callback_target(
            "/?error=access_denied&error_description=AADSTS65004%3A+declined&state=xyz",
            "/",
        )
        .expect("parse")
        .expect("payload");
        assert_eq!(payload.error.as_deref(), Some("access_denied"));
        assert_eq!(
            payload.error_description.as_deref(),
            Some("AADSTS65004: declined")
        );
    }

    #[test]
    fn parse_callback_target_ignores_other_paths() {
        assert!(parse_callback_target("/favicon.ico", "/").unwrap().is_none());
        assert!(parse_callback_target("/", "/").unwrap().is_none());
        assert!(parse_callback_target("/?code=a&state=b", "/auth").unwrap().is_none());
    }

    #[test]
    fn parse_callback_target_rejects_query_without_code_or_error() {
        assert!(parse_callback_target("/?state=only", "/").is_err());
    }

    #[test]
    fn validate_state_rejects_mismatch() {
        let payload = OAuthCallbackPayload {
            code: Some("abc".to_string()),
            state: Some("foo".to_string()),
            error: None,
            error_description: None,
        };
        let err = validate_state(&payload, "bar").expect_err("should fail");
        assert!(err.to_string().contains("state mismatch"));
    }

    #[tokio::test]
    async fn wait_for_callback_answers_noise_and_returns_code() {
        let listener = bind_callback_listener(0).await.expect("bind");
        let port = listener.port();
        let server = tokio::spawn(async move {
            wait_for_callback(listener, "/", "state-1", Duration::from_secs(5)).await
        });

        let not_found = send_get(port, "/favicon.ico").await;
        assert!(not_found.starts_with("HTTP/1.1 404"));
        let stray = send_get(port, "/?foo=1").await;
        assert!(stray.starts_with("HTTP/1.1 400"));
        let ok = send_get(port, "/?code=the-code&state=state-1").await;
        assert!(ok.starts_with("HTTP/1.1 200"));

        let payload = server.await.expect("join").expect("payload");
        assert_eq!(payload.code.as_deref(), Some("the-code"));
    }

    #[tokio::test]
    async fn wait_for_callback_times_out() {
        let listener = bind_callback_listener(0).await.expect("bind");
        let err = wait_for_callback(listener, "/", "s", Duration::from_millis(50))
            .await
            .expect_err("should time out");
        assert_eq!(err.code(), "SYSTEM_ERROR");
        assert!(err.to_string().contains("timed out"));
    }
}
