//! Client for the forum's unofficial JSON RPC endpoint.
//!
//! Sessions are plain cookie jars: nothing here keeps state between calls,
//! so one [`PiazzaClient`] serves every course.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE, SET_COOKIE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AuthError, ContentError, RpcError};
use crate::models::{AuthorId, ForumUser, RawThread, Thread};

/// Cookie whose value doubles as the per-request CSRF token.
pub const SESSION_COOKIE: &str = "session_id";
const CSRF_HEADER: &str = "CSRF-Token";

static CSRF_IN_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:CSRF_TOKEN\s*=\s*"([^"]+)")|(?:name="csrf_token"\s+value="([^"]+)")"#).expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    /// `user.login` RPC.
    #[default]
    Api,
    /// Scrape a CSRF token from the login page, then submit the login form.
    Form,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub mode: LoginMode,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("email", &self.email).field("mode", &self.mode).finish_non_exhaustive()
    }
}

/// Authenticated forum session: the cookie jar from login.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    cookies: Vec<(String, String)>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.cookies.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Session").field("cookies", &names).finish()
    }
}

impl Session {
    /// Builds a session from `Set-Cookie` values; fails unless the session
    /// cookie is among them.
    pub fn from_cookies(cookies: Vec<(String, String)>) -> Result<Self, AuthError> {
        let session = Session { cookies };
        match session.csrf_token() {
            Some(token) if !token.is_empty() => Ok(session),
            _ => Err(AuthError::MissingSessionCookie),
        }
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.cookies.iter().find(|(n, _)| n == SESSION_COOKIE).map(|(_, v)| v.as_str())
    }

    pub fn cookie_header(&self) -> String {
        self.cookies.iter().map(|(n, v)| format!("{n}={v}")).collect::<Vec<_>>().join("; ")
    }
}

/// Collects `name=value` pairs from every `Set-Cookie` header, later
/// cookies replacing earlier ones of the same name.
fn merge_set_cookies(jar: &mut Vec<(String, String)>, headers: &HeaderMap) {
    for raw in headers.get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok()) {
        let pair = raw.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else { continue };
        let (name, value) = (name.trim().to_string(), value.trim().to_string());
        jar.retain(|(n, _)| *n != name);
        jar.push((name, value));
    }
}

/// Request nonce: base-36 millisecond clock plus a fixed suffix.
fn nonce() -> String {
    let mut n = chrono::Utc::now().timestamp_millis().unsigned_abs();
    let mut digits = Vec::new();
    loop {
        digits.push(std::char::from_digit((n % 36) as u32, 36).unwrap_or('0'));
        n /= 36;
        if n == 0 {
            break;
        }
    }
    digits.iter().rev().collect::<String>() + "abcd"
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    error: Value,
    #[serde(default)]
    result: Value,
}

fn looks_unauthenticated(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    ["not logged in", "not authenticated", "must be logged in"].iter().any(|phrase| m.contains(phrase))
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError>;
}

#[async_trait]
pub trait ForumApi: Send + Sync {
    async fn fetch_content(&self, session: &Session, nid: &str, cid: &str) -> Result<Thread, ContentError>;
    /// One batched lookup for every id; ids the forum does not know are
    /// simply missing from the result.
    async fn get_users(&self, session: &Session, nid: &str, ids: &[AuthorId]) -> Result<Vec<ForumUser>, RpcError>;
}

#[derive(Clone)]
pub struct PiazzaClient {
    http: reqwest::Client,
    base_url: String,
}

impl PiazzaClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    /// One RPC round trip, returning the response headers and `result`.
    async fn call(
        &self,
        session: Option<&Session>,
        method: &str,
        params: Value,
    ) -> Result<(HeaderMap, Value), RpcError> {
        let url = format!("{}/logic/api?method={method}&aid={}", self.base_url, nonce());
        let mut req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({ "method": method, "params": params }));
        if let Some(session) = session {
            req = req
                .header(COOKIE, session.cookie_header())
                .header(CSRF_HEADER, session.csrf_token().unwrap_or_default());
        }
        let resp = req.send().await.map_err(|e| RpcError::Transport {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RpcError::Unauthenticated { method: method.to_string() });
        }
        if status != reqwest::StatusCode::OK {
            return Err(RpcError::Status { method: method.to_string(), status: status.as_u16() });
        }

        let headers = resp.headers().clone();
        let envelope: RpcEnvelope = resp.json().await.map_err(|e| RpcError::Shape {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
        match envelope.error {
            Value::Null | Value::Bool(false) => Ok((headers, envelope.result)),
            err => {
                let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
                if session.is_some() && looks_unauthenticated(&message) {
                    Err(RpcError::Unauthenticated { method: method.to_string() })
                } else {
                    Err(RpcError::Protocol { method: method.to_string(), message })
                }
            }
        }
    }

    async fn call_typed<T: DeserializeOwned>(&self, session: &Session, method: &str, params: Value) -> Result<T, RpcError> {
        let (_, result) = self.call(Some(session), method, params).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Shape { method: method.to_string(), reason: e.to_string() })
    }

    async fn login_api(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let (headers, _) = self
            .call(None, "user.login", json!({ "email": credentials.email, "pass": credentials.password }))
            .await?;
        let mut jar = Vec::new();
        merge_set_cookies(&mut jar, &headers);
        Session::from_cookies(jar)
    }

    async fn login_form(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let transport = |method: &str, e: reqwest::Error| {
            AuthError::Rpc(RpcError::Transport { method: method.to_string(), reason: e.to_string() })
        };

        let page = self
            .http
            .get(format!("{}/main/csrf_token", self.base_url))
            .send()
            .await
            .map_err(|e| transport("csrf_token", e))?;
        let mut jar = Vec::new();
        merge_set_cookies(&mut jar, page.headers());
        let body = page.text().await.map_err(|e| transport("csrf_token", e))?;
        let token = CSRF_IN_PAGE
            .captures(&body)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .ok_or(AuthError::MissingCsrfToken)?;

        let mut form = self.http.post(format!("{}/class", self.base_url)).form(&[
            ("from", "/signup"),
            ("email", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
            ("remember", "on"),
            ("csrf_token", token.as_str()),
        ]);
        if !jar.is_empty() {
            let cookie = jar.iter().map(|(n, v)| format!("{n}={v}")).collect::<Vec<_>>().join("; ");
            form = form.header(COOKIE, cookie);
        }
        let resp = form.send().await.map_err(|e| transport("login form", e))?;
        if !(resp.status().is_success() || resp.status().is_redirection()) {
            return Err(AuthError::Rpc(RpcError::Status {
                method: "login form".to_string(),
                status: resp.status().as_u16(),
            }));
        }
        merge_set_cookies(&mut jar, resp.headers());
        Session::from_cookies(jar)
    }
}

#[async_trait]
impl Authenticator for PiazzaClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        match credentials.mode {
            LoginMode::Api => self.login_api(credentials).await,
            LoginMode::Form => self.login_form(credentials).await,
        }
    }
}

#[async_trait]
impl ForumApi for PiazzaClient {
    async fn fetch_content(&self, session: &Session, nid: &str, cid: &str) -> Result<Thread, ContentError> {
        let raw: RawThread = self.call_typed(session, "content.get", json!({ "nid": nid, "cid": cid })).await?;
        Ok(Thread::from(raw))
    }

    async fn get_users(&self, session: &Session, nid: &str, ids: &[AuthorId]) -> Result<Vec<ForumUser>, RpcError> {
        // a null result means none of the ids are known
        let users: Option<Vec<ForumUser>> =
            self.call_typed(session, "network.get_users", json!({ "ids": ids, "nid": nid })).await?;
        Ok(users.unwrap_or_default())
    }
}
