//! HTTP transport abstraction and the shared retry engine.
//!
//! Every platform integration funnels its raw HTTP through
//! [`send_with_retry`], which implements the uniform retry / backoff /
//! credential-refresh protocol:
//!
//! - 429: sleep for `Retry-After` when the provider sends it, otherwise
//!   linear backoff; exhausting attempts surfaces a rate-limit error that
//!   carries the retry-after hint.
//! - 401/403: exactly one credential refresh through the supplied
//!   [`CredentialRefresh`] hook, then one more try with the new bearer
//!   token; a second rejection is an authorization error.
//! - 5xx and network-level failures: linear backoff until attempts are
//!   exhausted.
//! - anything else: non-retryable immediately.
//!
//! The engine only sees the [`HttpTransport`] trait, so the whole table of
//! behaviors is testable against a scripted transport with no platform
//! code involved.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use promobot_common::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A request as the retry engine sees it. The bearer token lives in its
/// own slot (not the header list) so a mid-flight credential refresh can
/// swap it before the retry.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub basic: Option<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    pub json: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            bearer: None,
            basic: None,
            form: None,
            json: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn basic(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic = Some((user.into(), password.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_bearer(&mut self, token: String) {
        self.bearer = Some(token);
    }
}

/// A response with the body already read; header names are lower-cased.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn json_value(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.headers.get("retry-after")?.trim().parse().ok()
    }

    fn body_snippet(&self) -> &str {
        let end = self
            .body
            .char_indices()
            .nth(300)
            .map(|(i, _)| i)
            .unwrap_or(self.body.len());
        &self.body[..end]
    }
}

/// Transport-level failure, before any HTTP status exists.
#[derive(Debug)]
pub enum TransportError {
    Timeout(String),
    Connect(String),
    Other(String),
}

impl TransportError {
    fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(m) => write!(f, "timeout: {m}"),
            TransportError::Connect(m) => write!(f, "connection failed: {m}"),
            TransportError::Other(m) => write!(f, "{m}"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default transport backed by reqwest.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some((user, password)) = &request.basic {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Hook the engine calls on the first 401/403. Returns the new bearer
/// token the retried request should carry.
#[async_trait]
pub trait CredentialRefresh: Send {
    async fn refresh_credentials(&mut self) -> Result<String, Error>;
}

/// For requests with no refreshable credential (API-key calls, token
/// endpoints): any 401/403 becomes an authentication error directly.
pub struct NoRefresh;

#[async_trait]
impl CredentialRefresh for NoRefresh {
    async fn refresh_credentials(&mut self) -> Result<String, Error> {
        Err(Error::Auth(
            "no credential refresh available for this request".into(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub expected_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            expected_statuses: vec![200, 201, 202],
        }
    }
}

impl RetryPolicy {
    pub fn expecting(statuses: &[u16]) -> Self {
        Self {
            expected_statuses: statuses.to_vec(),
            ..Self::default()
        }
    }
}

/// Drive one logical request through the retry protocol.
pub async fn send_with_retry(
    transport: &dyn HttpTransport,
    policy: &RetryPolicy,
    mut request: HttpRequest,
    refresh: &mut dyn CredentialRefresh,
) -> Result<HttpResponse, Error> {
    let mut refreshed = false;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let response = match transport.execute(&request).await {
            Ok(response) => response,
            Err(err) if err.is_retryable() => {
                if attempt >= policy.max_attempts {
                    return Err(Error::Api(format!(
                        "Network error after {attempt} attempts: {err}"
                    )));
                }
                warn!("{} {} failed ({err}), retrying", request.method, request.url);
                sleep(policy.backoff * attempt).await;
                continue;
            }
            Err(err) => return Err(Error::Api(format!("Request failed: {err}"))),
        };

        let status = response.status;

        // A status the caller listed as expected is returned as-is, even
        // one the protocol would otherwise act on (the identity probe
        // expects to see raw 401/403).
        if policy.expected_statuses.contains(&status) {
            return Ok(response);
        }

        if status == 429 {
            let retry_after = response.retry_after_seconds();
            if attempt >= policy.max_attempts {
                return Err(Error::rate_limit(
                    format!("Rate limited after {attempt} attempts"),
                    retry_after,
                ));
            }
            debug!(
                "429 from {} (retry-after: {:?}), attempt {attempt}",
                request.url, retry_after
            );
            match retry_after {
                Some(secs) => sleep(Duration::from_secs(secs)).await,
                None => sleep(policy.backoff * attempt).await,
            }
            continue;
        }

        if status == 401 || status == 403 {
            if !refreshed {
                refreshed = true;
                let token = refresh
                    .refresh_credentials()
                    .await
                    .map_err(|e| Error::Auth(format!("credential refresh failed: {e}")))?;
                request.set_bearer(token);
                // The refresh-and-retry does not consume a retry attempt.
                attempt -= 1;
                continue;
            }
            return Err(Error::Authorization(format!(
                "Authorization failed with status {status}: {}",
                response.body_snippet()
            )));
        }

        if (500..600).contains(&status) {
            if attempt >= policy.max_attempts {
                return Err(Error::Api(format!(
                    "Server error {status} after {attempt} attempts: {}",
                    response.body_snippet()
                )));
            }
            sleep(policy.backoff * attempt).await;
            continue;
        }

        return Err(Error::Api(format!(
            "Unexpected status {status}: {}",
            response.body_snippet()
        )));
    }
}
