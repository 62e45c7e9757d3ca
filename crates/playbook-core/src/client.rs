//! Transport to the SOC REST API.
//!
//! [`ApiClient`] is the seam the rest of the crate is written against: one
//! JSON request in, one status plus JSON body out. Transport failures
//! (connect errors, timeouts, unreadable bodies) surface as
//! [`PlaybookError::Transient`]; HTTP error statuses are *not* errors at this
//! layer and are classified by the repository.

use crate::config::Config;
use crate::error::{PlaybookError, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Method / ApiResponse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

pub trait ApiClient: Send + Sync {
    /// Project the client is scoped to; fills `{project_id}` in paths.
    fn project_id(&self) -> &str;

    /// Issue one request. `path` is relative to the service endpoint.
    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse>;
}

impl<T: ApiClient + ?Sized> ApiClient for Arc<T> {
    fn project_id(&self) -> &str {
        (**self).project_id()
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        (**self).request(method, path, body)
    }
}

impl<T: ApiClient + ?Sized> ApiClient for &T {
    fn project_id(&self) -> &str {
        (**self).project_id()
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        (**self).request(method, path, body)
    }
}

// ---------------------------------------------------------------------------
// HttpApiClient
// ---------------------------------------------------------------------------

pub struct HttpApiClient {
    endpoint: String,
    project_id: String,
    token: Option<String>,
    timeout: Duration,
    http: reqwest::blocking::Client,
}

impl fmt::Debug for HttpApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApiClient")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PlaybookError::Config(format!("cannot build HTTP client: {e}")))
}

impl HttpApiClient {
    pub fn new(endpoint: impl Into<String>, project_id: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(PlaybookError::Config("endpoint must not be empty".into()));
        }
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(PlaybookError::Config("project_id must not be empty".into()));
        }
        Ok(Self {
            endpoint,
            project_id,
            token: None,
            timeout: DEFAULT_TIMEOUT,
            http: build_http(DEFAULT_TIMEOUT)?,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = Self::new(&cfg.endpoint, &cfg.project_id)?
            .with_timeout(Duration::from_secs(cfg.timeout_secs))?;
        Ok(match &cfg.auth_token {
            Some(token) if !token.is_empty() => client.with_token(token.clone()),
            _ => client,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Deadline applied to every request made through this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_http(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }
}

impl ApiClient for HttpApiClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let url = self.url(path);
        let request_id = Uuid::new_v4().to_string();
        debug!(%method, %url, %request_id, "SOC API request");

        let mut req = self
            .http
            .request(method.to_reqwest(), &url)
            .header("Content-Type", "application/json")
            .header("X-Request-Id", &request_id);
        if let Some(token) = &self.token {
            req = req.header("X-Auth-Token", token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().map_err(|e| transport_error(method, &url, &e))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .map_err(|e| transport_error(method, &url, &e))?;
        debug!(%method, %url, %request_id, status, "SOC API response");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse::new(status, body))
    }
}

fn transport_error(method: Method, url: &str, err: &reqwest::Error) -> PlaybookError {
    let what = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "could not connect"
    } else {
        "failed"
    };
    PlaybookError::Transient(format!("{method} {url} {what}: {err}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
