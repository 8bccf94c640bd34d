use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, Url, header::COOKIE};
use thiserror::Error;

/// Session token issued by a device on login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Value for the `Cookie` request header.
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One request against a device, relative to its base address.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: &'static str,

    /// Form body, sent url-encoded with POST requests.
    pub form: Vec<(&'static str, String)>,

    pub cookie: Option<SessionCookie>,
}

impl Request {
    pub fn get(path: &'static str) -> Self {
        Self {
            method: Method::Get,
            path,
            form: Vec::new(),
            cookie: None,
        }
    }

    pub fn post_form(path: &'static str, form: Vec<(&'static str, String)>) -> Self {
        Self {
            method: Method::Post,
            path,
            form,
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: Option<&SessionCookie>) -> Self {
        self.cookie = cookie.cloned();
        self
    }
}

/// Raw device response. No interpretation happens at this layer.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,

    /// Cookies set by the response, in header order.
    pub cookies: Vec<SessionCookie>,

    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {path:?}: {reason}")]
    Endpoint { path: &'static str, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// HTTP seam between a device and the network.
///
/// THREAD SAFETY:
/// - Must be Send + Sync, a device moves into its own poll task
///   every gather cycle.
///
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the raw response.
    async fn send(&self, request: Request) -> Result<Response, TransportError>;

    /// Drops any connection state held for the current session.
    fn reset(&mut self);
}

// ------------------------------------------------------------
// reqwest transport
// ------------------------------------------------------------
//
// One client per device. The client is rebuilt on reset so pooled
// keep-alive connections from the previous session are dropped.
//
// The session cookie is attached by hand instead of through a
// cookie store: the device layer owns the session.
//
pub struct HttpTransport {
    base: Url,
    timeout: Option<Duration>,
    client: Client,
}

impl HttpTransport {
    pub fn new(base: Url, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let client = build_client(timeout).map_err(TransportError::Client)?;
        Ok(Self {
            base,
            timeout,
            client,
        })
    }
}

fn build_client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let url = self
            .base
            .join(request.path)
            .map_err(|e| TransportError::Endpoint {
                path: request.path,
                reason: e.to_string(),
            })?;

        debug!("{:?} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(url.clone()),
            // .form() also sets Content-Type: application/x-www-form-urlencoded
            Method::Post => self.client.post(url.clone()).form(&request.form),
        };
        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie.header_value());
        }

        let to_error = |source: reqwest::Error| {
            if source.is_timeout() {
                TransportError::Timeout { url: url.to_string() }
            } else {
                TransportError::Request {
                    url: url.to_string(),
                    source,
                }
            }
        };

        let response = builder.send().await.map_err(to_error)?;

        let status = response.status().as_u16();
        let cookies = response
            .cookies()
            .map(|c| SessionCookie::new(c.name(), c.value()))
            .collect();
        let body = response.bytes().await.map_err(to_error)?.to_vec();

        Ok(Response {
            status,
            cookies,
            body,
        })
    }

    fn reset(&mut self) {
        match build_client(self.timeout) {
            Ok(client) => self.client = client,
            Err(e) => warn!("{}: keeping previous http client, rebuild failed: {e}", self.base),
        }
    }
}
