//! Request pipeline
//!
//! Every outbound call goes through a client built once per adapter type:
//! redirects are never followed, compression is never negotiated and the
//! product `User-Agent` is always sent. Each request carries the adapter's
//! default timeout unless overridden.

use crate::config::HttpConfig;
use crate::error::{Error, Result, TransportCode};
use crate::event::AdapterEvent;
use crate::metrics::{ADAPTER_REQUESTS_TOTAL, ADAPTER_REQUEST_DURATION};
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT_ENCODING};
use reqwest::{redirect, Certificate, Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection reuse settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Agent {
    /// Close idle pooled connections after this long
    pub pool_idle_timeout: Option<Duration>,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: Option<usize>,
    /// TCP keepalive interval
    pub tcp_keepalive: Option<Duration>,
}

impl Agent {
    /// Agent described by the runtime's `http` section
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            pool_idle_timeout: Some(config.pool_idle_timeout()),
            pool_max_idle_per_host: Some(config.pool_max_idle_per_host),
            tcp_keepalive: config.tcp_keepalive(),
        }
    }
}

/// Build the HTTP client shared by every instance of an adapter type
pub(crate) fn build_client(agent: &Agent, roots: &[Certificate]) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .user_agent(crate::USER_AGENT)
        .redirect(redirect::Policy::none())
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .tcp_keepalive(agent.tcp_keepalive);

    if let Some(idle) = agent.pool_idle_timeout {
        builder = builder.pool_idle_timeout(idle);
    }
    if let Some(max) = agent.pool_max_idle_per_host {
        builder = builder.pool_max_idle_per_host(max);
    }
    for cert in roots {
        builder = builder.add_root_certificate(cert.clone());
    }

    builder.build()
}

/// Resolve `path` against `endpoint`; absolute URLs pass through untouched
pub(crate) fn resolve_url(endpoint: Option<&str>, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    match endpoint {
        Some(endpoint) if endpoint.ends_with('/') && path.starts_with('/') => {
            format!("{}{}", endpoint, &path[1..])
        }
        Some(endpoint) => format!("{}{}", endpoint, path),
        None => path.to_string(),
    }
}

/// Outbound request under construction
pub struct Request {
    adapter: Arc<str>,
    method: Method,
    url: String,
    inner: reqwest::RequestBuilder,
    events: broadcast::Sender<AdapterEvent>,
}

impl Request {
    pub(crate) fn new(
        adapter: Arc<str>,
        client: &Client,
        method: Method,
        url: String,
        timeout: Duration,
        events: broadcast::Sender<AdapterEvent>,
    ) -> Self {
        debug!(adapter = %adapter, %method, %url, "Creating request");

        let inner = client
            .request(method.clone(), &url)
            .timeout(timeout)
            .header(ACCEPT_ENCODING, "identity");

        Self {
            adapter,
            method,
            url,
            inner,
            events,
        }
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.inner = self.inner.header(key, value);
        self
    }

    /// Add query parameters
    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.inner = self.inner.query(query);
        self
    }

    /// JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.inner = self.inner.json(body);
        self
    }

    /// URL-encoded form body
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        self.inner = self.inner.form(form);
        self
    }

    /// Raw body
    pub fn body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.inner = self.inner.body(body);
        self
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer_auth(mut self, token: impl fmt::Display) -> Self {
        self.inner = self.inner.bearer_auth(token);
        self
    }

    /// `Authorization: Basic ...`
    pub fn basic_auth(mut self, username: impl fmt::Display, password: Option<impl fmt::Display>) -> Self {
        self.inner = self.inner.basic_auth(username, password);
        self
    }

    /// Override the adapter's default timeout for this request
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.timeout(timeout);
        self
    }

    /// Resolved URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the request.
    ///
    /// Statuses of 400 and above become [`Error::BadRequest`] carrying the
    /// status and body. Dropping the returned future aborts the request.
    pub async fn send(self) -> Result<Response> {
        let Request {
            adapter,
            method,
            url,
            inner,
            events,
        } = self;

        let request_id = Uuid::new_v4();
        let _ = events.send(AdapterEvent::Request {
            request_id,
            adapter: adapter.to_string(),
            method: method.to_string(),
            url: url.clone(),
        });

        let timer = ADAPTER_REQUEST_DURATION
            .with_label_values(&[&*adapter])
            .start_timer();
        let sent = inner.send().await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                timer.observe_duration();
                let code = TransportCode::from_reqwest(&e);
                ADAPTER_REQUESTS_TOTAL
                    .with_label_values(&[&*adapter, code.as_str()])
                    .inc();
                warn!(adapter = %adapter, %method, %url, code = %code, "Request failed: {}", e);
                return Err(Error::transport(&*adapter, code, e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let _ = events.send(AdapterEvent::Response {
            request_id,
            adapter: adapter.to_string(),
            method: method.to_string(),
            url: url.clone(),
            status,
        });

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            Error::transport(&*adapter, TransportCode::from_reqwest(&e), e.to_string())
        });
        timer.observe_duration();
        let body = body?;

        ADAPTER_REQUESTS_TOTAL
            .with_label_values(&[&*adapter, status.to_string().as_str()])
            .inc();

        if status >= 400 {
            warn!(adapter = %adapter, %method, %url, status, "Destination returned an error");
            return Err(Error::http_status(
                &*adapter,
                status,
                String::from_utf8_lossy(&body),
            ));
        }

        debug!(adapter = %adapter, %method, %url, status, "Request completed");
        Ok(Response {
            status,
            headers,
            body,
        })
    }

    /// Send, giving up with [`Error::Cancelled`] once `token` fires
    pub async fn send_cancellable(self, token: &CancellationToken) -> Result<Response> {
        let adapter = self.adapter.to_string();

        tokio::select! {
            _ = token.cancelled() => {
                debug!(adapter = %adapter, "Request cancelled");
                Err(Error::Cancelled { integration: adapter })
            }
            result = self.send() => result,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("adapter", &self.adapter)
            .field("method", &self.method)
            .field("url", &self.url)
            .finish()
    }
}

/// Successful (< 400) destination response
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Bytes,
}

impl Response {
    /// Body as text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
