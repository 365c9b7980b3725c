//! HTTP client seam and the declarative probe built on it.
use crate::sample::{ErrorTag, Outcome};
use crate::scenario::{Exec, ExecContext, ExecError};
use crate::transaction::{check, record_request};
use barrage_core::{ConfigError, HttpProbeConfig};
use futures_util::future::BoxFuture;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpError {
    pub fn tag(&self) -> ErrorTag {
        match self {
            HttpError::Timeout => ErrorTag::Timeout,
            HttpError::Connect(_) | HttpError::Transport(_) => ErrorTag::Transport,
            HttpError::InvalidRequest(_) => ErrorTag::Exec,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if err.is_connect() {
            HttpError::Connect(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidRequest(err.to_string())
        } else {
            HttpError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Outcome of one request. `status` is 0 when `error` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub latency: Duration,
    pub error: Option<HttpError>,
}

impl HttpResponse {
    pub fn failed(latency: Duration, error: HttpError) -> Self {
        Self {
            status: 0,
            latency,
            error: Some(error),
        }
    }
}

#[trait_variant::make(HttpClient: Send)]
pub trait LocalHttpClient {
    async fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &[(String, String)],
    ) -> HttpResponse;
}

/// [`HttpClient`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, HttpError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(HttpError::from)?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &[(String, String)],
    ) -> Result<u16, HttpError> {
        let mut builder = self.client.request(method.clone(), url);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        // NOTE: Latency covers the full body so keep-alive connections are reusable.
        let _ = response.bytes().await?;
        Ok(status)
    }
}

impl HttpClient for ReqwestClient {
    async fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &[(String, String)],
    ) -> HttpResponse {
        let start = Instant::now();
        let res = self.send(method, url, body, headers).await;
        let latency = start.elapsed();
        match res {
            Ok(status) => HttpResponse {
                status,
                latency,
                error: None,
            },
            Err(err) => HttpResponse::failed(latency, err),
        }
    }
}

/// Exec function issuing one configured request per iteration.
///
/// Every attempt is recorded as a request sample. A transport failure or a status outside the
/// expected set also fails the iteration. Configured checks are recorded on their own, and the
/// think time runs last, after the request and its checks.
pub struct HttpProbe<C> {
    name: String,
    request: Arc<HttpRequest>,
    config: Arc<HttpProbeConfig>,
    client: Arc<C>,
}

impl<C> HttpProbe<C> {
    pub fn from_config(
        name: &str,
        config: &HttpProbeConfig,
        client: C,
    ) -> Result<Self, ConfigError> {
        config.validate(name)?;
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidProbe {
                exec: name.to_string(),
                reason: format!("unsupported method \"{}\"", config.method),
            })?;

        let request = HttpRequest {
            method,
            url: config.url.clone(),
            body: config.body.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        Ok(Self {
            name: name.to_string(),
            request: Arc::new(request),
            config: Arc::new(config.clone()),
            client: Arc::new(client),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C> Exec for HttpProbe<C>
where
    C: HttpClient + Sync + 'static,
{
    fn exec(&self, ctx: ExecContext) -> BoxFuture<'static, Result<(), ExecError>> {
        let client = self.client.clone();
        let request = self.request.clone();
        let config = self.config.clone();
        Box::pin(async move {
            let response = client
                .request(
                    &request.method,
                    &request.url,
                    request.body.as_deref(),
                    &request.headers,
                )
                .await;
            for (name, statuses) in &config.checks {
                check(name, statuses.contains(&response.status));
            }

            let res = match response.error {
                Some(err) => {
                    debug!(
                        "Request to {} failed for worker {} of {}: {err}",
                        request.url, ctx.worker_id, ctx.scenario
                    );
                    record_request(response.latency, Outcome::Failure(err.tag()));
                    Err(err.into())
                }
                None if config.is_expected(response.status) => {
                    record_request(
                        response.latency,
                        Outcome::Success {
                            status: Some(response.status),
                        },
                    );
                    Ok(())
                }
                None => {
                    record_request(
                        response.latency,
                        Outcome::Failure(ErrorTag::HttpStatus(response.status)),
                    );
                    Err(ExecError::Status(response.status))
                }
            };

            if !config.sleep.is_zero() {
                tokio::time::sleep(config.sleep).await;
            }
            res
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Client answering every request with a fixed status after a fixed delay.
    #[derive(Debug, Clone)]
    pub struct MockClient {
        pub latency: Duration,
        pub status: u16,
    }

    impl HttpClient for MockClient {
        async fn request(
            &self,
            _method: &Method,
            _url: &str,
            _body: Option<&str>,
            _headers: &[(String, String)],
        ) -> HttpResponse {
            tokio::time::sleep(self.latency).await;
            HttpResponse {
                status: self.status,
                latency: self.latency,
                error: None,
            }
        }
    }

    /// Client failing every request with the given error.
    #[derive(Debug, Clone)]
    pub struct FailingClient(pub HttpError);

    impl HttpClient for FailingClient {
        async fn request(
            &self,
            _method: &Method,
            _url: &str,
            _body: Option<&str>,
            _headers: &[(String, String)],
        ) -> HttpResponse {
            HttpResponse::failed(Duration::ZERO, self.0.clone())
        }
    }
}
