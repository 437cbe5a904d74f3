use std::sync::Arc;

use bytes::Bytes;
use http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    authorizers::{Authorizer, ClientCredentialAuthenticator, ClientCredentialAuthenticatorBuilder},
    config::ClientConfig,
    error::{Error, Result},
    transport::{
        with_timing_hooks, AuthTransport, MetricsTransport, ReqwestTransport, Transport,
        TransportChain,
    },
};

/// Path segment between the gateway base URL and every API resource.
const API_PREFIX: &str = "api";

/// Resolve `resource` against the API root of `base`.
///
/// The base path, `api` and the resource are joined with single slashes. Empty segments
/// are dropped, so leading or trailing slashes on either side do not matter.
/// Anything after a `?` in `resource` becomes the query string.
pub(crate) fn api_url(base: &Url, resource: &str) -> Url {
    let (resource, query) = match resource.split_once('?') {
        Some((resource, query)) => (resource, Some(query)),
        None => (resource, None),
    };
    let path = base
        .path()
        .split('/')
        .chain([API_PREFIX])
        .chain(resource.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let mut url = base.clone();
    url.set_path(&format!("/{path}"));
    if query.is_some() {
        url.set_query(query);
    }
    url
}

/// Client of the payment gateway.
///
/// Every request passes through the transport chain built from the configuration:
/// the authorization decorator always, the metrics decorator if enabled.
/// The client owns an [`ClientCredentialAuthenticator`] that keeps the access token.
///
/// Uses `Arc` internally for cheap cloning.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    account_id: u64,
    base_url: Url,
    http_client: reqwest::Client,
    transport: Arc<dyn Transport>,
    authenticator: ClientCredentialAuthenticator,
}

impl GatewayClient {
    /// Validate `config` and assemble the client.
    ///
    /// No network activity happens here. If `auto_refresh` is enabled, the background
    /// refresh task is started, which requires a running Tokio runtime.
    ///
    /// # Errors
    /// - Fails with [`Error::InvalidConfiguration`] if the configuration is invalid.
    /// - Fails if the default HTTP client cannot be built.
    /// - Fails with [`Error::RuntimeUnavailable`] if `auto_refresh` is enabled outside of a runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.validate()?;

        let http_client = match &config.http_client {
            Some(client) => client.clone(),
            None => default_http_client(&config)?,
        };

        let authenticator =
            ClientCredentialAuthenticatorBuilder::from_config(&config, base_url.clone())
                .set_http_client(http_client.clone())
                .build()?;

        let authorizer: Arc<dyn Authorizer> = Arc::new(authenticator.clone());
        let mut chain = TransportChain::new().layer("auth", move |next| -> Arc<dyn Transport> {
            Arc::new(AuthTransport::new(authorizer.clone(), next))
        });
        if config.metrics {
            chain = chain.layer("metrics", |next| -> Arc<dyn Transport> {
                Arc::new(MetricsTransport::new(next))
            });
        }
        let transport = chain.build(Arc::new(ReqwestTransport::new(http_client.clone())));

        if config.auto_refresh {
            authenticator.start_auto_refresh()?;
        }

        tracing::debug!(
            "Gateway client for account {} ready, transport chain {chain:?}",
            config.account_id
        );

        Ok(Self {
            account_id: config.account_id,
            base_url,
            http_client,
            transport,
            authenticator,
        })
    }

    #[must_use]
    pub fn account_id(&self) -> u64 {
        self.account_id
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The authenticator shared by all requests of this client.
    #[must_use]
    pub fn authenticator(&self) -> &ClientCredentialAuthenticator {
        &self.authenticator
    }

    /// Stop the background token refresh. Safe to call more than once.
    pub fn close(&self) {
        self.authenticator.close();
    }

    /// Start building a request to `resource`, relative to the API root of the gateway.
    /// A query string in `resource` is kept; [`GatewayRequest::query`] appends to it.
    pub fn request(&self, method: Method, resource: &str) -> GatewayRequest<'_> {
        GatewayRequest {
            client: self,
            method,
            url: api_url(&self.base_url, resource),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            cancel: None,
            error: None,
        }
    }

    /// Convenience method to make a `GET` request to a resource.
    pub fn get(&self, resource: &str) -> GatewayRequest<'_> {
        self.request(Method::GET, resource)
    }

    /// Convenience method to make a `POST` request to a resource.
    pub fn post(&self, resource: &str) -> GatewayRequest<'_> {
        self.request(Method::POST, resource)
    }

    /// Convenience method to make a `PUT` request to a resource.
    pub fn put(&self, resource: &str) -> GatewayRequest<'_> {
        self.request(Method::PUT, resource)
    }

    /// Convenience method to make a `PATCH` request to a resource.
    pub fn patch(&self, resource: &str) -> GatewayRequest<'_> {
        self.request(Method::PATCH, resource)
    }

    /// Convenience method to make a `DELETE` request to a resource.
    pub fn delete(&self, resource: &str) -> GatewayRequest<'_> {
        self.request(Method::DELETE, resource)
    }
}

fn default_http_client(config: &ClientConfig) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.request_timeout);
    let builder = if config.metrics {
        with_timing_hooks(builder)
    } else {
        builder
    };
    Ok(builder.build()?)
}

/// A request being built. Nothing is sent until [`send`](Self::send).
///
/// `Accept: application/json` is always sent, `Content-Type: application/json` whenever
/// there is a body. Explicit headers take precedence.
#[derive(Debug)]
#[must_use = "a request does nothing until it is sent"]
pub struct GatewayRequest<'a> {
    client: &'a GatewayClient,
    method: Method,
    url: Url,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    cancel: Option<CancellationToken>,
    // Reported by `send`, so the builder chain does not have to be fallible.
    error: Option<Error>,
}

impl GatewayRequest<'_> {
    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.body = Some(Bytes::from(body)),
            Err(e) => {
                self.error = Some(Error::InvalidRequest(format!(
                    "Failed to serialize request body: {e}"
                )));
            }
        }
        self
    }

    /// Use raw bytes as the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Append query parameters.
    pub fn query(mut self, pairs: &[(&str, &str)]) -> Self {
        self.query.extend(
            pairs
                .iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string())),
        );
        self
    }

    /// Abort the request as soon as `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Target URL, without query parameters.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send the request through the transport chain and read the whole response.
    ///
    /// Never fails by itself: transport failures, non-success statuses and
    /// cancellation are all reported through [`Outcome::error`].
    pub async fn send(self) -> Outcome {
        let method = self.method.clone();
        let url = self.url.clone();

        match self.execute().await {
            Ok(outcome) => {
                match &outcome.error {
                    None => tracing::info!(
                        "Request {method} {} succeeded with status {}",
                        url.path(),
                        outcome.status.map_or(0, |status| status.as_u16())
                    ),
                    Some(e) => tracing::warn!("Request {method} {} failed: {e}", url.path()),
                }
                outcome
            }
            Err(e) => {
                tracing::warn!("Request {method} {} failed: {e}", url.path());
                Outcome::failed(e)
            }
        }
    }

    async fn execute(self) -> Result<Outcome> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if self.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        headers.extend(self.headers);

        let mut builder = self
            .client
            .http_client
            .request(self.method, self.url)
            .headers(headers);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        let request = builder.build()?;

        let transport = self.client.transport.clone();
        let exchange = async move {
            let response = transport.send(request).await?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string);
            let body = response.bytes().await?;
            Ok::<_, Error>((status, content_type, body))
        };

        let (status, content_type, body) = match self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                exchanged = exchange => exchanged?,
            },
            None => exchange.await?,
        };

        Ok(Outcome::completed(status, content_type, body))
    }
}

/// Result of a gateway request.
///
/// A response with a non-success status still carries its status and body,
/// alongside an [`Error::UnexpectedStatus`].
#[derive(Debug, Clone)]
pub struct Outcome {
    status: Option<StatusCode>,
    content_type: Option<String>,
    body: Bytes,
    error: Option<Error>,
}

impl Outcome {
    fn completed(status: StatusCode, content_type: Option<String>, body: Bytes) -> Self {
        let error = (!status.is_success()).then(|| Error::UnexpectedStatus {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        Self {
            status: Some(status),
            content_type,
            body,
            error,
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            status: None,
            content_type: None,
            body: Bytes::new(),
            error: Some(error),
        }
    }

    /// Status of the response, if one was received.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Raw response body. Empty if no response was received.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Turn a failed outcome into its error.
    ///
    /// # Errors
    /// Returns the error carried by the outcome.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    /// Decode the JSON body into `T`. An empty body decodes to `None`.
    ///
    /// # Errors
    /// - Returns the error of a failed request.
    /// - Fails with [`Error::ResponseDecodeFailed`] if the body is not valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if self.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.body)?))
    }
}
