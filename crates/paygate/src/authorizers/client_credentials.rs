use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use http::{header::ACCEPT, HeaderValue, StatusCode};
use oauth2::{ClientId, ClientSecret};
use serde::Deserialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use super::{bearer_header, Authorizer};
use crate::{
    client::api_url,
    config::{ClientConfig, Language, TokenScope, DEFAULT_REFRESH_INTERVAL, DEFAULT_TIMEOUT},
    error::{Error, Result},
    store::{Credential, MemoryTokenStore, TokenStore},
};

/// Path of the token endpoint below the API prefix of the gateway.
const TOKEN_RESOURCE: &str = "oauth2/token";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Authenticate with the gateway using `OAuth2` client credentials.
///
/// Tokens are fetched lazily: [`access_token`](Self::access_token) serves the stored token while it is
/// valid and otherwise exchanges the client credentials for a new one. All callers are serialized
/// on a single critical section, so a stale token causes exactly one exchange no matter how many
/// callers are waiting. The waiters observe the freshly stored token afterwards.
///
/// Optionally a background task refreshes the token on a fixed interval, see
/// [`start_auto_refresh`](Self::start_auto_refresh). The task runs until [`close`](Self::close) is
/// called. Dropping the last handle of a still running task cancels it too, but logs a warning.
///
/// Uses `Arc` internally for cheap cloning.
#[derive(Debug, Clone)]
pub struct ClientCredentialAuthenticator {
    inner: Arc<Inner>,
    refresh_task: Arc<Mutex<Option<RefreshTask>>>,
}

#[derive(Debug)]
struct Inner {
    client_id: ClientId,
    client_secret: ClientSecret,
    token_url: Url,
    scope: TokenScope,
    language: Language,
    http_client: reqwest::Client,
    store: Arc<dyn TokenStore>,
    refresh_interval: Duration,
    // Held across load, exchange and save.
    exchange_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct RefreshTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            tracing::warn!("Token refresh task dropped while running. Call `close()` before dropping the authenticator.");
            self.shutdown.cancel();
        }
    }
}

/// Builder for [`ClientCredentialAuthenticator`].
///
/// The following configurations are available:
/// * `scope`: Scope of the requested token. Default is [`TokenScope::PaymentAll`].
/// * `language`: Language sent with the token request. Default is [`Language::Czech`].
/// * `http_client`: Custom `reqwest::Client` for token requests. Default is a client with redirects
///   disabled and a 30s timeout.
/// * `token_store`: Where the token is kept. Default is a [`MemoryTokenStore`].
/// * `refresh_interval`: Interval of the background refresh. Default is 25 minutes.
#[derive(Debug, Clone)]
pub struct ClientCredentialAuthenticatorBuilder {
    client_id: ClientId,
    client_secret: ClientSecret,
    gateway_url: Url,
    scope: TokenScope,
    language: Language,
    http_client: Option<reqwest::Client>,
    token_store: Option<Arc<dyn TokenStore>>,
    refresh_interval: Duration,
}

impl ClientCredentialAuthenticatorBuilder {
    /// Create a new builder from a client id, client secret and the base URL of the gateway.
    /// Tokens are requested from `{gateway_url}/api/oauth2/token`.
    #[must_use]
    pub fn new(client_id: &str, client_secret: &str, gateway_url: Url) -> Self {
        Self {
            client_id: ClientId::new(client_id.to_string()),
            client_secret: ClientSecret::new(client_secret.to_string()),
            gateway_url,
            scope: TokenScope::default(),
            language: Language::default(),
            http_client: None,
            token_store: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Create a builder carrying the credentials, scope, language, store and refresh interval of `config`.
    #[must_use]
    pub fn from_config(config: &ClientConfig, gateway_url: Url) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            gateway_url,
            scope: config.scope,
            language: config.language,
            http_client: config.http_client.clone(),
            token_store: config.token_store.clone(),
            refresh_interval: config.refresh_interval,
        }
    }

    #[must_use]
    pub fn scope(mut self, scope: TokenScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Optionally specify the `reqwest::Client` to use for token requests.
    /// When setting a custom client, please make sure to set the `redirect` policy to `Policy::none()`
    /// to prevent SSRF vulnerabilities.
    #[must_use]
    pub fn set_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Build the [`ClientCredentialAuthenticator`].
    /// No token is fetched until the first call to [`ClientCredentialAuthenticator::access_token`].
    ///
    /// # Errors
    /// Fails if no HTTP client was set and the default client cannot be built.
    pub fn build(self) -> Result<ClientCredentialAuthenticator> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(DEFAULT_TIMEOUT)
                .build()?,
        };

        let inner = Inner {
            client_id: self.client_id,
            client_secret: self.client_secret,
            token_url: api_url(&self.gateway_url, TOKEN_RESOURCE),
            scope: self.scope,
            language: self.language,
            http_client,
            store: self
                .token_store
                .unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
            refresh_interval: self.refresh_interval,
            exchange_lock: tokio::sync::Mutex::new(()),
        };

        Ok(ClientCredentialAuthenticator {
            inner: Arc::new(inner),
            refresh_task: Arc::new(Mutex::new(None)),
        })
    }
}

impl ClientCredentialAuthenticator {
    /// Create a new [`ClientCredentialAuthenticatorBuilder`].
    #[must_use]
    pub fn builder(
        client_id: &str,
        client_secret: &str,
        gateway_url: Url,
    ) -> ClientCredentialAuthenticatorBuilder {
        ClientCredentialAuthenticatorBuilder::new(client_id, client_secret, gateway_url)
    }

    /// Returns a currently valid access token.
    ///
    /// Serves the stored token while it has not expired. Otherwise exchanges the client
    /// credentials for a new token and stores it before returning.
    ///
    /// # Errors
    /// - Fails if the token endpoint cannot be reached or answers with a non-success status.
    /// - Fails if the token response cannot be parsed.
    pub async fn access_token(&self) -> Result<String> {
        let _guard = self.inner.exchange_lock.lock().await;

        match self.inner.store.load().await {
            Ok(Some(credential)) if credential.is_valid_at(Utc::now()) => {
                tracing::debug!("Access token served from cache");
                return Ok(credential.token().to_string());
            }
            Ok(_) => {
                tracing::debug!("Access token expired or not found, requesting a new one");
            }
            Err(e) => {
                tracing::warn!("Failed to load access token from store, requesting a new one: {e}");
            }
        }

        let credential = self.inner.request_new_token().await?;
        self.inner.save(&credential).await;
        Ok(credential.token().to_string())
    }

    /// Snapshot of the stored credential. Never triggers a token exchange.
    ///
    /// # Errors
    /// - Fails with [`Error::TokenNotAvailable`] if no token has been stored yet.
    /// - Fails if the token store cannot be read.
    pub async fn status(&self) -> Result<Credential> {
        self.inner
            .store
            .load()
            .await?
            .ok_or(Error::TokenNotAvailable)
    }

    /// Launch the background task that refreshes the token every `refresh_interval`,
    /// regardless of whether the stored token is still valid.
    /// A failed refresh is logged and leaves the stored token untouched.
    ///
    /// Calling this while the task is already running has no effect.
    ///
    /// # Errors
    /// - Fails with [`Error::RuntimeUnavailable`] outside of a Tokio runtime.
    /// - Fails with [`Error::InvalidConfiguration`] if the refresh interval is zero or too
    ///   large to schedule.
    pub fn start_auto_refresh(&self) -> Result<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;
        let interval = self.inner.refresh_interval;
        if interval.is_zero() {
            return Err(Error::InvalidConfiguration(
                "refresh_interval must be greater than zero".to_string(),
            ));
        }
        // The task schedules its ticks at `now + interval` and one interval after that.
        let schedulable = interval.checked_mul(2).is_some_and(|two_ticks| {
            tokio::time::Instant::now().checked_add(two_ticks).is_some()
        });
        if !schedulable {
            return Err(Error::InvalidConfiguration(format!(
                "refresh_interval of {}s is too large",
                interval.as_secs()
            )));
        }

        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::debug!("Token refresh task is already running");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let span = tracing::info_span!(
            "token_refresh",
            client_id = self.inner.client_id.as_str()
        );
        tracing::debug!(
            "Starting refresh task for client `{}`, refreshing every {}s.",
            self.inner.client_id.as_str(),
            self.inner.refresh_interval.as_secs()
        );
        let handle = runtime.spawn(
            refresh_task(self.inner.clone(), shutdown.clone()).instrument(span),
        );

        *slot = Some(RefreshTask { shutdown, handle });
        Ok(())
    }

    /// Signal the background refresh task to stop.
    ///
    /// Does not wait for the task to observe the signal, and does not affect in-flight
    /// [`access_token`](Self::access_token) calls. Calling it again has no effect.
    pub fn close(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            tracing::debug!(
                "Stopping refresh task for client `{}`",
                self.inner.client_id.as_str()
            );
            task.shutdown.cancel();
        }
    }

    /// Whether the background refresh task has been started and not closed.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.inner.token_url
    }
}

#[async_trait]
impl Authorizer for ClientCredentialAuthenticator {
    async fn authorization_header(&self) -> Result<Arc<HeaderValue>> {
        let token = self.access_token().await?;
        bearer_header(&token).map(Arc::new)
    }
}

/// Background task refreshing the token on every tick of the interval.
/// The first tick fires one interval after start.
async fn refresh_task(inner: Arc<Inner>, shutdown: CancellationToken) {
    let period = inner.refresh_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("Auto-refresh: shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        tracing::info!("Auto-refresh: starting token renewal");

        let refreshed = tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("Auto-refresh: shutting down, abandoning token renewal");
                return;
            }
            refreshed = inner.refresh() => refreshed,
        };

        match refreshed {
            Ok(()) => tracing::info!("Auto-refresh: token successfully refreshed"),
            // The previous token stays in the store.
            Err(e) => tracing::error!("Auto-refresh: failed to refresh token: {e}"),
        }
    }
}

impl Inner {
    /// Exchange and store a new token unconditionally, inside the critical section.
    async fn refresh(&self) -> Result<()> {
        let _guard = self.exchange_lock.lock().await;
        let credential = self.request_new_token().await?;
        self.save(&credential).await;
        Ok(())
    }

    /// Store failures are logged. The caller still gets the fresh token.
    async fn save(&self, credential: &Credential) {
        if let Err(e) = self.store.save(credential).await {
            tracing::error!("Failed to save access token to store: {e}");
        }
    }

    async fn request_new_token(&self) -> Result<Credential> {
        let response = self
            .http_client
            .post(self.token_url.clone())
            .basic_auth(self.client_id.as_str(), Some(self.client_secret.secret()))
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.scope.as_str()),
                ("language", self.language.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
            tracing::debug!("Token endpoint responded with status {status}");
            return Err(Error::OAuth2RequestFailed { status, body });
        }

        let body = response.bytes().await?;
        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| Error::OAuth2ParseError(e.to_string()))?;

        let expires_at = i64::try_from(token.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::OAuth2ParseError(format!("expires_in {} is out of range", token.expires_in))
            })?;

        tracing::debug!(
            "Successfully fetched token for client `{}`",
            self.client_id.as_str()
        );
        Ok(Credential::new(token.access_token, expires_at))
    }
}
