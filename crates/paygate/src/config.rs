use std::{fmt, sync::Arc, time::Duration};

use oauth2::{ClientId, ClientSecret};
use serde::{Serialize, Serializer};
use typed_builder::TypedBuilder;
use url::Url;

use crate::{
    error::{Error, Result},
    store::TokenStore,
};

/// Default timeout applied to every request, including token exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval of the background token refresh.
/// Shorter than the 60 minute lifetime of gateway tokens.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(25 * 60);

/// Scope requested for the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TokenScope {
    /// Only allows creating payments.
    PaymentCreate,
    /// Full access to the payment API.
    #[default]
    PaymentAll,
}

impl TokenScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TokenScope::PaymentCreate => "payment-create",
            TokenScope::PaymentAll => "payment-all",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language sent with the token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    Czech,
    English,
    Slovak,
    German,
    Russian,
    Polish,
    Hungarian,
    French,
    Romanian,
    Bulgarian,
    Croatian,
    Italian,
    Spanish,
    Ukrainian,
    Estonian,
    Lithuanian,
    Latvian,
    Slovenian,
    Portuguese,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Czech => "CS",
            Language::English => "EN",
            Language::Slovak => "SK",
            Language::German => "DE",
            Language::Russian => "RU",
            Language::Polish => "PL",
            Language::Hungarian => "HU",
            Language::French => "FR",
            Language::Romanian => "RO",
            Language::Bulgarian => "BG",
            Language::Croatian => "HR",
            Language::Italian => "IT",
            Language::Spanish => "ES",
            Language::Ukrainian => "UK",
            Language::Estonian => "ET",
            Language::Lithuanian => "LT",
            Language::Latvian => "LV",
            Language::Slovenian => "SL",
            Language::Portuguese => "PT",
        }
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of a [`GatewayClient`](crate::GatewayClient).
///
/// The following configurations are available:
/// * `account_id`: Merchant account identifier. Required, must not be zero.
/// * `client_id` / `client_secret`: OAuth2 client credentials. Required.
/// * `gateway_url`: Base URL of the gateway, e.g. `https://gw.sandbox.example.com`. Required.
/// * `scope`: Token scope. Default is [`TokenScope::PaymentAll`].
/// * `language`: Language of the token request. Default is [`Language::Czech`].
/// * `request_timeout`: Timeout of every request. Default is 30s.
/// * `auto_refresh`: Keep the token refreshed in the background. Default is `false`.
/// * `refresh_interval`: Interval of the background refresh. Default is 25 minutes.
/// * `metrics`: Emit per-request timing records. Default is `false`.
/// * `token_store`: Where tokens are kept. Default is a [`MemoryTokenStore`](crate::MemoryTokenStore).
/// * `http_client`: Custom `reqwest::Client`. Default is built from this configuration.
///
/// Nothing is validated until [`ClientConfig::validate`] runs, which
/// [`GatewayClient::new`](crate::GatewayClient::new) does before any network activity.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ClientConfig {
    pub account_id: u64,
    #[builder(setter(transform = |client_id: &str| ClientId::new(client_id.to_string())))]
    pub client_id: ClientId,
    #[builder(setter(transform = |client_secret: &str| ClientSecret::new(client_secret.to_string())))]
    pub client_secret: ClientSecret,
    #[builder(setter(into))]
    pub gateway_url: String,
    #[builder(default)]
    pub scope: TokenScope,
    #[builder(default)]
    pub language: Language,
    #[builder(default = DEFAULT_TIMEOUT)]
    pub request_timeout: Duration,
    #[builder(default = false)]
    pub auto_refresh: bool,
    #[builder(default = DEFAULT_REFRESH_INTERVAL)]
    pub refresh_interval: Duration,
    #[builder(default = false)]
    pub metrics: bool,
    #[builder(default, setter(strip_option))]
    pub token_store: Option<Arc<dyn TokenStore>>,
    #[builder(default, setter(strip_option))]
    pub http_client: Option<reqwest::Client>,
}

impl ClientConfig {
    /// Check the mandatory fields and parse the gateway URL.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidConfiguration`] if the account id is zero, the client id,
    /// client secret or gateway URL is empty, or the gateway URL cannot be used as a base URL.
    pub fn validate(&self) -> Result<Url> {
        if self.account_id == 0 {
            return Err(invalid("account_id is a mandatory parameter and cannot be zero"));
        }
        if self.client_id.as_str().is_empty() {
            return Err(invalid("client_id is a mandatory parameter"));
        }
        if self.client_secret.secret().is_empty() {
            return Err(invalid("client_secret is a mandatory parameter"));
        }
        if self.gateway_url.trim().is_empty() {
            return Err(invalid("gateway_url is a mandatory parameter"));
        }

        let url = Url::parse(self.gateway_url.trim())
            .map_err(|e| invalid(&format!("gateway_url `{}` is invalid: {e}", self.gateway_url)))?;
        if url.cannot_be_a_base() {
            return Err(invalid(&format!(
                "gateway_url `{}` cannot be used as a base URL",
                self.gateway_url
            )));
        }
        Ok(url)
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidConfiguration(reason.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .account_id(8_836_046_164)
            .client_id("my-client")
            .client_secret("my-secret")
            .gateway_url("https://gw.sandbox.example.com")
            .build()
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.scope, TokenScope::PaymentAll);
        assert_eq!(config.language, Language::Czech);
        assert_eq!(config.request_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.refresh_interval, Duration::from_secs(1500));
        assert!(!config.auto_refresh);
        assert!(!config.metrics);
        assert!(config.token_store.is_none());
    }

    #[test]
    fn test_valid_config_yields_gateway_url() {
        let url = config().validate().unwrap();
        assert_eq!(url.as_str(), "https://gw.sandbox.example.com/");
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let mut zero_account = config();
        zero_account.account_id = 0;
        let mut no_client_id = config();
        no_client_id.client_id = ClientId::new(String::new());
        let mut no_secret = config();
        no_secret.client_secret = ClientSecret::new(String::new());
        let mut no_url = config();
        no_url.gateway_url = "  ".to_string();

        for (config, field) in [
            (zero_account, "account_id"),
            (no_client_id, "client_id"),
            (no_secret, "client_secret"),
            (no_url, "gateway_url"),
        ] {
            let err = config.validate().unwrap_err();
            assert!(
                matches!(&err, Error::InvalidConfiguration(reason) if reason.starts_with(field)),
                "unexpected error for {field}: {err}"
            );
        }
    }

    #[test]
    fn test_unparsable_gateway_url_is_rejected() {
        let mut config = config();
        config.gateway_url = "mailto:payments@example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        config.gateway_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_secret_is_not_printed() {
        let printed = format!("{:?}", config());
        assert!(!printed.contains("my-secret"));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(TokenScope::PaymentCreate.to_string(), "payment-create");
        assert_eq!(Language::Ukrainian.as_str(), "UK");
        assert_eq!(Language::English.to_string(), "EN");
    }
}
