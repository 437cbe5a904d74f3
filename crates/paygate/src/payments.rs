//! Payment resources of the gateway.
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    client::GatewayClient,
    config::Language,
    error::{Error, Result},
};

const PAYMENT_RESOURCE: &str = "payments/payment";

/// A payment to create. Amounts are in the smallest unit of the currency.
#[derive(Debug, Clone, PartialEq, Serialize, TypedBuilder)]
pub struct Payment {
    #[builder(default, setter(strip_option))]
    pub payer: Option<Payer>,
    pub amount: u64,
    #[builder(setter(into))]
    pub currency: String,
    #[builder(setter(into))]
    pub order_number: String,
    #[builder(setter(into))]
    pub order_description: String,
    #[builder(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eshop_id: Option<u64>,
    #[builder(default, setter(strip_option))]
    pub callback: Option<Callback>,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<Language>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_payment_instruments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub amount: u64,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_rate: Option<u32>,
}

/// Where the gateway sends the customer back and where it posts state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    #[serde(rename = "url")]
    pub return_url: String,
    #[serde(rename = "notification")]
    pub notification_url: String,
}

/// Payment as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentResponse {
    pub id: u64,
    #[serde(default)]
    pub order_number: String,
    pub state: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payer: Option<Payer>,
    #[serde(default)]
    pub eshop_id: Option<u64>,
    #[serde(default)]
    pub callback: Option<Callback>,
    #[serde(default)]
    pub payment_instrument: Option<String>,
    /// Page the customer is redirected to for paying.
    #[serde(default)]
    pub gateway_url: Option<String>,
}

impl GatewayClient {
    /// Create a payment.
    ///
    /// # Errors
    /// Fails if the request fails, the gateway answers with a non-success status,
    /// or the response is empty or not a payment.
    pub async fn create_payment(&self, payment: &Payment) -> Result<PaymentResponse> {
        let outcome = self.post(PAYMENT_RESOURCE).json(payment).send().await;
        outcome
            .decode()?
            .ok_or_else(|| Error::EmptyResponse(outcome.status().unwrap_or_default()))
    }

    /// Fetch the current state of payment `id`.
    ///
    /// # Errors
    /// Same as [`create_payment`](Self::create_payment).
    pub async fn get_payment(&self, id: u64) -> Result<PaymentResponse> {
        let outcome = self.get(&format!("{PAYMENT_RESOURCE}/{id}")).send().await;
        outcome
            .decode()?
            .ok_or_else(|| Error::EmptyResponse(outcome.status().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::ClientConfig, store::MemoryTokenStore};

    async fn client(server: &mut mockito::Server) -> (GatewayClient, mockito::Mock) {
        let token = server
            .mock("POST", "/api/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
            .create_async()
            .await;
        let client = GatewayClient::new(
            ClientConfig::builder()
                .account_id(8_836_046_164)
                .client_id("my-client")
                .client_secret("my-secret")
                .gateway_url(server.url())
                .token_store(Arc::new(MemoryTokenStore::new()))
                .build(),
        )
        .unwrap();
        (client, token)
    }

    #[tokio::test]
    async fn test_create_payment() {
        let mut server = mockito::Server::new_async().await;
        let (client, _token) = client(&mut server).await;
        let mock = server
            .mock("POST", "/api/payments/payment")
            .match_header("authorization", "Bearer tok-1")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({
                "payer": { "allowed_payment_instruments": ["PAYMENT_CARD"] },
                "amount": 1000,
                "currency": "CZK",
                "order_number": "001",
                "order_description": "pojisteni01",
                "items": [{ "name": "item01", "amount": 1000, "count": 1 }],
                "callback": {
                    "url": "https://eshop.example.com/return",
                    "notification": "https://eshop.example.com/notify"
                },
                "lang": "CS"
            })))
            .with_status(200)
            .with_body(
                r#"{"id":3000006529,"order_number":"001","state":"CREATED","amount":1000,
                "currency":"CZK","gateway_url":"https://gw.example.com/gw/v3/abc"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let payment = Payment::builder()
            .payer(Payer {
                allowed_payment_instruments: vec!["PAYMENT_CARD".to_string()],
            })
            .amount(1000)
            .currency("CZK")
            .order_number("001")
            .order_description("pojisteni01")
            .items(vec![Item {
                name: "item01".to_string(),
                amount: 1000,
                count: 1,
                vat_rate: None,
            }])
            .callback(Callback {
                return_url: "https://eshop.example.com/return".to_string(),
                notification_url: "https://eshop.example.com/notify".to_string(),
            })
            .lang(Language::Czech)
            .build();

        let created = client.create_payment(&payment).await.unwrap();

        mock.assert_async().await;
        assert_eq!(created.id, 3_000_006_529);
        assert_eq!(created.state, "CREATED");
        assert_eq!(
            created.gateway_url.as_deref(),
            Some("https://gw.example.com/gw/v3/abc")
        );
    }

    #[tokio::test]
    async fn test_get_payment() {
        let mut server = mockito::Server::new_async().await;
        let (client, _token) = client(&mut server).await;
        let _mock = server
            .mock("GET", "/api/payments/payment/3000006529")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body(
                r#"{"id":3000006529,"order_number":"001","state":"PAID","amount":1000,
                "currency":"CZK","payment_instrument":"PAYMENT_CARD"}"#,
            )
            .create_async()
            .await;

        let payment = client.get_payment(3_000_006_529).await.unwrap();

        assert_eq!(payment.state, "PAID");
        assert_eq!(payment.payment_instrument.as_deref(), Some("PAYMENT_CARD"));
        assert_eq!(payment.payer, None);
    }

    #[tokio::test]
    async fn test_get_payment_failures() {
        let mut server = mockito::Server::new_async().await;
        let (client, _token) = client(&mut server).await;
        let _missing = server
            .mock("GET", "/api/payments/payment/1")
            .with_status(404)
            .with_body(r#"{"errors":[{"error_code":111}]}"#)
            .create_async()
            .await;
        let _empty = server
            .mock("GET", "/api/payments/payment/2")
            .with_status(200)
            .create_async()
            .await;

        match client.get_payment(1).await {
            Err(Error::UnexpectedStatus { status, .. }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            client.get_payment(2).await,
            Err(Error::EmptyResponse(status)) if status == StatusCode::OK
        ));
    }
}
