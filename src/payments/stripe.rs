use serde::{de::DeserializeOwned, Deserialize};
use tracing::{info, warn};

use crate::config::StripeConfig;
use crate::domain::aggregates::IntentSettlement;
use super::StripeError;

/// Minimal Stripe REST client (form-encoded requests, basic auth with the secret key).
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
    currency: String,
    webhook_secret: Option<String>,
    webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    pub status: Option<String>,
    pub payment_intent: Option<String>,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
            webhook_secret: config.webhook_secret.clone(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
        }
    }

    pub fn currency(&self) -> &str { &self.currency }
    pub fn webhook_secret(&self) -> Option<&str> { self.webhook_secret.as_deref() }
    pub fn webhook_tolerance_secs(&self) -> i64 { self.webhook_tolerance_secs }

    /// `amount` is in the currency's minor unit.
    pub async fn create_payment_intent(&self, amount: i64, metadata: &[(&str, String)]) -> Result<PaymentIntent, StripeError> {
        let mut form = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), self.currency.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        form.extend(metadata.iter().map(|(k, v)| (format!("metadata[{k}]"), v.clone())));
        let intent: PaymentIntent = self.post_form("/v1/payment_intents", &form, None).await?;
        info!(payment_intent = %intent.id, amount, "created Stripe payment intent");
        Ok(intent)
    }

    /// Full refund of a payment intent. Stripe replays the first result for a
    /// repeated `idempotency_key`.
    pub async fn create_refund(&self, payment_intent: &str, idempotency_key: &str) -> Result<Refund, StripeError> {
        let form = vec![("payment_intent".to_string(), payment_intent.to_string())];
        let refund: Refund = self.post_form("/v1/refunds", &form, Some(idempotency_key)).await?;
        info!(refund = %refund.id, payment_intent, "created Stripe refund");
        Ok(refund)
    }

    /// Cancels an intent that has not been paid yet.
    pub async fn cancel_payment_intent(&self, payment_intent: &str) -> Result<PaymentIntent, StripeError> {
        let intent: PaymentIntent = self.post_form(&format!("/v1/payment_intents/{payment_intent}/cancel"), &[], None).await?;
        info!(payment_intent = %intent.id, "cancelled Stripe payment intent");
        Ok(intent)
    }

    pub async fn retrieve_payment_intent(&self, payment_intent: &str) -> Result<PaymentIntent, StripeError> {
        let url = format!("{}/v1/payment_intents/{}", self.api_base, payment_intent);
        let response = self.http.get(&url).basic_auth(&self.secret_key, None::<&str>).send().await?;
        read_response(response).await
    }

    /// Settles the intent of a cancelled order. A void that loses the race
    /// with a successful charge turns into a refund.
    pub async fn settle(&self, settlement: &IntentSettlement) -> Result<(), StripeError> {
        match settlement {
            IntentSettlement::Refund(intent) => {
                self.create_refund(intent, &refund_key(intent)).await?;
            }
            IntentSettlement::Void(intent) => match self.cancel_payment_intent(intent).await {
                Ok(_) => {}
                Err(e @ StripeError::Api { .. }) => {
                    let current = self.retrieve_payment_intent(intent).await?;
                    match current.status.as_str() {
                        "canceled" => {}
                        "succeeded" => {
                            warn!(payment_intent = %intent, "intent was charged before it could be cancelled, refunding");
                            self.create_refund(intent, &refund_key(intent)).await?;
                        }
                        _ => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(String, String)], idempotency_key: Option<&str>) -> Result<T, StripeError> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self.http.post(&url).basic_auth(&self.secret_key, None::<&str>).form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        read_response(request.send().await?).await
    }
}

/// Idempotency key for the full refund of `payment_intent`. A retried cancel
/// or a late webhook replays the first refund instead of issuing another.
pub fn refund_key(payment_intent: &str) -> String { format!("refund-{payment_intent}") }

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StripeError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(StripeError::Api { status_code: status.as_u16(), message: error_message(&body) });
    }
    Ok(serde_json::from_str(&body)?)
}

/// `error.message` from a Stripe error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(&StripeConfig {
            secret_key: "sk_test_123".into(),
            webhook_secret: None,
            api_base: server.uri(),
            currency: "usd".into(),
            webhook_tolerance_secs: 300,
        })
    }

    #[tokio::test]
    async fn test_create_payment_intent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header_exists("authorization"))
            .and(body_string_contains("amount=2500"))
            .and(body_string_contains("metadata%5BorderId%5D=ord-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1", "client_secret": "pi_1_secret", "amount": 2500, "currency": "usd", "status": "requires_payment_method"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = client(&server).create_payment_intent(2500, &[("orderId", "ord-1".to_string())]).await.unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.client_secret.as_deref(), Some("pi_1_secret"));
    }

    #[tokio::test]
    async fn test_refund_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(header("Idempotency-Key", "refund-ord-1"))
            .and(body_string_contains("payment_intent=pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "re_1", "amount": 2500, "status": "succeeded", "payment_intent": "pi_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refund = client(&server).create_refund("pi_1", "refund-ord-1").await.unwrap();
        assert_eq!(refund.id, "re_1");
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": { "type": "card_error", "message": "Your card was declined." }
            })))
            .mount(&server)
            .await;

        let err = client(&server).create_refund("pi_1", "k").await.unwrap_err();
        match err {
            StripeError::Api { status_code, message } => {
                assert_eq!(status_code, 402);
                assert_eq!(message, "Your card was declined.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_settle_voids_open_intent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_open/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_open", "client_secret": null, "amount": 2500, "currency": "usd", "status": "canceled"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/v1/refunds")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&server).await;

        client(&server).settle(&IntentSettlement::Void("pi_open".into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_refunds_intent_charged_before_void() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_won/cancel"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "You cannot cancel this PaymentIntent because it has a status of succeeded." }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_won"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_won", "client_secret": null, "amount": 2500, "currency": "usd", "status": "succeeded"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(header("Idempotency-Key", "refund-pi_won"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "re_1", "amount": 2500, "status": "succeeded", "payment_intent": "pi_won"
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).settle(&IntentSettlement::Void("pi_won".into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_void_of_cancelled_intent_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": { "message": "already canceled" } })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_old", "client_secret": null, "amount": 2500, "currency": "usd", "status": "canceled"
            })))
            .mount(&server)
            .await;

        client(&server).settle(&IntentSettlement::Void("pi_old".into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_void_fails_while_intent_is_processing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": { "message": "processing" } })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_busy", "client_secret": null, "amount": 2500, "currency": "usd", "status": "processing"
            })))
            .mount(&server)
            .await;

        let err = client(&server).settle(&IntentSettlement::Void("pi_busy".into())).await.unwrap_err();
        assert!(matches!(err, StripeError::Api { status_code: 400, .. }));
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}
