use super::{
    CreatePaymentIntent, PaymentProvider, ProviderError, ProviderPaymentIntent, ProviderRefund,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Stripe-compatible REST client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    latest_charge: Option<LatestCharge>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LatestCharge {
    Id(String),
    Expanded {
        id: String,
        #[serde(default)]
        receipt_url: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl From<IntentResponse> for ProviderPaymentIntent {
    fn from(resp: IntentResponse) -> Self {
        let (receipt_reference, receipt_url) = match resp.latest_charge {
            Some(LatestCharge::Id(id)) => (Some(id), None),
            Some(LatestCharge::Expanded { id, receipt_url }) => (Some(id), receipt_url),
            None => (None, None),
        };
        Self {
            id: resp.id,
            amount: resp.amount,
            currency: resp.currency,
            status: resp.status,
            client_secret: resp.client_secret,
            receipt_reference,
            receipt_url,
        }
    }
}

impl StripeClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        match self.secret_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(builder.bearer_auth(key)),
            _ => Err(ProviderError::NotConfigured),
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, request), fields(amount = request.amount))]
    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntent,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), request.amount.to_string()),
            ("currency".into(), request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        form.extend(
            request
                .metadata
                .into_iter()
                .map(|(k, v)| (format!("metadata[{}]", k), v)),
        );

        let builder = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .form(&form);
        let response = self.authorized(builder)?.send().await?;
        let intent: IntentResponse = Self::decode(response).await?;
        debug!(external_id = %intent.id, "payment intent created");
        Ok(intent.into())
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        let builder = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.base_url, external_id))
            .query(&[("expand[]", "latest_charge")]);
        let response = self.authorized(builder)?.send().await?;
        let intent: IntentResponse = Self::decode(response).await?;
        Ok(intent.into())
    }

    #[instrument(skip(self))]
    async fn refund_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderRefund, ProviderError> {
        let builder = self
            .client
            .post(format!("{}/v1/refunds", self.base_url))
            .form(&[("payment_intent", external_id)]);
        let response = self.authorized(builder)?.send().await?;
        Self::decode(response).await
    }
}
