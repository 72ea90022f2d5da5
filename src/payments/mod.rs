//! Payment provider integration: the client seam used by checkout and the
//! webhook materializer, plus webhook signature verification.

pub mod signature;
pub mod stripe;

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use stripe::StripeClient;

/// Provider status string for a captured payment
pub const STATUS_SUCCEEDED: &str = "succeeded";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("payment provider response could not be decoded: {0}")]
    Decode(String),
    #[error("payment provider is not configured")]
    NotConfigured,
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePaymentIntent {
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    /// Opaque audit metadata attached to the provider object
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub client_secret: Option<String>,
    /// Charge identifier used as the receipt reference
    pub receipt_reference: Option<String>,
    pub receipt_url: Option<String>,
}

impl ProviderPaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == STATUS_SUCCEEDED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRefund {
    pub id: String,
    pub status: String,
}

/// External payment provider operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntent,
    ) -> Result<ProviderPaymentIntent, ProviderError>;

    async fn retrieve_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError>;

    async fn refund_payment_intent(&self, external_id: &str)
        -> Result<ProviderRefund, ProviderError>;
}
