pub mod carts;
pub mod payment_webhooks;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    payments::PaymentProvider,
    services::{
        booking_materializer::BookingMaterializer, carts::CartService,
        payment_intents::PaymentIntentIssuer, pricing::PricingCalculator,
    },
};
use std::sync::Arc;

/// Service container shared by every handler through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub pricing: Arc<PricingCalculator>,
    pub payment_intents: Arc<PaymentIntentIssuer>,
    pub materializer: Arc<BookingMaterializer>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, provider: Arc<dyn PaymentProvider>, config: &AppConfig) -> Self {
        Self {
            carts: Arc::new(CartService::new(db.clone())),
            pricing: Arc::new(PricingCalculator::new(db.clone())),
            payment_intents: Arc::new(PaymentIntentIssuer::new(
                db.clone(),
                provider.clone(),
                config.default_currency.clone(),
            )),
            materializer: Arc::new(BookingMaterializer::new(
                db,
                provider,
                config.auto_refund_on_processing_error,
            )),
        }
    }
}
