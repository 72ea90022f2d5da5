use crate::{
    entities::{
        booking::{
            booking, payment_intent, Booking, BookingStatus, PaymentIntent, PaymentIntentStatus,
        },
        commerce::{cart, Cart, CartStatus, CartTotals},
    },
    errors::ServiceError,
    payments::{CreatePaymentIntent, PaymentProvider},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// What the checkout client needs to confirm the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedPaymentIntent {
    pub client_secret: String,
    pub payment_intent_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
}

/// Local payment record joined with the booking it produced, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentStatusView {
    pub payment_status: PaymentIntentStatus,
    pub booking_status: Option<BookingStatus>,
    pub booking_id: Option<Uuid>,
}

/// Converts a decimal amount to minor units (cents), rounding half away from zero.
/// Non-positive and out-of-range amounts are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let cents = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| ServiceError::InvalidAmount(format!("{} is out of range", amount)))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidAmount(format!("{} is out of range", amount)))?;
    if cents <= 0 {
        return Err(ServiceError::InvalidAmount(format!(
            "{} must be greater than zero",
            amount
        )));
    }
    Ok(cents)
}

/// Binds a cart's frozen totals to an external payment attempt.
#[derive(Clone)]
pub struct PaymentIntentIssuer {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    currency: String,
}

impl PaymentIntentIssuer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            provider,
            currency: currency.into(),
        }
    }

    /// Validates the cart under a row lock, then opens a provider payment intent
    /// for the snapshot's final total and records it as `pending`.
    ///
    /// The lock covers validation only. It is released before the provider call,
    /// so a cart mutated in between is caught by the booking-time drift check.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        cart_id: Uuid,
        user_id: Uuid,
    ) -> Result<IssuedPaymentIntent, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .filter(cart::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if !cart.has_schedule() {
            return Err(ServiceError::MissingSchedule);
        }

        let totals = CartTotals::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::StaleTotals)?;
        if totals.calculated_at < cart.updated_at {
            warn!(
                %cart_id,
                calculated_at = %totals.calculated_at,
                updated_at = %cart.updated_at,
                "totals snapshot predates last cart mutation"
            );
            return Err(ServiceError::StaleTotals);
        }

        let amount = to_minor_units(totals.final_total)?;

        // Status only; updated_at stays put so the snapshot remains fresh.
        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(CartStatus::Checkout);
        active.update(&txn).await?;
        txn.commit().await?;

        let metadata = BTreeMap::from([
            ("cart_id".to_string(), cart_id.to_string()),
            ("user_id".to_string(), user_id.to_string()),
            ("subtotal".to_string(), totals.subtotal.to_string()),
            ("promo_discount".to_string(), totals.promo_discount.to_string()),
            ("tax_amount".to_string(), totals.tax_amount.to_string()),
            ("final_total".to_string(), totals.final_total.to_string()),
        ]);

        let intent = self
            .provider
            .create_payment_intent(CreatePaymentIntent {
                amount,
                currency: self.currency.clone(),
                metadata: metadata.clone(),
            })
            .await?;
        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "payment intent {} has no client secret",
                intent.id
            ))
        })?;

        let now = Utc::now();
        let record = payment_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            external_id: Set(intent.id.clone()),
            cart_id: Set(Some(cart_id)),
            user_id: Set(Some(user_id)),
            amount: Set(amount),
            currency: Set(self.currency.clone()),
            status: Set(PaymentIntentStatus::Pending),
            receipt_reference: Set(None),
            note: Set(None),
            metadata: Set(Some(serde_json::to_value(&metadata)?)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!(external_id = %intent.id, "payment intent created but not recorded: {}", e);
            ServiceError::from(e)
        })?;

        counter!("servicebook.payment_intent.created", 1);
        info!(
            %cart_id,
            external_id = %record.external_id,
            amount,
            currency = %record.currency,
            "Payment intent issued"
        );

        Ok(IssuedPaymentIntent {
            client_secret,
            payment_intent_id: record.external_id,
            amount,
            currency: record.currency,
        })
    }

    /// Reports the payment's state and the booking it produced. Users only see
    /// their own payments.
    #[instrument(skip(self))]
    pub async fn payment_status(
        &self,
        external_id: &str,
        user_id: Uuid,
    ) -> Result<PaymentStatusView, ServiceError> {
        let record = PaymentIntent::find()
            .filter(payment_intent::Column::ExternalId.eq(external_id))
            .filter(payment_intent::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment {} not found", external_id))
            })?;

        let booking = Booking::find()
            .filter(booking::Column::PaymentIntentId.eq(record.id))
            .one(&*self.db)
            .await?;

        Ok(PaymentStatusView {
            payment_status: record.status,
            booking_status: booking.as_ref().map(|b| b.booking_status),
            booking_id: booking.map(|b| b.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::commerce::cart_totals;
    use crate::payments::{MockPaymentProvider, ProviderPaymentIntent};
    use assert_matches::assert_matches;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(94.50), 9450)]
    #[case(dec!(10.005), 1001)]
    #[case(dec!(0.01), 1)]
    #[case(dec!(19.994), 1999)]
    fn converts_to_cents(#[case] amount: Decimal, #[case] cents: i64) {
        assert_eq!(to_minor_units(amount).unwrap(), cents);
    }

    #[rstest]
    #[case(dec!(0))]
    #[case(dec!(0.004))]
    #[case(dec!(-3))]
    #[case(Decimal::MAX)]
    #[case(dec!(1_000_000_000_000_000_000))]
    fn rejects_unpayable_amounts(#[case] amount: Decimal) {
        assert_matches!(to_minor_units(amount), Err(ServiceError::InvalidAmount(_)));
    }

    async fn setup() -> Arc<DatabaseConnection> {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        Arc::new(db)
    }

    async fn seed_cart(db: &DatabaseConnection, scheduled: bool, totals_age: Option<i64>) -> (Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            service_id: Set(Uuid::new_v4()),
            service_variant_id: Set(Uuid::new_v4()),
            vendor_id: Set(None),
            booking_date: Set(scheduled.then(|| NaiveDate::from_ymd_opt(2030, 5, 1).unwrap())),
            booking_time: Set(scheduled.then(|| NaiveTime::from_hms_opt(10, 0, 0).unwrap())),
            notes: Set(None),
            media_url: Set(None),
            promo_id: Set(None),
            status: Set(CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();

        if let Some(age) = totals_age {
            cart_totals::ActiveModel {
                cart_id: Set(cart.id),
                subtotal: Set(dec!(100.00)),
                promo_discount: Set(dec!(10.00)),
                discounted_total: Set(dec!(90.00)),
                tax_name: Set("VAT".into()),
                tax_percentage: Set(dec!(5)),
                tax_amount: Set(dec!(4.50)),
                final_total: Set(dec!(94.50)),
                promo_id: Set(None),
                promo_code: Set(None),
                calculated_at: Set(now + Duration::seconds(age)),
            }
            .insert(db)
            .await
            .unwrap();
        }
        (cart.id, user_id)
    }

    fn provider_returning(id: &'static str) -> MockPaymentProvider {
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_create_payment_intent()
            .withf(|req| req.amount == 9450 && req.metadata.contains_key("final_total"))
            .times(1)
            .returning(move |req| {
                Ok(ProviderPaymentIntent {
                    id: id.to_string(),
                    amount: req.amount,
                    currency: req.currency,
                    status: "requires_payment_method".into(),
                    client_secret: Some(format!("{}_secret", id)),
                    receipt_reference: None,
                    receipt_url: None,
                })
            });
        provider
    }

    #[tokio::test]
    async fn issues_intent_and_records_pending_payment() {
        let db = setup().await;
        let (cart_id, user_id) = seed_cart(&db, true, Some(1)).await;
        let issuer = PaymentIntentIssuer::new(db.clone(), Arc::new(provider_returning("pi_1")), "usd");

        let issued = issuer.issue(cart_id, user_id).await.unwrap();
        assert_eq!(issued.payment_intent_id, "pi_1");
        assert_eq!(issued.client_secret, "pi_1_secret");
        assert_eq!(issued.amount, 9450);

        let status = issuer.payment_status("pi_1", user_id).await.unwrap();
        assert_eq!(status.payment_status, PaymentIntentStatus::Pending);
        assert_eq!(status.booking_id, None);

        let cart = Cart::find_by_id(cart_id).one(db.as_ref()).await.unwrap().unwrap();
        assert_eq!(cart.status, CartStatus::Checkout);

        assert_matches!(
            issuer.payment_status("pi_1", Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn missing_schedule_is_rejected_before_provider_call() {
        let db = setup().await;
        let (cart_id, user_id) = seed_cart(&db, false, Some(1)).await;
        let issuer = PaymentIntentIssuer::new(db, Arc::new(MockPaymentProvider::new()), "usd");

        assert_matches!(
            issuer.issue(cart_id, user_id).await,
            Err(ServiceError::MissingSchedule)
        );
    }

    #[rstest]
    #[case::no_snapshot(None)]
    #[case::old_snapshot(Some(-60))]
    #[tokio::test]
    async fn stale_totals_are_rejected(#[case] totals_age: Option<i64>) {
        let db = setup().await;
        let (cart_id, user_id) = seed_cart(&db, true, totals_age).await;
        let issuer = PaymentIntentIssuer::new(db.clone(), Arc::new(MockPaymentProvider::new()), "usd");

        assert_matches!(issuer.issue(cart_id, user_id).await, Err(ServiceError::StaleTotals));

        let records = PaymentIntent::find().all(db.as_ref()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn other_users_cart_is_not_found() {
        let db = setup().await;
        let (cart_id, _) = seed_cart(&db, true, Some(1)).await;
        let issuer = PaymentIntentIssuer::new(db, Arc::new(MockPaymentProvider::new()), "usd");

        assert_matches!(
            issuer.issue(cart_id, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
