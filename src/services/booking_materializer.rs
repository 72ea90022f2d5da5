//! Turns a provider-confirmed payment into a booking, exactly once.
//!
//! Webhooks arrive at least once. The local payment record is the
//! idempotency key: anything but `pending` is terminal and short-circuits,
//! and inside the copy transaction the record is claimed with a conditional
//! `pending -> completed` update before anything else is written, so two
//! concurrent deliveries cannot both produce a booking.

use crate::{
    db::record_transaction,
    entities::{
        booking::{
            booking, booking_addon, booking_consent, booking_line_item, booking_preference,
            booking_totals, payment_intent, BookingPaymentStatus, BookingStatus, PaymentIntent,
            PaymentIntentModel, PaymentIntentStatus,
        },
        commerce::{
            cart_addon, cart_consent, cart_line_item, cart_preference, Cart, CartAddon,
            CartConsent, CartLineItem, CartModel, CartPreference, CartTotals,
        },
    },
    errors::ServiceError,
    events::outbox,
    payments::{PaymentProvider, ProviderPaymentIntent},
    services::{
        carts::delete_cart_rows,
        payment_intents::to_minor_units,
        promotions::{increment_usage, PromoResolver},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Event type that triggers materialization
pub const PAYMENT_SUCCEEDED_EVENT: &str = "payment_intent.succeeded";

/// Minimal view of a provider webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: WebhookObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    pub id: String,
}

/// How one delivery was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Not a payment-succeeded event
    Ignored,
    /// The payment already reached a terminal state
    AlreadyProcessed(PaymentIntentStatus),
    /// A concurrent delivery claimed the payment first
    Duplicate,
    Completed { booking_id: Uuid },
    Refunded { refund_id: String },
    ManualReview(PaymentIntentStatus),
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::AlreadyProcessed(_) => "already_processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Completed { .. } => "completed",
            WebhookOutcome::Refunded { .. } => "refunded",
            WebhookOutcome::ManualReview(_) => "manual_review",
        }
    }
}

/// Failure inside the copy transaction
#[derive(Debug)]
enum CopyError {
    AlreadyClaimed,
    Failed(ServiceError),
}

impl From<DbErr> for CopyError {
    fn from(e: DbErr) -> Self {
        CopyError::Failed(e.into())
    }
}

impl From<ServiceError> for CopyError {
    fn from(e: ServiceError) -> Self {
        CopyError::Failed(e)
    }
}

#[derive(Clone)]
pub struct BookingMaterializer {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    auto_refund: bool,
}

impl BookingMaterializer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        auto_refund: bool,
    ) -> Self {
        Self {
            db,
            provider,
            auto_refund,
        }
    }

    /// Handles a verified webhook event. Only `payment_intent.succeeded` is acted on.
    #[instrument(skip(self, event), fields(event_id = event.id.as_deref().unwrap_or("-"), event_type = %event.event_type))]
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
        if event.event_type != PAYMENT_SUCCEEDED_EVENT {
            debug!("ignoring webhook event");
            counter!("servicebook.webhook.outcome", 1, "outcome" => "ignored");
            return Ok(WebhookOutcome::Ignored);
        }
        self.materialize(&event.data.object.id).await
    }

    /// Runs the state machine for one external payment id.
    #[instrument(skip(self))]
    pub async fn materialize(&self, external_id: &str) -> Result<WebhookOutcome, ServiceError> {
        let outcome = self.run(external_id).await;
        match &outcome {
            Ok(o) => {
                counter!("servicebook.webhook.outcome", 1, "outcome" => o.label());
            }
            Err(e) => {
                error!(external_id, "webhook processing failed: {}", e);
                counter!("servicebook.webhook.outcome", 1, "outcome" => "error");
            }
        }
        outcome
    }

    async fn run(&self, external_id: &str) -> Result<WebhookOutcome, ServiceError> {
        let db = self.db.as_ref();
        let local = PaymentIntent::find()
            .filter(payment_intent::Column::ExternalId.eq(external_id))
            .one(db)
            .await?;

        if let Some(record) = &local {
            if record.status.is_terminal() {
                info!(external_id, status = record.status.as_ref(), "payment already processed");
                return Ok(WebhookOutcome::AlreadyProcessed(record.status));
            }
        }

        let retrieved = match self.provider.retrieve_payment_intent(external_id).await {
            Ok(pi) if pi.is_succeeded() => Ok(pi),
            Ok(pi) => Err(format!("provider reports status {}", pi.status)),
            Err(e) => Err(format!("payment retrieval failed: {}", e)),
        };

        let Some(record) = local else {
            return self.record_unmatched(external_id, retrieved).await;
        };

        let intent = match retrieved {
            Ok(pi) => pi,
            Err(note) => {
                return self
                    .classify(&record, PaymentIntentStatus::PiRetrieveFailedManualReview, note)
                    .await;
            }
        };

        let cart = match record.cart_id {
            Some(cart_id) => Cart::find_by_id(cart_id).one(db).await?,
            None => None,
        };
        let Some(cart) = cart else {
            return self
                .classify(
                    &record,
                    PaymentIntentStatus::CartMissingManualReview,
                    format!("cart {:?} no longer exists", record.cart_id),
                )
                .await;
        };

        let line_count = CartLineItem::find()
            .filter(cart_line_item::Column::CartId.eq(cart.id))
            .count(db)
            .await?;
        if line_count == 0 {
            return self
                .classify(
                    &record,
                    PaymentIntentStatus::CartEmptyManualReview,
                    format!("cart {} has no line items", cart.id),
                )
                .await;
        }

        let txn = db.begin().await?;
        match copy_cart_to_booking(&txn, &record, &cart, &intent).await {
            Ok(booking_id) => {
                txn.commit().await?;
                record_transaction(true);
                info!(external_id, %booking_id, cart_id = %cart.id, "Booking materialized");
                Ok(WebhookOutcome::Completed { booking_id })
            }
            Err(CopyError::AlreadyClaimed) => {
                txn.rollback().await?;
                record_transaction(false);
                info!(external_id, "payment claimed by a concurrent delivery");
                Ok(WebhookOutcome::Duplicate)
            }
            Err(CopyError::Failed(e)) => {
                txn.rollback().await?;
                record_transaction(false);
                error!(external_id, cart_id = %cart.id, "booking copy rolled back: {}", e);
                self.handle_processing_error(&record, e).await
            }
        }
    }

    /// Refunds or parks a payment whose booking transaction failed.
    async fn handle_processing_error(
        &self,
        record: &PaymentIntentModel,
        cause: ServiceError,
    ) -> Result<WebhookOutcome, ServiceError> {
        let detail = cause.to_string();
        if !self.auto_refund {
            return self
                .classify(record, PaymentIntentStatus::ProcessingErrorManualReview, detail)
                .await;
        }

        match self.provider.refund_payment_intent(&record.external_id).await {
            Ok(refund) => {
                let note = format!("{}; refunded as {}", detail, refund.id);
                let status = PaymentIntentStatus::RefundedDueToProcessingError;
                if transition(self.db.as_ref(), record, status, &note).await? {
                    warn!(external_id = %record.external_id, refund_id = %refund.id, "payment refunded after processing error");
                    Ok(WebhookOutcome::Refunded { refund_id: refund.id })
                } else {
                    self.current_outcome(record).await
                }
            }
            Err(e) => {
                self.classify(
                    record,
                    PaymentIntentStatus::RefundFailedManualReview,
                    format!("{}; refund failed: {}", detail, e),
                )
                .await
            }
        }
    }

    /// Moves a pending record into a manual-review state and queues the operator event.
    async fn classify(
        &self,
        record: &PaymentIntentModel,
        status: PaymentIntentStatus,
        note: String,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        if !transition(&txn, record, status, &note).await? {
            txn.rollback().await?;
            return self.current_outcome(record).await;
        }
        enqueue_review(&txn, Some(record.id), &record.external_id, status, &note).await?;
        txn.commit().await?;

        warn!(
            external_id = %record.external_id,
            status = status.as_ref(),
            note = %note,
            "payment parked for manual review"
        );
        Ok(WebhookOutcome::ManualReview(status))
    }

    /// Writes an audit row for a webhook with no local payment record.
    async fn record_unmatched(
        &self,
        external_id: &str,
        retrieved: Result<ProviderPaymentIntent, String>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let (status, amount, currency, note) = match retrieved {
            Ok(pi) => (
                PaymentIntentStatus::UnmatchedManualReview,
                pi.amount,
                pi.currency,
                "no local payment record for this payment".to_string(),
            ),
            Err(note) => (
                PaymentIntentStatus::PiRetrieveFailedManualReview,
                0,
                String::new(),
                format!("no local payment record; {}", note),
            ),
        };

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let row = payment_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            external_id: Set(external_id.to_string()),
            cart_id: Set(None),
            user_id: Set(None),
            amount: Set(amount),
            currency: Set(currency),
            status: Set(status),
            receipt_reference: Set(None),
            note: Set(Some(note.clone())),
            metadata: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        enqueue_review(&txn, Some(row.id), external_id, status, &note).await?;
        txn.commit().await?;

        warn!(external_id, status = status.as_ref(), "webhook for unknown payment recorded for review");
        Ok(WebhookOutcome::ManualReview(status))
    }

    /// Outcome for a record another delivery moved out of `pending` under us.
    async fn current_outcome(&self, record: &PaymentIntentModel) -> Result<WebhookOutcome, ServiceError> {
        let status = PaymentIntent::find_by_id(record.id)
            .one(self.db.as_ref())
            .await?
            .map(|r| r.status)
            .unwrap_or(record.status);
        info!(external_id = %record.external_id, status = status.as_ref(), "payment resolved concurrently");
        Ok(WebhookOutcome::AlreadyProcessed(status))
    }
}

/// Conditional `pending -> status` update. Returns false if the record had
/// already left `pending`.
async fn transition(
    conn: &impl ConnectionTrait,
    record: &PaymentIntentModel,
    status: PaymentIntentStatus,
    note: &str,
) -> Result<bool, ServiceError> {
    let result = PaymentIntent::update_many()
        .set(payment_intent::ActiveModel {
            status: Set(status),
            note: Set(Some(note.to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(payment_intent::Column::Id.eq(record.id))
        .filter(payment_intent::Column::Status.eq(PaymentIntentStatus::Pending))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

async fn enqueue_review(
    conn: &impl ConnectionTrait,
    payment_id: Option<Uuid>,
    external_id: &str,
    status: PaymentIntentStatus,
    note: &str,
) -> Result<(), ServiceError> {
    outbox::enqueue(
        conn,
        "payment",
        payment_id,
        outbox::PAYMENT_NEEDS_REVIEW,
        &json!({
            "external_payment_id": external_id,
            "status": status.as_ref(),
            "note": note,
        }),
    )
    .await?;
    Ok(())
}

/// The atomic copy. Every write goes through `txn`; any error leaves nothing behind.
async fn copy_cart_to_booking(
    txn: &DatabaseTransaction,
    record: &PaymentIntentModel,
    cart: &CartModel,
    intent: &ProviderPaymentIntent,
) -> Result<Uuid, CopyError> {
    let now = Utc::now();

    let claimed = PaymentIntent::update_many()
        .set(payment_intent::ActiveModel {
            status: Set(PaymentIntentStatus::Completed),
            receipt_reference: Set(intent.receipt_reference.clone()),
            note: Set(None),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(payment_intent::Column::Id.eq(record.id))
        .filter(payment_intent::Column::Status.eq(PaymentIntentStatus::Pending))
        .exec(txn)
        .await?;
    if claimed.rows_affected == 0 {
        return Err(CopyError::AlreadyClaimed);
    }

    let (Some(booking_date), Some(booking_time)) = (cart.booking_date, cart.booking_time) else {
        return Err(ServiceError::MissingSchedule.into());
    };

    let booking = booking::ActiveModel {
        id: Set(Uuid::new_v4()),
        payment_intent_id: Set(record.id),
        user_id: Set(cart.user_id),
        service_id: Set(cart.service_id),
        service_variant_id: Set(cart.service_variant_id),
        vendor_id: Set(cart.vendor_id),
        booking_date: Set(booking_date),
        booking_time: Set(booking_time),
        notes: Set(cart.notes.clone()),
        media_url: Set(cart.media_url.clone()),
        promo_id: Set(cart.promo_id),
        payment_status: Set(BookingPaymentStatus::Pending),
        booking_status: Set(BookingStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await?;

    copy_line_items(txn, cart.id, booking.id, now).await?;

    let totals = CartTotals::find_by_id(cart.id)
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError(format!("cart {} has no totals snapshot", cart.id))
        })?;
    match to_minor_units(totals.final_total) {
        Ok(cents) if cents == intent.amount => {}
        Ok(cents) => warn!(
            external_id = %record.external_id,
            snapshot_cents = cents,
            charged_cents = intent.amount,
            "booking totals differ from the charged amount"
        ),
        Err(e) => warn!(external_id = %record.external_id, "snapshot total unusable: {}", e),
    }
    booking_totals::ActiveModel {
        booking_id: Set(booking.id),
        subtotal: Set(totals.subtotal),
        promo_discount: Set(totals.promo_discount),
        discounted_total: Set(totals.discounted_total),
        tax_name: Set(totals.tax_name.clone()),
        tax_percentage: Set(totals.tax_percentage),
        tax_amount: Set(totals.tax_amount),
        final_total: Set(totals.final_total),
        promo_code: Set(totals.promo_code.clone()),
        calculated_at: Set(totals.calculated_at),
    }
    .insert(txn)
    .await?;

    // Only a promo the snapshot actually applied consumes a use.
    if let Some(promo_id) = totals.promo_id {
        let promo = PromoResolver::resolve_with(txn, promo_id, cart.user_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("promo {} no longer exists", promo_id))
            })?;
        increment_usage(txn, &promo, cart.user_id).await?;
    }

    let mut confirmed: booking::ActiveModel = booking.into();
    confirmed.payment_status = Set(BookingPaymentStatus::Completed);
    confirmed.booking_status = Set(BookingStatus::Confirmed);
    let booking = confirmed.update(txn).await?;

    if !delete_cart_rows(txn, cart.id).await? {
        return Err(ServiceError::Conflict(format!("cart {} was deleted concurrently", cart.id)).into());
    }

    outbox::enqueue(
        txn,
        "booking",
        Some(booking.id),
        outbox::BOOKING_CONFIRMED,
        &json!({
            "booking_id": booking.id,
            "user_id": booking.user_id,
            "payment_intent_id": record.id,
            "external_payment_id": record.external_id,
            "receipt_reference": intent.receipt_reference,
        }),
    )
    .await?;

    Ok(booking.id)
}

/// Copies line items and their options, preserving prices and quantities as stored.
async fn copy_line_items(
    txn: &DatabaseTransaction,
    cart_id: Uuid,
    booking_id: Uuid,
    now: chrono::DateTime<Utc>,
) -> Result<(), ServiceError> {
    let items = CartLineItem::find()
        .filter(cart_line_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_line_item::Column::CreatedAt)
        .all(txn)
        .await?;

    let mut line_map = HashMap::with_capacity(items.len());
    for item in items {
        let copied = booking_line_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            booking_id: Set(booking_id),
            catalog_item_id: Set(item.catalog_item_id),
            name: Set(item.name),
            unit_price: Set(item.unit_price),
            quantity: Set(item.quantity),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;
        line_map.insert(item.id, copied.id);
    }

    let target = |line_item_id: Uuid| {
        line_map.get(&line_item_id).copied().ok_or_else(|| {
            ServiceError::InternalError(format!("option references unknown line {}", line_item_id))
        })
    };

    for addon in CartAddon::find()
        .filter(cart_addon::Column::CartId.eq(cart_id))
        .all(txn)
        .await?
    {
        booking_addon::ActiveModel {
            id: Set(Uuid::new_v4()),
            booking_id: Set(booking_id),
            booking_line_item_id: Set(target(addon.line_item_id)?),
            name: Set(addon.name),
            price: Set(addon.price),
            total_price: Set(addon.total_price),
        }
        .insert(txn)
        .await?;
    }

    for pref in CartPreference::find()
        .filter(cart_preference::Column::CartId.eq(cart_id))
        .all(txn)
        .await?
    {
        booking_preference::ActiveModel {
            id: Set(Uuid::new_v4()),
            booking_id: Set(booking_id),
            booking_line_item_id: Set(target(pref.line_item_id)?),
            name: Set(pref.name),
            value: Set(pref.value),
            price: Set(pref.price),
            total_price: Set(pref.total_price),
        }
        .insert(txn)
        .await?;
    }

    for consent in CartConsent::find()
        .filter(cart_consent::Column::CartId.eq(cart_id))
        .all(txn)
        .await?
    {
        booking_consent::ActiveModel {
            id: Set(Uuid::new_v4()),
            booking_id: Set(booking_id),
            booking_line_item_id: Set(target(consent.line_item_id)?),
            name: Set(consent.name),
            accepted: Set(consent.accepted),
            price: Set(consent.price),
            total_price: Set(consent.total_price),
        }
        .insert(txn)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{MockPaymentProvider, ProviderError};

    #[test]
    fn parses_provider_event() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_42", "amount": 9450 } }
        }))
        .unwrap();
        assert_eq!(event.event_type, PAYMENT_SUCCEEDED_EVENT);
        assert_eq!(event.data.object.id, "pi_42");
    }

    #[tokio::test]
    async fn other_event_types_are_ignored_without_io() {
        let db = crate::db::establish_connection_with_config(&crate::db::DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        let mut provider = MockPaymentProvider::new();
        provider.expect_retrieve_payment_intent().never();
        let materializer = BookingMaterializer::new(Arc::new(db), Arc::new(provider), false);

        let event: WebhookEvent = serde_json::from_value(json!({
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1" } }
        }))
        .unwrap();
        assert_eq!(
            materializer.handle_event(event).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn unknown_payment_is_recorded_for_review() {
        let db = crate::db::establish_connection_with_config(&crate::db::DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        crate::db::run_migrations(&db).await.unwrap();
        let db = Arc::new(db);

        let mut provider = MockPaymentProvider::new();
        provider
            .expect_retrieve_payment_intent()
            .times(1)
            .returning(|_| Err(ProviderError::NotConfigured));
        let materializer = BookingMaterializer::new(db.clone(), Arc::new(provider), false);

        let outcome = materializer.materialize("pi_ghost").await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::ManualReview(PaymentIntentStatus::PiRetrieveFailedManualReview)
        );

        let row = PaymentIntent::find()
            .filter(payment_intent::Column::ExternalId.eq("pi_ghost"))
            .one(db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.cart_id, None);
        assert!(row.note.unwrap().contains("no local payment record"));

        // The audit row is terminal, so a redelivery costs no provider call.
        assert_eq!(
            materializer.materialize("pi_ghost").await.unwrap(),
            WebhookOutcome::AlreadyProcessed(PaymentIntentStatus::PiRetrieveFailedManualReview)
        );
    }
}
