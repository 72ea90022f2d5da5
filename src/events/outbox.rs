use crate::entities::outbox_event::{self, OutboxStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const BOOKING_CONFIRMED: &str = "BookingConfirmed";
pub const PAYMENT_NEEDS_REVIEW: &str = "PaymentNeedsReview";

const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: i64 = 2;
/// A `processing` row untouched for this long is assumed abandoned and claimed again.
pub const PROCESSING_LEASE_SECS: i64 = 60;

/// Enqueue a domain event into the outbox table. Pass the open transaction so
/// the event commits or rolls back with the write it describes.
pub async fn enqueue(
    db: &impl ConnectionTrait,
    aggregate_type: &str,
    aggregate_id: Option<Uuid>,
    event_type: &str,
    payload: &Value,
) -> Result<Uuid, ServiceError> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    outbox_event::ActiveModel {
        id: Set(id),
        aggregate_type: Set(aggregate_type.to_string()),
        aggregate_id: Set(aggregate_id),
        event_type: Set(event_type.to_string()),
        payload: Set(payload.clone()),
        status: Set(OutboxStatus::Pending),
        attempts: Set(0),
        available_at: Set(now),
        error_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        processed_at: Set(None),
    }
    .insert(db)
    .await?;

    debug!(
        "enqueued outbox event {} type={} agg={}",
        id, event_type, aggregate_type
    );
    Ok(id)
}

/// Background worker to poll and dispatch outbox events via the in-process EventSender.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    sender: EventSender,
    poll_interval: Duration,
    batch_size: u64,
) -> tokio::task::JoinHandle<()> {
    info!(?poll_interval, batch_size, "Starting outbox worker");
    tokio::spawn(async move {
        loop {
            if let Err(e) = drain_once(&db, &sender, batch_size).await {
                error!("outbox worker error: {}", e);
            }
            sleep(poll_interval).await;
        }
    })
}

/// Claims up to `batch_size` due events, dispatches them and records the outcome.
/// Returns the number of events delivered.
///
/// Rows left in `processing` past [`PROCESSING_LEASE_SECS`] (worker died after
/// claiming, or the outcome update failed) are claimed again, so delivery is
/// at-least-once.
pub async fn drain_once(
    db: &DatabaseConnection,
    sender: &EventSender,
    batch_size: u64,
) -> Result<usize, ServiceError> {
    let now = Utc::now();
    let txn = db.begin().await?;
    let lease_expired = now - ChronoDuration::seconds(PROCESSING_LEASE_SECS);
    let claimed = outbox_event::Entity::find()
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(outbox_event::Column::Status.eq(OutboxStatus::Pending))
                        .add(outbox_event::Column::AvailableAt.lte(now)),
                )
                .add(
                    Condition::all()
                        .add(outbox_event::Column::Status.eq(OutboxStatus::Processing))
                        .add(outbox_event::Column::UpdatedAt.lte(lease_expired)),
                ),
        )
        .order_by_asc(outbox_event::Column::CreatedAt)
        .limit(batch_size)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
        .all(&txn)
        .await?;

    let mut rows = Vec::with_capacity(claimed.len());
    for row in claimed {
        if row.status == OutboxStatus::Processing {
            warn!(id = %row.id, attempts = row.attempts, "reclaiming outbox event with expired lease");
        }
        let attempts = row.attempts + 1;
        let mut active: outbox_event::ActiveModel = row.into();
        active.status = Set(OutboxStatus::Processing);
        active.attempts = Set(attempts);
        active.updated_at = Set(now);
        rows.push(active.update(&txn).await?);
    }
    txn.commit().await?;

    let mut delivered = 0;
    for row in rows {
        let event = map_to_event(&row.event_type, &row.payload)
            .unwrap_or_else(|| Event::with_data(row.event_type.clone()));
        let attempts = row.attempts;
        let id = row.id;
        let mut active: outbox_event::ActiveModel = row.into();
        let now = Utc::now();
        active.updated_at = Set(now);

        match sender.send(event).await {
            Ok(()) => {
                active.status = Set(OutboxStatus::Delivered);
                active.processed_at = Set(Some(now));
                active.error_message = Set(None);
                delivered += 1;
                counter!("servicebook.outbox.delivered", 1);
            }
            Err(e) if attempts < MAX_ATTEMPTS => {
                let backoff = BASE_BACKOFF_SECS.saturating_pow(attempts as u32);
                let jitter_ms = now.timestamp_subsec_millis() as i64;
                active.status = Set(OutboxStatus::Pending);
                active.available_at = Set(now
                    + ChronoDuration::seconds(backoff)
                    + ChronoDuration::milliseconds(jitter_ms));
                active.error_message = Set(Some(e));
            }
            Err(e) => {
                active.status = Set(OutboxStatus::Failed);
                active.error_message = Set(Some(format!("max attempts exceeded: {}", e)));
            }
        }

        if let Err(e) = active.update(db).await {
            warn!("failed updating outbox {}, retried after lease: {}", id, e);
        }
    }
    Ok(delivered)
}

fn uuid_field(payload: &Value, key: &str) -> Option<Uuid> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn map_to_event(event_type: &str, payload: &Value) -> Option<Event> {
    match event_type {
        BOOKING_CONFIRMED => Some(Event::BookingConfirmed {
            booking_id: uuid_field(payload, "booking_id")?,
            user_id: uuid_field(payload, "user_id")?,
            payment_intent_id: uuid_field(payload, "payment_intent_id")?,
            external_payment_id: string_field(payload, "external_payment_id")?,
            receipt_reference: string_field(payload, "receipt_reference"),
        }),
        PAYMENT_NEEDS_REVIEW => Some(Event::PaymentNeedsReview {
            external_payment_id: string_field(payload, "external_payment_id")?,
            status: string_field(payload, "status")?,
            note: string_field(payload, "note"),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    async fn setup() -> DatabaseConnection {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        db
    }

    #[test]
    fn maps_booking_confirmed_event() {
        let booking_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let payment_intent_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "booking_id": booking_id.to_string(),
            "user_id": user_id.to_string(),
            "payment_intent_id": payment_intent_id.to_string(),
            "external_payment_id": "pi_123",
            "receipt_reference": "ch_9",
        });

        let event = map_to_event(BOOKING_CONFIRMED, &payload).unwrap();
        assert_eq!(
            event,
            Event::BookingConfirmed {
                booking_id,
                user_id,
                payment_intent_id,
                external_payment_id: "pi_123".into(),
                receipt_reference: Some("ch_9".into()),
            }
        );
    }

    #[test]
    fn incomplete_payload_is_not_mapped() {
        let payload = serde_json::json!({ "booking_id": "not-a-uuid" });
        assert!(map_to_event(BOOKING_CONFIRMED, &payload).is_none());
        assert!(map_to_event("Unknown", &payload).is_none());
    }

    #[tokio::test]
    async fn drain_delivers_pending_events_once() {
        let db = setup().await;
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let payload = serde_json::json!({
            "external_payment_id": "pi_1",
            "status": "cart_missing_manual_review",
        });
        let id = enqueue(&db, "payment", None, PAYMENT_NEEDS_REVIEW, &payload)
            .await
            .unwrap();

        assert_eq!(drain_once(&db, &sender, 10).await.unwrap(), 1);
        assert_matches!(rx.recv().await, Some(Event::PaymentNeedsReview { .. }));

        let row = outbox_event::Entity::find_by_id(id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, OutboxStatus::Delivered);
        assert_eq!(row.attempts, 1);
        assert!(row.processed_at.is_some());

        assert_eq!(drain_once(&db, &sender, 10).await.unwrap(), 0);
    }

    async fn force_processing(db: &DatabaseConnection, id: Uuid, age_secs: i64) {
        let row = outbox_event::Entity::find_by_id(id)
            .one(db)
            .await
            .unwrap()
            .unwrap();
        let mut active: outbox_event::ActiveModel = row.into();
        active.status = Set(OutboxStatus::Processing);
        active.attempts = Set(1);
        active.updated_at = Set(Utc::now() - ChronoDuration::seconds(age_secs));
        active.update(db).await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_claim_is_delivered_after_lease() {
        let db = setup().await;
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let payload = serde_json::json!({
            "external_payment_id": "pi_7",
            "status": "processing_error_manual_review",
        });
        let id = enqueue(&db, "payment", None, PAYMENT_NEEDS_REVIEW, &payload)
            .await
            .unwrap();

        // Claimed moments ago by a worker that may still be running.
        force_processing(&db, id, 5).await;
        assert_eq!(drain_once(&db, &sender, 10).await.unwrap(), 0);

        // Claimed by a worker that never came back.
        force_processing(&db, id, PROCESSING_LEASE_SECS + 30).await;
        assert_eq!(drain_once(&db, &sender, 10).await.unwrap(), 1);
        assert_matches!(rx.recv().await, Some(Event::PaymentNeedsReview { .. }));

        let row = outbox_event::Entity::find_by_id(id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, OutboxStatus::Delivered);
        assert_eq!(row.attempts, 2);
    }

    #[tokio::test]
    async fn failed_dispatch_is_rescheduled_with_backoff() {
        let db = setup().await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let id = enqueue(&db, "booking", None, "Custom", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(drain_once(&db, &sender, 10).await.unwrap(), 0);

        let row = outbox_event::Entity::find_by_id(id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert!(row.available_at > Utc::now());
        assert!(row.error_message.is_some());
    }
}
