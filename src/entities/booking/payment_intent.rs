use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Local record of one external payment attempt; idempotency key for booking creation
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub external_id: String,
    /// Null only for audit rows written for unmatched webhooks
    #[sea_orm(nullable)]
    pub cart_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: PaymentIntentStatus,
    #[sea_orm(nullable)]
    pub receipt_reference: Option<String>,
    /// Diagnostic note for manual-review states
    #[sea_orm(nullable)]
    pub note: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::booking::Entity")]
    Booking,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(48))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentIntentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "refunded_due_to_processing_error")]
    RefundedDueToProcessingError,
    #[sea_orm(string_value = "pi_retrieve_failed_manual_review")]
    PiRetrieveFailedManualReview,
    #[sea_orm(string_value = "cart_missing_manual_review")]
    CartMissingManualReview,
    #[sea_orm(string_value = "cart_empty_manual_review")]
    CartEmptyManualReview,
    #[sea_orm(string_value = "processing_error_manual_review")]
    ProcessingErrorManualReview,
    #[sea_orm(string_value = "refund_failed_manual_review")]
    RefundFailedManualReview,
    /// Webhook arrived with no matching local attempt
    #[sea_orm(string_value = "unmatched_manual_review")]
    UnmatchedManualReview,
}

impl PaymentIntentStatus {
    pub fn is_refunded(self) -> bool {
        matches!(self, Self::RefundedDueToProcessingError)
    }

    pub fn requires_manual_review(self) -> bool {
        matches!(
            self,
            Self::PiRetrieveFailedManualReview
                | Self::CartMissingManualReview
                | Self::CartEmptyManualReview
                | Self::ProcessingErrorManualReview
                | Self::RefundFailedManualReview
                | Self::UnmatchedManualReview
        )
    }

    /// Every state except `pending` is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn only_pending_is_open() {
        for status in PaymentIntentStatus::iter() {
            assert_eq!(status.is_terminal(), status != PaymentIntentStatus::Pending);
        }
    }

    #[test]
    fn terminal_states_partition() {
        for status in PaymentIntentStatus::iter().filter(|s| s.is_terminal()) {
            let buckets = [
                status == PaymentIntentStatus::Completed,
                status.is_refunded(),
                status.requires_manual_review(),
            ];
            assert_eq!(buckets.iter().filter(|b| **b).count(), 1, "{:?}", status);
        }
    }

    #[test]
    fn string_form_matches_column_value() {
        assert_eq!(
            PaymentIntentStatus::RefundFailedManualReview.as_ref(),
            "refund_failed_manual_review"
        );
        assert_eq!(
            PaymentIntentStatus::CartEmptyManualReview.to_value(),
            "cart_empty_manual_review"
        );
    }
}
