use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Shopping cart, one per (user, service, service variant)
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_id: Uuid,
    pub service_variant_id: Uuid,
    #[sea_orm(nullable)]
    pub vendor_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub booking_date: Option<NaiveDate>,
    #[sea_orm(nullable)]
    pub booking_time: Option<NaiveTime>,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    #[sea_orm(nullable)]
    pub media_url: Option<String>,
    #[sea_orm(nullable)]
    pub promo_id: Option<Uuid>,
    pub status: CartStatus,
    pub created_at: DateTime<Utc>,
    /// Bumped by every cart mutation; totals older than this are stale.
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_line_item::Entity")]
    LineItems,
    #[sea_orm(has_one = "super::cart_totals::Entity")]
    Totals,
}

impl Related<super::cart_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LineItems.def()
    }
}

impl Related<super::cart_totals::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Totals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn has_schedule(&self) -> bool {
        self.booking_date.is_some() && self.booking_time.is_some()
    }
}

/// Cart status enumeration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[sea_orm(string_value = "active")]
    Active,
    /// A payment intent has been issued for the current totals
    #[sea_orm(string_value = "checkout")]
    Checkout,
}
