use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user usage counter for a system promo template
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_promo_usages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub system_promo_id: Uuid,
    pub user_id: Uuid,
    pub used_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::system_promo::Entity",
        from = "Column::SystemPromoId",
        to = "super::system_promo::Column::Id"
    )]
    SystemPromo,
}

impl Related<super::system_promo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SystemPromo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
