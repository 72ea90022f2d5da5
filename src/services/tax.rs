use crate::{
    entities::commerce::{tax_config, TaxConfig},
    errors::ServiceError,
};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// Tax applied to a discounted cart total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TaxRate {
    pub name: String,
    pub percentage: Decimal,
}

impl TaxRate {
    /// Anonymous zero-rate tax used when no configuration is active.
    pub fn zero() -> Self {
        Self {
            name: String::new(),
            percentage: Decimal::ZERO,
        }
    }

    /// Tax owed on `amount`, rounded half away from zero to cents.
    pub fn apply(&self, amount: Decimal) -> Decimal {
        (amount * self.percentage / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Reads the active tax configuration
#[derive(Clone)]
pub struct TaxResolver {
    db: Arc<DatabaseConnection>,
}

impl TaxResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<TaxRate, ServiceError> {
        Self::resolve_with(self.db.as_ref()).await
    }

    /// Newest active row wins if several are flagged active.
    pub async fn resolve_with(conn: &impl ConnectionTrait) -> Result<TaxRate, ServiceError> {
        let active = TaxConfig::find()
            .filter(tax_config::Column::IsActive.eq(true))
            .order_by_desc(tax_config::Column::CreatedAt)
            .one(conn)
            .await?;

        Ok(match active {
            Some(row) => TaxRate {
                name: row.name,
                percentage: row.percentage,
            },
            None => {
                debug!("no active tax configuration, applying zero rate");
                TaxRate::zero()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Set};
    use uuid::Uuid;

    async fn setup() -> Arc<DatabaseConnection> {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        Arc::new(db)
    }

    async fn insert_tax(db: &DatabaseConnection, name: &str, pct: Decimal, active: bool, age: i64) {
        tax_config::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            percentage: Set(pct),
            is_active: Set(active),
            created_at: Set(Utc::now() - Duration::minutes(age)),
        }
        .insert(db)
        .await
        .unwrap();
    }

    #[test]
    fn apply_rounds_to_cents() {
        let rate = TaxRate {
            name: "VAT".into(),
            percentage: dec!(7.5),
        };
        assert_eq!(rate.apply(dec!(10.10)), dec!(0.76));
        assert_eq!(rate.apply(dec!(90.00)), dec!(6.75));
        assert_eq!(TaxRate::zero().apply(dec!(123.45)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn defaults_to_zero_rate_without_active_row() {
        let db = setup().await;
        insert_tax(&db, "Old", dec!(20), false, 0).await;

        let rate = TaxResolver::new(db).resolve().await.unwrap();
        assert_eq!(rate, TaxRate::zero());
    }

    #[tokio::test]
    async fn newest_active_row_wins() {
        let db = setup().await;
        insert_tax(&db, "GST", dec!(5), true, 10).await;
        insert_tax(&db, "VAT", dec!(8.25), true, 1).await;

        let rate = TaxResolver::new(db).resolve().await.unwrap();
        assert_eq!(rate.name, "VAT");
        assert_eq!(rate.percentage, dec!(8.25));
    }
}
