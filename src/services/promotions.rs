use crate::{
    entities::commerce::{
        admin_promo, system_promo_usage, AdminPromo, AdminPromoModel, DiscountType, SystemPromo,
        SystemPromoModel, SystemPromoUsage, SystemPromoUsageModel,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a promo reference produced no discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromoRejection {
    #[error("promo is outside its validity window")]
    Expired,
    #[error("promo usage limit reached")]
    UsageExhausted,
    #[error("cart subtotal is below the promo minimum spend")]
    BelowMinimumSpend,
    #[error("promo is not active")]
    Inactive,
    #[error("promo not found")]
    NotFound,
}

impl PromoRejection {
    pub fn code(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::UsageExhausted => "usage_exhausted",
            Self::BelowMinimumSpend => "below_minimum_spend",
            Self::Inactive => "inactive",
            Self::NotFound => "not_found",
        }
    }
}

/// A promo reference resolved to exactly one of its two sources.
#[derive(Debug, Clone, PartialEq)]
pub enum Promo {
    /// Staff-assigned code owned by a single user
    Admin(AdminPromoModel),
    /// Shared template plus this user's usage row, if any
    System {
        template: SystemPromoModel,
        usage: Option<SystemPromoUsageModel>,
    },
}

impl Promo {
    pub fn id(&self) -> Uuid {
        match self {
            Promo::Admin(p) => p.id,
            Promo::System { template, .. } => template.id,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Promo::Admin(p) => &p.code,
            Promo::System { template, .. } => &template.code,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Promo::Admin(_) => "admin",
            Promo::System { .. } => "system",
        }
    }

    fn terms(&self) -> (DiscountType, Decimal, Decimal) {
        match self {
            Promo::Admin(p) => (p.discount_type, p.discount_value, p.min_spend),
            Promo::System { template, .. } => (
                template.discount_type,
                template.discount_value,
                template.min_spend,
            ),
        }
    }

    /// Checks eligibility in a fixed order: window or activity, usage, minimum spend.
    pub fn check(&self, subtotal: Decimal, now: DateTime<Utc>) -> Result<(), PromoRejection> {
        match self {
            Promo::Admin(p) => {
                if now < p.start_date || now > p.end_date {
                    return Err(PromoRejection::Expired);
                }
                if p.used_count >= p.max_use {
                    return Err(PromoRejection::UsageExhausted);
                }
            }
            Promo::System { template, usage } => {
                if !template.is_active {
                    return Err(PromoRejection::Inactive);
                }
                let used = usage.as_ref().map(|u| u.used_count).unwrap_or(0);
                if used >= template.max_use_per_user {
                    return Err(PromoRejection::UsageExhausted);
                }
            }
        }

        let (_, _, min_spend) = self.terms();
        if subtotal < min_spend {
            return Err(PromoRejection::BelowMinimumSpend);
        }
        Ok(())
    }

    /// Discount for `subtotal` if the promo is eligible, otherwise the rejection.
    pub fn evaluate(&self, subtotal: Decimal, now: DateTime<Utc>) -> Result<Decimal, PromoRejection> {
        self.check(subtotal, now)?;
        let (discount_type, value, _) = self.terms();
        Ok(compute_discount(discount_type, value, subtotal))
    }
}

/// Discount amount in `[0, subtotal]`, rounded half away from zero to cents.
pub fn compute_discount(discount_type: DiscountType, value: Decimal, subtotal: Decimal) -> Decimal {
    if subtotal <= Decimal::ZERO || value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match discount_type {
        DiscountType::Fixed => value,
        DiscountType::Percentage => subtotal * value / Decimal::ONE_HUNDRED,
    };
    raw.min(subtotal)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .min(subtotal)
}

/// Result of evaluating a cart's promo reference
#[derive(Debug, Clone, PartialEq)]
pub enum PromoOutcome {
    NoPromo,
    Applied { promo: Promo, discount: Decimal },
    Rejected { promo_id: Uuid, reason: PromoRejection },
}

impl PromoOutcome {
    pub fn discount(&self) -> Decimal {
        match self {
            PromoOutcome::Applied { discount, .. } => *discount,
            _ => Decimal::ZERO,
        }
    }

    pub fn applied(&self) -> Option<&Promo> {
        match self {
            PromoOutcome::Applied { promo, .. } => Some(promo),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<PromoRejection> {
        match self {
            PromoOutcome::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Resolves and prices promo references. Never mutates usage counters;
/// see [`increment_usage`] for the booking-time side.
#[derive(Clone)]
pub struct PromoResolver {
    db: Arc<DatabaseConnection>,
}

impl PromoResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves `promo_id` for `user_id`: an admin promo owned by the user wins,
    /// otherwise a system template. `None` when neither source has it.
    #[instrument(skip(self))]
    pub async fn resolve(&self, promo_id: Uuid, user_id: Uuid) -> Result<Option<Promo>, ServiceError> {
        Self::resolve_with(self.db.as_ref(), promo_id, user_id).await
    }

    pub async fn resolve_with(
        conn: &impl ConnectionTrait,
        promo_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Promo>, ServiceError> {
        let admin = AdminPromo::find_by_id(promo_id)
            .filter(admin_promo::Column::UserId.eq(user_id))
            .one(conn)
            .await?;
        if let Some(promo) = admin {
            return Ok(Some(Promo::Admin(promo)));
        }

        let Some(template) = SystemPromo::find_by_id(promo_id).one(conn).await? else {
            return Ok(None);
        };
        let usage = SystemPromoUsage::find()
            .filter(system_promo_usage::Column::SystemPromoId.eq(template.id))
            .filter(system_promo_usage::Column::UserId.eq(user_id))
            .one(conn)
            .await?;
        Ok(Some(Promo::System { template, usage }))
    }

    /// Prices an optional promo reference against `subtotal`.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        promo_id: Option<Uuid>,
        user_id: Uuid,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PromoOutcome, ServiceError> {
        let Some(promo_id) = promo_id else {
            return Ok(PromoOutcome::NoPromo);
        };

        let Some(promo) = self.resolve(promo_id, user_id).await? else {
            debug!(%promo_id, "promo reference resolves to no promo");
            return Ok(PromoOutcome::Rejected {
                promo_id,
                reason: PromoRejection::NotFound,
            });
        };

        match promo.evaluate(subtotal, now) {
            Ok(discount) => Ok(PromoOutcome::Applied { promo, discount }),
            Err(reason) => {
                debug!(%promo_id, reason = reason.code(), "promo rejected");
                Ok(PromoOutcome::Rejected { promo_id, reason })
            }
        }
    }
}

/// Consumes one use of `promo` for `user_id`. The update only applies while the
/// counter is below its cap, so concurrent bookings can never push it past the
/// limit; a lost race surfaces as `Conflict` and fails the caller's transaction.
pub async fn increment_usage(
    conn: &impl ConnectionTrait,
    promo: &Promo,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    match promo {
        Promo::Admin(p) => {
            let result = AdminPromo::update_many()
                .col_expr(
                    admin_promo::Column::UsedCount,
                    Expr::col(admin_promo::Column::UsedCount).add(1),
                )
                .filter(admin_promo::Column::Id.eq(p.id))
                .filter(
                    Expr::col(admin_promo::Column::UsedCount)
                        .lt(Expr::col(admin_promo::Column::MaxUse)),
                )
                .exec(conn)
                .await?;
            if result.rows_affected == 0 {
                warn!(promo_id = %p.id, "admin promo usage cap reached");
                return Err(ServiceError::Conflict(format!(
                    "Promo {} has no remaining uses",
                    p.code
                )));
            }
        }
        Promo::System { template, .. } => {
            let existing = SystemPromoUsage::find()
                .filter(system_promo_usage::Column::SystemPromoId.eq(template.id))
                .filter(system_promo_usage::Column::UserId.eq(user_id))
                .one(conn)
                .await?;

            match existing {
                Some(usage) => {
                    let result = SystemPromoUsage::update_many()
                        .col_expr(
                            system_promo_usage::Column::UsedCount,
                            Expr::col(system_promo_usage::Column::UsedCount).add(1),
                        )
                        .col_expr(system_promo_usage::Column::UpdatedAt, Expr::value(now))
                        .filter(system_promo_usage::Column::Id.eq(usage.id))
                        .filter(system_promo_usage::Column::UsedCount.lt(template.max_use_per_user))
                        .exec(conn)
                        .await?;
                    if result.rows_affected == 0 {
                        warn!(promo_id = %template.id, %user_id, "system promo usage cap reached");
                        return Err(ServiceError::Conflict(format!(
                            "Promo {} has no remaining uses",
                            template.code
                        )));
                    }
                }
                None if template.max_use_per_user > 0 => {
                    // The unique (promo, user) index rejects a concurrent first use.
                    system_promo_usage::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        system_promo_id: Set(template.id),
                        user_id: Set(user_id),
                        used_count: Set(1),
                        updated_at: Set(now),
                    }
                    .insert(conn)
                    .await?;
                }
                None => {
                    return Err(ServiceError::Conflict(format!(
                        "Promo {} has no remaining uses",
                        template.code
                    )));
                }
            }
        }
    }

    info!(promo_id = %promo.id(), source = promo.source(), "promo usage incremented");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::commerce::system_promo;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn admin(max_use: i32, used_count: i32, min_spend: Decimal) -> AdminPromoModel {
        let now = Utc::now();
        AdminPromoModel {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            code: "WELCOME10".into(),
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            min_spend,
            max_use,
            used_count,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            created_at: now,
        }
    }

    fn template(is_active: bool, max_use_per_user: i32) -> SystemPromoModel {
        SystemPromoModel {
            id: Uuid::new_v4(),
            code: "SPRING".into(),
            discount_type: DiscountType::Fixed,
            discount_value: dec!(15),
            min_spend: dec!(50),
            max_use_per_user,
            is_active,
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(DiscountType::Percentage, dec!(10), dec!(100.00), dec!(10.00))]
    #[case(DiscountType::Percentage, dec!(150), dec!(80.00), dec!(80.00))]
    #[case(DiscountType::Percentage, dec!(12.5), dec!(33.33), dec!(4.17))]
    #[case(DiscountType::Fixed, dec!(25), dec!(100.00), dec!(25))]
    #[case(DiscountType::Fixed, dec!(25), dec!(20.00), dec!(20.00))]
    #[case(DiscountType::Fixed, dec!(-5), dec!(20.00), dec!(0))]
    fn discount_never_exceeds_subtotal(
        #[case] kind: DiscountType,
        #[case] value: Decimal,
        #[case] subtotal: Decimal,
        #[case] expected: Decimal,
    ) {
        assert_eq!(compute_discount(kind, value, subtotal), expected);
    }

    #[test]
    fn rejection_reasons_are_specific() {
        let now = Utc::now();

        let mut expired = admin(5, 0, dec!(0));
        expired.end_date = now - Duration::hours(1);
        assert_eq!(
            Promo::Admin(expired).evaluate(dec!(100), now),
            Err(PromoRejection::Expired)
        );

        let exhausted = admin(1, 1, dec!(0));
        assert_eq!(
            Promo::Admin(exhausted).evaluate(dec!(100), now),
            Err(PromoRejection::UsageExhausted)
        );

        let minimum = admin(5, 0, dec!(150));
        assert_eq!(
            Promo::Admin(minimum).evaluate(dec!(100), now),
            Err(PromoRejection::BelowMinimumSpend)
        );

        assert_eq!(
            Promo::Admin(admin(5, 0, dec!(100))).evaluate(dec!(100), now),
            Ok(dec!(10.00))
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let promo = admin(5, 0, dec!(0));
        let start = promo.start_date;
        let end = promo.end_date;
        let promo = Promo::Admin(promo);
        assert!(promo.check(dec!(10), start).is_ok());
        assert!(promo.check(dec!(10), end).is_ok());
        assert_eq!(
            promo.check(dec!(10), end + Duration::seconds(1)),
            Err(PromoRejection::Expired)
        );
    }

    #[test]
    fn system_promo_rules() {
        let now = Utc::now();
        let inactive = Promo::System {
            template: template(false, 1),
            usage: None,
        };
        assert_eq!(inactive.check(dec!(100), now), Err(PromoRejection::Inactive));

        let tpl = template(true, 2);
        let used_up = Promo::System {
            usage: Some(SystemPromoUsageModel {
                id: Uuid::new_v4(),
                system_promo_id: tpl.id,
                user_id: Uuid::new_v4(),
                used_count: 2,
                updated_at: now,
            }),
            template: tpl,
        };
        assert_eq!(used_up.check(dec!(100), now), Err(PromoRejection::UsageExhausted));

        let fresh = Promo::System {
            template: template(true, 1),
            usage: None,
        };
        assert_eq!(fresh.evaluate(dec!(49.99), now), Err(PromoRejection::BelowMinimumSpend));
        assert_eq!(fresh.evaluate(dec!(60), now), Ok(dec!(15)));
    }

    #[test]
    fn rejection_codes() {
        assert_eq!(PromoRejection::Expired.code(), "expired");
        assert_eq!(PromoRejection::UsageExhausted.code(), "usage_exhausted");
        assert_eq!(PromoRejection::BelowMinimumSpend.code(), "below_minimum_spend");
        assert_eq!(
            serde_json::to_value(PromoRejection::BelowMinimumSpend).unwrap(),
            serde_json::json!("below_minimum_spend")
        );
    }

    async fn setup() -> Arc<DatabaseConnection> {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        Arc::new(db)
    }

    async fn insert_admin(db: &DatabaseConnection, model: AdminPromoModel) -> AdminPromoModel {
        admin_promo::ActiveModel::from(model).insert(db).await.unwrap()
    }

    #[tokio::test]
    async fn admin_promo_requires_ownership() {
        let db = setup().await;
        let promo = insert_admin(&db, admin(3, 0, dec!(0))).await;
        let resolver = PromoResolver::new(db.clone());

        assert_matches!(
            resolver.resolve(promo.id, promo.user_id).await.unwrap(),
            Some(Promo::Admin(p)) if p.id == promo.id
        );
        assert!(resolver.resolve(promo.id, Uuid::new_v4()).await.unwrap().is_none());

        let outcome = resolver
            .evaluate(Some(promo.id), Uuid::new_v4(), dec!(10), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.rejection(), Some(PromoRejection::NotFound));
    }

    #[tokio::test]
    async fn admin_increment_stops_at_cap() {
        let db = setup().await;
        let promo = insert_admin(&db, admin(1, 0, dec!(0))).await;
        let resolved = Promo::Admin(promo.clone());

        increment_usage(db.as_ref(), &resolved, promo.user_id).await.unwrap();
        assert_matches!(
            increment_usage(db.as_ref(), &resolved, promo.user_id).await,
            Err(ServiceError::Conflict(_))
        );

        let row = AdminPromo::find_by_id(promo.id).one(db.as_ref()).await.unwrap().unwrap();
        assert_eq!(row.used_count, 1);
    }

    #[tokio::test]
    async fn system_increment_creates_then_bumps_usage_row() {
        let db = setup().await;
        let tpl = system_promo::ActiveModel::from(template(true, 2))
            .insert(db.as_ref())
            .await
            .unwrap();
        let user_id = Uuid::new_v4();
        let resolver = PromoResolver::new(db.clone());

        for _ in 0..2 {
            let promo = resolver.resolve(tpl.id, user_id).await.unwrap().unwrap();
            increment_usage(db.as_ref(), &promo, user_id).await.unwrap();
        }

        let promo = resolver.resolve(tpl.id, user_id).await.unwrap().unwrap();
        assert_matches!(&promo, Promo::System { usage: Some(u), .. } if u.used_count == 2);
        assert_eq!(
            promo.check(dec!(100), Utc::now()),
            Err(PromoRejection::UsageExhausted)
        );
        assert_matches!(
            increment_usage(db.as_ref(), &promo, user_id).await,
            Err(ServiceError::Conflict(_))
        );
    }
}
