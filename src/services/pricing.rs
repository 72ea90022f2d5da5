use crate::{
    entities::commerce::{
        cart, cart_addon, cart_line_item, cart_preference, cart_totals, Cart, CartAddon,
        CartLineItem, CartLineItemModel, CartPreference, CartTotals, CartTotalsModel,
    },
    errors::ServiceError,
    services::{
        promotions::{PromoOutcome, PromoRejection, PromoResolver},
        tax::{TaxRate, TaxResolver},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Monetary figures of one totals snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Totals {
    pub subtotal: Decimal,
    pub promo_discount: Decimal,
    pub discounted_total: Decimal,
    pub tax_amount: Decimal,
    pub final_total: Decimal,
}

/// Priced view of a single line item
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LineBreakdown {
    pub line_item_id: Uuid,
    pub catalog_item_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub addons_unit_price: Decimal,
    pub preferences_unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// What the calculator returns alongside the persisted snapshot
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PricingBreakdown {
    #[schema(value_type = Object)]
    pub snapshot: CartTotalsModel,
    pub lines: Vec<LineBreakdown>,
    pub tax: TaxRate,
    /// Set when the cart references a promo that was not applied
    pub promo_rejection: Option<PromoRejection>,
}

/// `(base + Σaddons + Σpreferences) × quantity`, all component prices per unit.
///
/// Fails with `ValidationError` if the total does not fit in a `Decimal`.
pub fn line_total(
    base_price: Decimal,
    addon_prices: &[Decimal],
    preference_prices: &[Decimal],
    quantity: i32,
) -> Result<Decimal, ServiceError> {
    addon_prices
        .iter()
        .chain(preference_prices)
        .try_fold(base_price, |acc, p| acc.checked_add(*p))
        .and_then(|per_unit| per_unit.checked_mul(Decimal::from(quantity)))
        .ok_or_else(|| ServiceError::ValidationError("line total is out of range".to_string()))
}

/// Applies an already-rounded discount and the tax rate to `subtotal`.
/// The discount is clamped to `[0, subtotal]`.
pub fn compute_totals(subtotal: Decimal, discount: Decimal, tax: &TaxRate) -> Totals {
    let promo_discount = discount.max(Decimal::ZERO).min(subtotal.max(Decimal::ZERO));
    let discounted_total = subtotal - promo_discount;
    let tax_amount = tax.apply(discounted_total);
    Totals {
        subtotal,
        promo_discount,
        discounted_total,
        tax_amount,
        final_total: discounted_total + tax_amount,
    }
}

impl From<&CartTotalsModel> for Totals {
    fn from(s: &CartTotalsModel) -> Self {
        Self {
            subtotal: s.subtotal,
            promo_discount: s.promo_discount,
            discounted_total: s.discounted_total,
            tax_amount: s.tax_amount,
            final_total: s.final_total,
        }
    }
}

/// Single writer of cart totals snapshots
#[derive(Clone)]
pub struct PricingCalculator {
    db: Arc<DatabaseConnection>,
    promos: PromoResolver,
    tax: TaxResolver,
}

impl PricingCalculator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            promos: PromoResolver::new(db.clone()),
            tax: TaxResolver::new(db.clone()),
            db,
        }
    }

    /// Prices the cart and upserts its snapshot. Returns `None` (and drops any
    /// previous snapshot) when the cart has no line items.
    #[instrument(skip(self))]
    pub async fn calculate(
        &self,
        cart_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PricingBreakdown>, ServiceError> {
        let db = self.db.as_ref();
        // Taken before reading any cart state so a concurrent mutation always
        // leaves the snapshot looking stale.
        let calculated_at = Utc::now();

        let cart = Cart::find_by_id(cart_id)
            .filter(cart::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let items: Vec<CartLineItemModel> = CartLineItem::find()
            .filter(cart_line_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_line_item::Column::CreatedAt)
            .order_by_asc(cart_line_item::Column::Id)
            .all(db)
            .await?;

        if items.is_empty() {
            CartTotals::delete_by_id(cart_id).exec(db).await?;
            debug!(%cart_id, "cart has no line items, nothing to price");
            return Ok(None);
        }

        let mut addons: HashMap<Uuid, Vec<Decimal>> = HashMap::new();
        for addon in CartAddon::find()
            .filter(cart_addon::Column::CartId.eq(cart_id))
            .all(db)
            .await?
        {
            addons.entry(addon.line_item_id).or_default().push(addon.price);
        }
        let mut preferences: HashMap<Uuid, Vec<Decimal>> = HashMap::new();
        for pref in CartPreference::find()
            .filter(cart_preference::Column::CartId.eq(cart_id))
            .all(db)
            .await?
        {
            preferences.entry(pref.line_item_id).or_default().push(pref.price);
        }

        let lines: Vec<LineBreakdown> = items
            .iter()
            .map(|item| -> Result<LineBreakdown, ServiceError> {
                let item_addons = addons.get(&item.id).map(Vec::as_slice).unwrap_or(&[]);
                let item_prefs = preferences.get(&item.id).map(Vec::as_slice).unwrap_or(&[]);
                let total = line_total(item.unit_price, item_addons, item_prefs, item.quantity)?;
                Ok(LineBreakdown {
                    line_item_id: item.id,
                    catalog_item_id: item.catalog_item_id,
                    name: item.name.clone(),
                    unit_price: item.unit_price,
                    addons_unit_price: item_addons.iter().copied().sum(),
                    preferences_unit_price: item_prefs.iter().copied().sum(),
                    quantity: item.quantity,
                    line_total: total,
                })
            })
            .collect::<Result<_, ServiceError>>()?;
        let subtotal = lines
            .iter()
            .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.line_total))
            .ok_or_else(|| ServiceError::ValidationError("cart subtotal is out of range".to_string()))?;

        let promo = self
            .promos
            .evaluate(cart.promo_id, user_id, subtotal, calculated_at)
            .await?;
        let tax = self.tax.resolve().await?;
        let totals = compute_totals(subtotal, promo.discount(), &tax);

        let (promo_id, promo_code) = match &promo {
            PromoOutcome::Applied { promo, .. } => (Some(promo.id()), Some(promo.code().to_string())),
            _ => (None, None),
        };

        let existing = CartTotals::find_by_id(cart_id).one(db).await?;
        let snapshot = match existing {
            // Unchanged figures on a fresh snapshot are left alone so repeated
            // calculation is a no-op.
            Some(current)
                if current.calculated_at >= cart.updated_at
                    && Totals::from(&current) == totals
                    && current.tax_name == tax.name
                    && current.tax_percentage == tax.percentage
                    && current.promo_id == promo_id =>
            {
                debug!(%cart_id, "totals unchanged, keeping snapshot");
                current
            }
            _ => {
                let snapshot = CartTotalsModel {
                    cart_id,
                    subtotal: totals.subtotal,
                    promo_discount: totals.promo_discount,
                    discounted_total: totals.discounted_total,
                    tax_name: tax.name.clone(),
                    tax_percentage: tax.percentage,
                    tax_amount: totals.tax_amount,
                    final_total: totals.final_total,
                    promo_id,
                    promo_code,
                    calculated_at,
                };
                upsert_snapshot(db, &snapshot).await?;
                snapshot
            }
        };

        counter!("servicebook.pricing.calculated", 1);
        info!(
            %cart_id,
            subtotal = %totals.subtotal,
            discount = %totals.promo_discount,
            final_total = %totals.final_total,
            "cart priced"
        );

        Ok(Some(PricingBreakdown {
            snapshot,
            lines,
            tax,
            promo_rejection: promo.rejection(),
        }))
    }
}

async fn upsert_snapshot(db: &DatabaseConnection, s: &CartTotalsModel) -> Result<(), ServiceError> {
    let row = cart_totals::ActiveModel {
        cart_id: Set(s.cart_id),
        subtotal: Set(s.subtotal),
        promo_discount: Set(s.promo_discount),
        discounted_total: Set(s.discounted_total),
        tax_name: Set(s.tax_name.clone()),
        tax_percentage: Set(s.tax_percentage),
        tax_amount: Set(s.tax_amount),
        final_total: Set(s.final_total),
        promo_id: Set(s.promo_id),
        promo_code: Set(s.promo_code.clone()),
        calculated_at: Set(s.calculated_at),
    };

    CartTotals::insert(row)
        .on_conflict(
            OnConflict::column(cart_totals::Column::CartId)
                .update_columns([
                    cart_totals::Column::Subtotal,
                    cart_totals::Column::PromoDiscount,
                    cart_totals::Column::DiscountedTotal,
                    cart_totals::Column::TaxName,
                    cart_totals::Column::TaxPercentage,
                    cart_totals::Column::TaxAmount,
                    cart_totals::Column::FinalTotal,
                    cart_totals::Column::PromoId,
                    cart_totals::Column::PromoCode,
                    cart_totals::Column::CalculatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn tax(pct: Decimal) -> TaxRate {
        TaxRate {
            name: "VAT".into(),
            percentage: pct,
        }
    }

    #[test]
    fn line_total_scales_every_component_once() {
        let total = line_total(dec!(40.00), &[dec!(5.00), dec!(2.50)], &[dec!(1.25)], 3).unwrap();
        assert_eq!(total, dec!(146.25));
        assert_eq!(line_total(dec!(10), &[], &[], 1).unwrap(), dec!(10));
    }

    #[test]
    fn overflowing_line_total_is_an_error() {
        assert_matches!(
            line_total(Decimal::MAX, &[], &[], 2),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            line_total(Decimal::MAX, &[dec!(1)], &[], 1),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn worked_example() {
        let totals = compute_totals(dec!(100.00), dec!(10.00), &tax(dec!(5)));
        assert_eq!(totals.discounted_total, dec!(90.00));
        assert_eq!(totals.tax_amount, dec!(4.50));
        assert_eq!(totals.final_total, dec!(94.50));
    }

    #[test]
    fn discount_cannot_drive_total_negative() {
        let totals = compute_totals(dec!(20.00), dec!(35.00), &tax(dec!(10)));
        assert_eq!(totals.promo_discount, dec!(20.00));
        assert_eq!(totals.discounted_total, Decimal::ZERO);
        assert_eq!(totals.final_total, Decimal::ZERO);
    }

    fn cents() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|c| Decimal::new(c, 2))
    }

    proptest! {
        #[test]
        fn total_identity_holds(
            subtotal in cents(),
            discount in cents(),
            pct in (0i64..10_000).prop_map(|p| Decimal::new(p, 2)),
        ) {
            let totals = compute_totals(subtotal, discount, &tax(pct));
            prop_assert!(totals.promo_discount <= totals.subtotal);
            prop_assert!(totals.promo_discount >= Decimal::ZERO);
            prop_assert_eq!(totals.discounted_total, totals.subtotal - totals.promo_discount);
            prop_assert_eq!(totals.final_total, totals.discounted_total + totals.tax_amount);
            prop_assert!(totals.final_total >= Decimal::ZERO);
        }
    }
}
