/// Commerce entities: catalog, carts, tax and promotions
pub mod admin_promo;
pub mod cart;
pub mod cart_addon;
pub mod cart_consent;
pub mod cart_line_item;
pub mod cart_preference;
pub mod cart_totals;
pub mod catalog_item;
pub mod system_promo;
pub mod system_promo_usage;
pub mod tax_config;

pub use admin_promo::{Entity as AdminPromo, Model as AdminPromoModel};
pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_addon::{Entity as CartAddon, Model as CartAddonModel};
pub use cart_consent::{Entity as CartConsent, Model as CartConsentModel};
pub use cart_line_item::{Entity as CartLineItem, Model as CartLineItemModel};
pub use cart_preference::{Entity as CartPreference, Model as CartPreferenceModel};
pub use cart_totals::{Entity as CartTotals, Model as CartTotalsModel};
pub use catalog_item::{Entity as CatalogItem, Model as CatalogItemModel};
pub use system_promo::{Entity as SystemPromo, Model as SystemPromoModel};
pub use system_promo_usage::{Entity as SystemPromoUsage, Model as SystemPromoUsageModel};
pub use tax_config::{Entity as TaxConfig, Model as TaxConfigModel};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How a promo's `discount_value` is applied to the subtotal
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "percentage")]
    Percentage,
}
