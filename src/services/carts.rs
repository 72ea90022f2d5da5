use crate::{
    entities::commerce::{
        cart, cart_addon, cart_consent, cart_line_item, cart_preference, Cart,
        CartAddon, CartAddonModel, CartConsent, CartConsentModel, CartLineItem, CartLineItemModel,
        CartModel, CartPreference, CartPreferenceModel, CartStatus, CartTotals, CartTotalsModel,
        CatalogItem,
    },
    errors::ServiceError,
    services::promotions::PromoResolver,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Largest per-unit price accepted for a line option.
pub const MAX_OPTION_PRICE: Decimal = dec!(1_000_000);

/// Money columns are `DECIMAL(19, 4)`.
const MAX_PRICE_SCALE: u32 = 4;

/// Cart mutation service.
///
/// Carts are owned by a single user; every operation takes the caller's
/// `user_id` and treats a cart owned by someone else as missing. Every
/// mutation bumps `carts.updated_at` and returns the cart to `active`, which
/// is what lets checkout detect a totals snapshot taken before the change.
///
/// Pricing is not done here. Callers run
/// [`PricingCalculator`](crate::services::pricing::PricingCalculator) after
/// mutating a cart and before requesting a payment intent.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the caller's cart for `(service, variant)`, creating it on first use.
    ///
    /// # Errors
    ///
    /// * `ServiceError::DatabaseError` - lookup or insert failed
    #[instrument(skip(self))]
    pub async fn open_cart(
        &self,
        user_id: Uuid,
        input: OpenCartRequest,
    ) -> Result<CartModel, ServiceError> {
        let existing = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::ServiceId.eq(input.service_id))
            .filter(cart::Column::ServiceVariantId.eq(input.service_variant_id))
            .one(&*self.db)
            .await?;
        if let Some(cart) = existing {
            return Ok(cart);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            service_id: Set(input.service_id),
            service_variant_id: Set(input.service_variant_id),
            vendor_id: Set(input.vendor_id),
            booking_date: Set(None),
            booking_time: Set(None),
            notes: Set(None),
            media_url: Set(None),
            promo_id: Set(None),
            status: Set(CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(cart_id = %cart.id, %user_id, "Created cart");
        Ok(cart)
    }

    /// Loads a cart with its line items, their options and the current totals snapshot.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - no such cart for this user
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid, cart_id: Uuid) -> Result<CartView, ServiceError> {
        let db = self.db.as_ref();
        let cart = load_owned(db, cart_id, user_id).await?;
        load_view(db, cart).await
    }

    /// Adds a catalog item to the cart with its selected options.
    ///
    /// The catalog price is captured on the line as `unit_price`; option rows
    /// store their per-unit `price` and a `total_price` scaled by `quantity`.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - bad quantity or option
    /// * `ServiceError::NotFound` - cart or catalog item missing
    /// * `ServiceError::InvalidOperation` - catalog item inactive or for another service
    #[instrument(skip(self, input))]
    pub async fn add_line_item(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        input: AddLineItemRequest,
    ) -> Result<LineItemView, ServiceError> {
        input.validate()?;
        for option in &input.options {
            option.check()?;
        }

        let txn = self.db.begin().await?;
        let cart = lock_owned(&txn, cart_id, user_id).await?;

        let catalog = CatalogItem::find_by_id(input.catalog_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Catalog item {} not found", input.catalog_item_id))
            })?;
        if !catalog.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Catalog item {} is not available",
                catalog.id
            )));
        }
        if catalog.service_id != cart.service_id {
            return Err(ServiceError::InvalidOperation(
                "Catalog item belongs to a different service".to_string(),
            ));
        }

        let item = cart_line_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            catalog_item_id: Set(catalog.id),
            name: Set(catalog.name.clone()),
            unit_price: Set(catalog.price),
            quantity: Set(input.quantity),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let mut view = LineItemView::new(item);
        for option in input.options {
            view.push(insert_option(&txn, &view.item, option).await?);
        }

        touch(&txn, cart).await?;
        txn.commit().await?;

        info!(
            %cart_id,
            line_item_id = %view.item.id,
            quantity = view.item.quantity,
            "Added line item to cart"
        );
        Ok(view)
    }

    /// Changes a line's quantity and rescales its option totals.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - quantity out of range
    /// * `ServiceError::NotFound` - cart or line item missing
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        line_item_id: Uuid,
        input: UpdateQuantityRequest,
    ) -> Result<CartLineItemModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let cart = lock_owned(&txn, cart_id, user_id).await?;
        let item = load_line(&txn, cart_id, line_item_id).await?;

        let quantity = Decimal::from(input.quantity);
        for addon in CartAddon::find()
            .filter(cart_addon::Column::LineItemId.eq(line_item_id))
            .all(&txn)
            .await?
        {
            let total = scaled(addon.price, quantity)?;
            let mut active: cart_addon::ActiveModel = addon.into();
            active.total_price = Set(total);
            active.update(&txn).await?;
        }
        for pref in CartPreference::find()
            .filter(cart_preference::Column::LineItemId.eq(line_item_id))
            .all(&txn)
            .await?
        {
            let total = scaled(pref.price, quantity)?;
            let mut active: cart_preference::ActiveModel = pref.into();
            active.total_price = Set(total);
            active.update(&txn).await?;
        }
        for consent in CartConsent::find()
            .filter(cart_consent::Column::LineItemId.eq(line_item_id))
            .all(&txn)
            .await?
        {
            let total = scaled(consent.price, quantity)?;
            let mut active: cart_consent::ActiveModel = consent.into();
            active.total_price = Set(total);
            active.update(&txn).await?;
        }

        let mut active: cart_line_item::ActiveModel = item.into();
        active.quantity = Set(input.quantity);
        let item = active.update(&txn).await?;

        touch(&txn, cart).await?;
        txn.commit().await?;

        info!(%cart_id, %line_item_id, quantity = input.quantity, "Updated line item quantity");
        Ok(item)
    }

    /// Removes a line item and its options.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - cart or line item missing
    #[instrument(skip(self))]
    pub async fn remove_line_item(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        line_item_id: Uuid,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let cart = lock_owned(&txn, cart_id, user_id).await?;
        load_line(&txn, cart_id, line_item_id).await?;

        CartAddon::delete_many()
            .filter(cart_addon::Column::LineItemId.eq(line_item_id))
            .exec(&txn)
            .await?;
        CartPreference::delete_many()
            .filter(cart_preference::Column::LineItemId.eq(line_item_id))
            .exec(&txn)
            .await?;
        CartConsent::delete_many()
            .filter(cart_consent::Column::LineItemId.eq(line_item_id))
            .exec(&txn)
            .await?;
        CartLineItem::delete_by_id(line_item_id).exec(&txn).await?;

        touch(&txn, cart).await?;
        txn.commit().await?;

        info!(%cart_id, %line_item_id, "Removed line item from cart");
        Ok(())
    }

    /// Sets the booking slot and the free-form booking details.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - notes too long or media reference not a URL
    /// * `ServiceError::NotFound` - cart missing
    #[instrument(skip(self, input))]
    pub async fn set_schedule(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        input: ScheduleRequest,
    ) -> Result<CartModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let cart = lock_owned(&txn, cart_id, user_id).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.booking_date = Set(Some(input.booking_date));
        active.booking_time = Set(Some(input.booking_time));
        if input.vendor_id.is_some() {
            active.vendor_id = Set(input.vendor_id);
        }
        active.notes = Set(input.notes);
        active.media_url = Set(input.media_url);
        active.status = Set(CartStatus::Active);
        active.updated_at = Set(Utc::now());
        let cart = active.update(&txn).await?;
        txn.commit().await?;

        info!(%cart_id, date = %input.booking_date, time = %input.booking_time, "Cart scheduled");
        Ok(cart)
    }

    /// Attaches a promo reference to the cart, or clears it with `None`.
    ///
    /// Only existence is checked here; eligibility is decided at pricing time
    /// and reported with the totals.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - cart missing or promo unknown for this user
    #[instrument(skip(self))]
    pub async fn apply_promo(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        input: ApplyPromoRequest,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = lock_owned(&txn, cart_id, user_id).await?;

        if let Some(promo_id) = input.promo_id {
            if PromoResolver::resolve_with(&txn, promo_id, user_id)
                .await?
                .is_none()
            {
                return Err(ServiceError::NotFound(format!("Promo {} not found", promo_id)));
            }
        }

        let mut active: cart::ActiveModel = cart.into();
        active.promo_id = Set(input.promo_id);
        active.status = Set(CartStatus::Active);
        active.updated_at = Set(Utc::now());
        let cart = active.update(&txn).await?;
        txn.commit().await?;

        info!(%cart_id, promo_id = ?input.promo_id, "Cart promo updated");
        Ok(cart)
    }

    /// Deletes the cart and everything hanging off it.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - cart missing
    #[instrument(skip(self))]
    pub async fn delete_cart(&self, user_id: Uuid, cart_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        lock_owned(&txn, cart_id, user_id).await?;
        delete_cart_rows(&txn, cart_id).await?;
        txn.commit().await?;

        info!(%cart_id, "Deleted cart");
        Ok(())
    }
}

/// Deletes options, line items, the totals snapshot and the cart row itself.
/// Returns whether a cart row was removed.
pub(crate) async fn delete_cart_rows(
    conn: &impl ConnectionTrait,
    cart_id: Uuid,
) -> Result<bool, ServiceError> {
    CartAddon::delete_many()
        .filter(cart_addon::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    CartPreference::delete_many()
        .filter(cart_preference::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    CartConsent::delete_many()
        .filter(cart_consent::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    CartLineItem::delete_many()
        .filter(cart_line_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    CartTotals::delete_by_id(cart_id).exec(conn).await?;
    let result = Cart::delete_by_id(cart_id).exec(conn).await?;
    Ok(result.rows_affected > 0)
}

async fn load_owned(
    conn: &impl ConnectionTrait,
    cart_id: Uuid,
    user_id: Uuid,
) -> Result<CartModel, ServiceError> {
    Cart::find_by_id(cart_id)
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
}

/// Row-locks the cart so mutations serialize with checkout.
async fn lock_owned(
    txn: &DatabaseTransaction,
    cart_id: Uuid,
    user_id: Uuid,
) -> Result<CartModel, ServiceError> {
    Cart::find_by_id(cart_id)
        .filter(cart::Column::UserId.eq(user_id))
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
}

async fn load_line(
    txn: &DatabaseTransaction,
    cart_id: Uuid,
    line_item_id: Uuid,
) -> Result<CartLineItemModel, ServiceError> {
    CartLineItem::find_by_id(line_item_id)
        .filter(cart_line_item::Column::CartId.eq(cart_id))
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", line_item_id)))
}

async fn touch(txn: &DatabaseTransaction, cart: CartModel) -> Result<CartModel, ServiceError> {
    let mut active: cart::ActiveModel = cart.into();
    active.status = Set(CartStatus::Active);
    active.updated_at = Set(Utc::now());
    Ok(active.update(txn).await?)
}

/// Per-unit option price times quantity.
fn scaled(price: Decimal, quantity: Decimal) -> Result<Decimal, ServiceError> {
    price
        .checked_mul(quantity)
        .ok_or_else(|| ServiceError::ValidationError(format!("option price {} is out of range", price)))
}

async fn insert_option(
    txn: &DatabaseTransaction,
    item: &CartLineItemModel,
    option: LineOption,
) -> Result<StoredOption, ServiceError> {
    let quantity = Decimal::from(item.quantity);
    let stored = match option {
        LineOption::Addon { name, price } => StoredOption::Addon(
            cart_addon::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(item.cart_id),
                line_item_id: Set(item.id),
                name: Set(name),
                price: Set(price),
                total_price: Set(scaled(price, quantity)?),
            }
            .insert(txn)
            .await?,
        ),
        LineOption::Preference { name, value, price } => StoredOption::Preference(
            cart_preference::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(item.cart_id),
                line_item_id: Set(item.id),
                name: Set(name),
                value: Set(value),
                price: Set(price),
                total_price: Set(scaled(price, quantity)?),
            }
            .insert(txn)
            .await?,
        ),
        LineOption::Consent {
            name,
            accepted,
            price,
        } => StoredOption::Consent(
            cart_consent::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(item.cart_id),
                line_item_id: Set(item.id),
                name: Set(name),
                accepted: Set(accepted),
                price: Set(price),
                total_price: Set(scaled(price, quantity)?),
            }
            .insert(txn)
            .await?,
        ),
    };
    Ok(stored)
}

async fn load_view(conn: &impl ConnectionTrait, cart: CartModel) -> Result<CartView, ServiceError> {
    let items = CartLineItem::find()
        .filter(cart_line_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_line_item::Column::CreatedAt)
        .order_by_asc(cart_line_item::Column::Id)
        .all(conn)
        .await?;

    let mut views: Vec<LineItemView> = items.into_iter().map(LineItemView::new).collect();
    let index: HashMap<Uuid, usize> = views
        .iter()
        .enumerate()
        .map(|(i, v)| (v.item.id, i))
        .collect();

    let addons = CartAddon::find()
        .filter(cart_addon::Column::CartId.eq(cart.id))
        .all(conn)
        .await?;
    let preferences = CartPreference::find()
        .filter(cart_preference::Column::CartId.eq(cart.id))
        .all(conn)
        .await?;
    let consents = CartConsent::find()
        .filter(cart_consent::Column::CartId.eq(cart.id))
        .all(conn)
        .await?;

    let stored = addons
        .into_iter()
        .map(StoredOption::Addon)
        .chain(preferences.into_iter().map(StoredOption::Preference))
        .chain(consents.into_iter().map(StoredOption::Consent));
    for option in stored {
        if let Some(&i) = index.get(&option.line_item_id()) {
            views[i].push(option);
        }
    }

    let totals = CartTotals::find_by_id(cart.id).one(conn).await?;
    Ok(CartView {
        cart,
        line_items: views,
        totals,
    })
}

/// An option row as persisted
enum StoredOption {
    Addon(CartAddonModel),
    Preference(CartPreferenceModel),
    Consent(CartConsentModel),
}

impl StoredOption {
    fn line_item_id(&self) -> Uuid {
        match self {
            StoredOption::Addon(a) => a.line_item_id,
            StoredOption::Preference(p) => p.line_item_id,
            StoredOption::Consent(c) => c.line_item_id,
        }
    }
}

/// Option selected for a line item, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineOption {
    Addon {
        name: String,
        /// Per-unit price
        price: Decimal,
    },
    Preference {
        name: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        price: Decimal,
    },
    Consent {
        name: String,
        accepted: bool,
        #[serde(default)]
        price: Decimal,
    },
}

impl LineOption {
    fn check(&self) -> Result<(), ServiceError> {
        let (name, price) = match self {
            LineOption::Addon { name, price }
            | LineOption::Preference { name, price, .. }
            | LineOption::Consent { name, price, .. } => (name, price),
        };
        if name.trim().is_empty() || name.len() > 255 {
            return Err(ServiceError::ValidationError(
                "option name must be 1-255 characters".to_string(),
            ));
        }
        if price.is_sign_negative() {
            return Err(ServiceError::ValidationError(format!(
                "option {} has a negative price",
                name
            )));
        }
        if *price > MAX_OPTION_PRICE {
            return Err(ServiceError::ValidationError(format!(
                "option {} price exceeds {}",
                name, MAX_OPTION_PRICE
            )));
        }
        if price.normalize().scale() > MAX_PRICE_SCALE {
            return Err(ServiceError::ValidationError(format!(
                "option {} price has more than {} decimal places",
                name, MAX_PRICE_SCALE
            )));
        }
        if let LineOption::Consent {
            accepted: false, ..
        } = self
        {
            return Err(ServiceError::ValidationError(format!(
                "consent {} must be accepted",
                name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenCartRequest {
    pub service_id: Uuid,
    pub service_variant_id: Uuid,
    #[serde(default)]
    pub vendor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddLineItemRequest {
    pub catalog_item_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
    #[serde(default)]
    pub options: Vec<LineOption>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ScheduleRequest {
    pub booking_date: NaiveDate,
    #[schema(value_type = String, example = "14:30:00")]
    pub booking_time: NaiveTime,
    #[serde(default)]
    pub vendor_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub notes: Option<String>,
    #[validate(url)]
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ApplyPromoRequest {
    #[serde(default)]
    pub promo_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LineItemView {
    #[schema(value_type = Object)]
    pub item: CartLineItemModel,
    #[schema(value_type = Vec<Object>)]
    pub addons: Vec<CartAddonModel>,
    #[schema(value_type = Vec<Object>)]
    pub preferences: Vec<CartPreferenceModel>,
    #[schema(value_type = Vec<Object>)]
    pub consents: Vec<CartConsentModel>,
}

impl LineItemView {
    fn new(item: CartLineItemModel) -> Self {
        Self {
            item,
            addons: Vec::new(),
            preferences: Vec::new(),
            consents: Vec::new(),
        }
    }

    fn push(&mut self, option: StoredOption) {
        match option {
            StoredOption::Addon(a) => self.addons.push(a),
            StoredOption::Preference(p) => self.preferences.push(p),
            StoredOption::Consent(c) => self.consents.push(c),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    #[schema(value_type = Object)]
    pub cart: CartModel,
    pub line_items: Vec<LineItemView>,
    #[schema(value_type = Option<Object>)]
    pub totals: Option<CartTotalsModel>,
}
