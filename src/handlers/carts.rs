use crate::{
    auth::AuthUser,
    entities::commerce::{CartLineItemModel, CartModel},
    errors::ServiceError,
    services::{
        carts::{
            AddLineItemRequest, ApplyPromoRequest, CartView, LineItemView, OpenCartRequest,
            ScheduleRequest, UpdateQuantityRequest,
        },
        pricing::PricingBreakdown,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Router,
};
use uuid::Uuid;

pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(open_cart))
        .route("/:id", get(get_cart).delete(delete_cart))
        .route("/:id/items", post(add_line_item))
        .route(
            "/:id/items/:item_id",
            patch(update_quantity).delete(remove_line_item),
        )
        .route("/:id/schedule", put(set_schedule))
        .route("/:id/promo", put(apply_promo))
        .route("/:id/totals", post(calculate_totals))
}

/// Open (or reuse) the caller's cart for a service variant
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    request_body = OpenCartRequest,
    responses(
        (status = 201, description = "Cart ready"),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn open_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<OpenCartRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CartModel>>), ServiceError> {
    let cart = state.services.carts.open_cart(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(cart))))
}

#[utoipa::path(
    get,
    path = "/api/v1/carts/{id}",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Cart with line items and totals", body = crate::ApiResponse<CartView>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.carts.get_cart(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 204, description = "Cart deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn delete_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.carts.delete_cart(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/items",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = AddLineItemRequest,
    responses(
        (status = 201, description = "Line item added", body = crate::ApiResponse<LineItemView>),
        (status = 400, description = "Invalid item or option", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or catalog item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn add_line_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AddLineItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LineItemView>>), ServiceError> {
    let line = state
        .services
        .carts
        .add_line_item(user.user_id, id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(line))))
}

#[utoipa::path(
    patch,
    path = "/api/v1/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Line item ID")
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity updated"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn update_quantity(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<Json<ApiResponse<CartLineItemModel>>, ServiceError> {
    let line = state
        .services
        .carts
        .update_quantity(user.user_id, id, item_id, request)
        .await?;
    Ok(Json(ApiResponse::success(line)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Line item ID")
    ),
    responses(
        (status = 204, description = "Line item removed"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn remove_line_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .carts
        .remove_line_item(user.user_id, id, item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/carts/{id}/schedule",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Schedule saved"),
        (status = 400, description = "Invalid schedule details", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn set_schedule(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ApiResponse<CartModel>>, ServiceError> {
    let cart = state
        .services
        .carts
        .set_schedule(user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    put,
    path = "/api/v1/carts/{id}/promo",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = ApplyPromoRequest,
    responses(
        (status = 200, description = "Promo reference updated"),
        (status = 404, description = "Cart or promo not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn apply_promo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ApplyPromoRequest>,
) -> Result<Json<ApiResponse<CartModel>>, ServiceError> {
    let cart = state
        .services
        .carts
        .apply_promo(user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Recalculate and persist the cart's totals snapshot
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/totals",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Totals snapshot and per-line breakdown", body = crate::ApiResponse<PricingBreakdown>),
        (status = 204, description = "Cart has no line items"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn calculate_totals(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    match state.services.pricing.calculate(id, user.user_id).await? {
        Some(breakdown) => Ok(Json(ApiResponse::success(breakdown)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
