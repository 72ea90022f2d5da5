use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payment_intents::{IssuedPaymentIntent, PaymentStatusView},
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    /// Cart to check out
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub cart_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentStatusQuery {
    /// External payment intent identifier
    #[serde(rename = "paymentIntentId")]
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: String,
}

/// Open a payment intent for the cart's current totals
#[utoipa::path(
    post,
    path = "/api/v1/payment-intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = crate::ApiResponse<IssuedPaymentIntent>),
        (status = 400, description = "Missing schedule, stale totals or invalid amount", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> Result<Json<ApiResponse<IssuedPaymentIntent>>, ServiceError> {
    let issued = state
        .services
        .payment_intents
        .issue(request.cart_id, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(issued)))
}

/// Payment state joined with the booking it produced
#[utoipa::path(
    get,
    path = "/api/v1/payment-status",
    params(PaymentStatusQuery),
    responses(
        (status = 200, description = "Payment status", body = crate::ApiResponse<PaymentStatusView>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<Json<ApiResponse<PaymentStatusView>>, ServiceError> {
    query.validate()?;
    let status = state
        .services
        .payment_intents
        .payment_status(&query.payment_intent_id, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(status)))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payment-intent", post(create_payment_intent))
        .route("/payment-status", get(payment_status))
}
