use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Servicebook API",
        version = "1.0.0",
        description = r#"
# Servicebook API

Cart pricing, payment intents and webhook-driven booking confirmation for
home-service bookings.

## Authentication

Customer endpoints require a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

The `/webhook` endpoint is called by the payment provider and is authenticated
by its `Stripe-Signature` header instead.

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "code": "stale_totals",
  "message": "Cart totals are stale; recalculate before checkout",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
"#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Carts", description = "Cart editing and totals"),
        (name = "Payments", description = "Payment intents, status and provider webhooks")
    ),
    paths(
        // Carts
        crate::handlers::carts::open_cart,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::delete_cart,
        crate::handlers::carts::add_line_item,
        crate::handlers::carts::update_quantity,
        crate::handlers::carts::remove_line_item,
        crate::handlers::carts::set_schedule,
        crate::handlers::carts::apply_promo,
        crate::handlers::carts::calculate_totals,

        // Payments
        crate::handlers::payments::create_payment_intent,
        crate::handlers::payments::payment_status,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,

            // Cart types
            crate::services::carts::OpenCartRequest,
            crate::services::carts::AddLineItemRequest,
            crate::services::carts::UpdateQuantityRequest,
            crate::services::carts::ScheduleRequest,
            crate::services::carts::ApplyPromoRequest,
            crate::services::carts::LineOption,
            crate::services::carts::LineItemView,
            crate::services::carts::CartView,
            crate::entities::commerce::CartStatus,
            crate::entities::commerce::DiscountType,

            // Pricing types
            crate::services::pricing::Totals,
            crate::services::pricing::LineBreakdown,
            crate::services::pricing::PricingBreakdown,
            crate::services::tax::TaxRate,
            crate::services::promotions::PromoRejection,

            // Payment types
            crate::handlers::payments::CreatePaymentIntentRequest,
            crate::services::payment_intents::IssuedPaymentIntent,
            crate::services::payment_intents::PaymentStatusView,
            crate::entities::booking::PaymentIntentStatus,
            crate::entities::booking::BookingStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
