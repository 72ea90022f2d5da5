use crate::{
    payments::signature::verify_signature,
    services::booking_materializer::WebhookEvent,
    telemetry::current_request_id,
    AppState,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use tracing::{error, info, info_span, warn, Instrument};

// POST /api/v1/webhook
#[utoipa::path(
    post,
    path = "/api/v1/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook acknowledged"),
        (status = 400, description = "Invalid signature")
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) = verify_signature(
        &headers,
        &body,
        &state.config.payment_webhook_secret,
        state.config.payment_webhook_tolerance_secs,
        Utc::now().timestamp(),
    ) {
        warn!(%reason, "Payment webhook signature verification failed");
        counter!("servicebook.webhook.rejected", 1);
        return (StatusCode::BAD_REQUEST, "invalid signature");
    }

    // Acknowledge first; the provider must not wait on booking work.
    match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => {
            let materializer = state.services.materializer.clone();
            let span = info_span!(
                "payment_webhook",
                request_id = current_request_id()
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_default(),
                event_type = %event.event_type,
                external_id = %event.data.object.id,
            );
            tokio::spawn(
                async move {
                    match materializer.handle_event(event).await {
                        Ok(outcome) => info!(outcome = outcome.label(), "webhook processed"),
                        Err(e) => error!("webhook processing failed: {}", e),
                    }
                }
                .instrument(span),
            );
        }
        Err(e) => warn!("acknowledging webhook with unrecognised payload: {}", e),
    }

    (StatusCode::OK, "ok")
}
