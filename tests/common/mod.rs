#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use servicebook_api::{
    auth::AuthConfig,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{
        booking::{payment_intent, PaymentIntent, PaymentIntentModel, PaymentIntentStatus},
        commerce::{admin_promo, catalog_item, system_promo, tax_config, DiscountType},
    },
    events::{self, EventHandler, EventSender},
    handlers::AppServices,
    payments::{
        signature::{stripe_signature_header, STRIPE_SIGNATURE_HEADER},
        CreatePaymentIntent, PaymentProvider, ProviderError, ProviderPaymentIntent,
        ProviderRefund, STATUS_SUCCEEDED,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration_test_jwt_secret_value_with_enough_entropy_x7q";
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

#[derive(Default)]
struct FakeState {
    intents: HashMap<String, ProviderPaymentIntent>,
    created: Vec<CreatePaymentIntent>,
    retrieve_calls: usize,
    refunds: Vec<String>,
    fail_retrieve: bool,
    fail_refund: bool,
    omit_client_secret: bool,
}

/// In-memory payment provider. Intents start unpaid; tests mark them paid
/// with [`FakeProvider::succeed`] before delivering the webhook.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("fake provider lock");
        f(&mut state)
    }

    pub fn succeed(&self, external_id: &str) {
        self.with_state(|s| {
            let intent = s
                .intents
                .get_mut(external_id)
                .expect("payment intent was never created");
            intent.status = STATUS_SUCCEEDED.to_string();
            intent.receipt_reference = Some(format!("ch_{}", external_id));
        });
    }

    /// Registers a paid intent the service never issued.
    pub fn insert_paid(&self, external_id: &str, amount: i64) {
        self.with_state(|s| {
            s.intents.insert(
                external_id.to_string(),
                ProviderPaymentIntent {
                    id: external_id.to_string(),
                    amount,
                    currency: "usd".to_string(),
                    status: STATUS_SUCCEEDED.to_string(),
                    client_secret: None,
                    receipt_reference: Some(format!("ch_{}", external_id)),
                    receipt_url: None,
                },
            );
        });
    }

    pub fn fail_retrieve(&self, fail: bool) {
        self.with_state(|s| s.fail_retrieve = fail);
    }

    pub fn fail_refund(&self, fail: bool) {
        self.with_state(|s| s.fail_refund = fail);
    }

    pub fn omit_client_secret(&self, omit: bool) {
        self.with_state(|s| s.omit_client_secret = omit);
    }

    pub fn created(&self) -> Vec<CreatePaymentIntent> {
        self.with_state(|s| s.created.clone())
    }

    pub fn retrieve_calls(&self) -> usize {
        self.with_state(|s| s.retrieve_calls)
    }

    pub fn refunds(&self) -> Vec<String> {
        self.with_state(|s| s.refunds.clone())
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntent,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        Ok(self.with_state(|s| {
            let id = format!("pi_test_{}", s.created.len() + 1);
            let intent = ProviderPaymentIntent {
                id: id.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                status: "requires_payment_method".to_string(),
                client_secret: (!s.omit_client_secret).then(|| format!("{}_secret_abc", id)),
                receipt_reference: None,
                receipt_url: None,
            };
            s.created.push(request);
            s.intents.insert(id, intent.clone());
            intent
        }))
    }

    async fn retrieve_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        self.with_state(|s| {
            s.retrieve_calls += 1;
            if s.fail_retrieve {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "provider unavailable".to_string(),
                });
            }
            s.intents
                .get(external_id)
                .cloned()
                .ok_or_else(|| ProviderError::Api {
                    status: 404,
                    message: format!("No such payment_intent: {}", external_id),
                })
        })
    }

    async fn refund_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderRefund, ProviderError> {
        self.with_state(|s| {
            if s.fail_refund {
                return Err(ProviderError::Api {
                    status: 400,
                    message: "charge already refunded".to_string(),
                });
            }
            s.refunds.push(external_id.to_string());
            Ok(ProviderRefund {
                id: format!("re_{}", external_id),
                status: "succeeded".to_string(),
            })
        })
    }
}

/// Application wired to an in-memory SQLite database and a [`FakeProvider`].
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub provider: Arc<FakeProvider>,
    /// Same channel the outbox worker relays into in production.
    pub events: EventSender,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            WEBHOOK_SECRET.to_string(),
            "test".to_string(),
        );
        customize(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(events::LoggingNotifier)];
        let event_task = tokio::spawn(events::process_events(event_rx, handlers));

        let provider = Arc::new(FakeProvider::default());
        let services = AppServices::new(db_arc.clone(), provider.clone(), &cfg);

        let state = AppState {
            db: db_arc.clone(),
            auth: AuthConfig::from(&cfg),
            config: Arc::new(cfg),
            services,
        };

        Self {
            router: servicebook_api::build_router(state.clone()),
            state,
            db: db_arc,
            provider,
            events: event_sender,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .auth
            .issue_token(user_id, chrono::Duration::hours(1))
            .expect("issue test token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Request authenticated as `user_id`.
    pub async fn request_as(
        &self,
        user_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token_for(user_id);
        self.request(method, uri, body, Some(&token)).await
    }

    /// Posts a correctly signed webhook body.
    pub async fn deliver_webhook(&self, payload: &Value) -> Response {
        let raw = serde_json::to_vec(payload).expect("serialize webhook");
        let signature = stripe_signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), &raw);
        self.deliver_raw_webhook(raw, Some(signature)).await
    }

    pub async fn deliver_raw_webhook(&self, raw: Vec<u8>, signature: Option<String>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(STRIPE_SIGNATURE_HEADER, sig);
        }
        let request = builder.body(Body::from(raw)).expect("build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    pub async fn payment_record(&self, external_id: &str) -> Option<PaymentIntentModel> {
        PaymentIntent::find()
            .filter(payment_intent::Column::ExternalId.eq(external_id))
            .one(self.db.as_ref())
            .await
            .expect("load payment record")
    }

    /// Polls until the payment leaves `pending`; webhook work runs after the ack.
    pub async fn wait_for_terminal(&self, external_id: &str) -> PaymentIntentModel {
        for _ in 0..200 {
            if let Some(record) = self.payment_record(external_id).await {
                if record.status != PaymentIntentStatus::Pending {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("payment {} never left pending", external_id);
    }

    // ==================== Seeding ====================

    pub async fn seed_catalog_item(&self, service_id: Uuid, name: &str, price: Decimal) -> Uuid {
        catalog_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            service_id: Set(service_id),
            name: Set(name.to_string()),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed catalog item")
        .id
    }

    pub async fn seed_tax(&self, name: &str, percentage: Decimal) {
        tax_config::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            percentage: Set(percentage),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed tax config");
    }

    pub async fn seed_admin_promo(
        &self,
        user_id: Uuid,
        discount_type: DiscountType,
        value: Decimal,
        min_spend: Decimal,
        max_use: i32,
    ) -> Uuid {
        let now = Utc::now();
        admin_promo::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            code: Set(format!("ADMIN{}", &Uuid::new_v4().simple().to_string()[..6])),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            min_spend: Set(min_spend),
            max_use: Set(max_use),
            used_count: Set(0),
            start_date: Set(now - chrono::Duration::days(1)),
            end_date: Set(now + chrono::Duration::days(30)),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed admin promo")
        .id
    }

    pub async fn seed_system_promo(
        &self,
        discount_type: DiscountType,
        value: Decimal,
        max_use_per_user: i32,
    ) -> Uuid {
        system_promo::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set("WELCOME".to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            min_spend: Set(Decimal::ZERO),
            max_use_per_user: Set(max_use_per_user),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed system promo")
        .id
    }

    // ==================== Cart flows ====================

    /// Opens a cart for a fresh service and returns `(cart_id, service_id)`.
    pub async fn open_cart(&self, user_id: Uuid) -> (Uuid, Uuid) {
        let service_id = Uuid::new_v4();
        let response = self
            .request_as(
                user_id,
                Method::POST,
                "/api/v1/carts",
                Some(json!({
                    "service_id": service_id,
                    "service_variant_id": Uuid::new_v4(),
                })),
            )
            .await;
        assert_eq!(response.status(), 201, "cart should open");
        let body = response_json(response).await;
        (uuid_at(&body["data"]["id"]), service_id)
    }

    pub async fn add_item(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        catalog_item_id: Uuid,
        quantity: i32,
        options: Value,
    ) -> Response {
        self.request_as(
            user_id,
            Method::POST,
            &format!("/api/v1/carts/{}/items", cart_id),
            Some(json!({
                "catalog_item_id": catalog_item_id,
                "quantity": quantity,
                "options": options,
            })),
        )
        .await
    }

    pub async fn schedule(&self, user_id: Uuid, cart_id: Uuid) -> Response {
        self.request_as(
            user_id,
            Method::PUT,
            &format!("/api/v1/carts/{}/schedule", cart_id),
            Some(json!({
                "booking_date": NaiveDate::from_ymd_opt(2030, 5, 14).expect("valid date"),
                "booking_time": NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"),
                "notes": "Side gate is unlocked",
            })),
        )
        .await
    }

    pub async fn apply_promo(&self, user_id: Uuid, cart_id: Uuid, promo_id: Option<Uuid>) -> Response {
        self.request_as(
            user_id,
            Method::PUT,
            &format!("/api/v1/carts/{}/promo", cart_id),
            Some(json!({ "promo_id": promo_id })),
        )
        .await
    }

    pub async fn calculate(&self, user_id: Uuid, cart_id: Uuid) -> Response {
        self.request_as(
            user_id,
            Method::POST,
            &format!("/api/v1/carts/{}/totals", cart_id),
            None,
        )
        .await
    }

    pub async fn create_intent(&self, user_id: Uuid, cart_id: Uuid) -> Response {
        self.request_as(
            user_id,
            Method::POST,
            "/api/v1/payment-intent",
            Some(json!({ "cart_id": cart_id })),
        )
        .await
    }

    /// Cart with two cleaning rooms plus a 5.00 add-on, scheduled and priced:
    /// subtotal 2 x (40.00 + 5.00) = 90.00. Returns `(cart_id, service_id)`.
    pub async fn priced_cart(&self, user_id: Uuid) -> (Uuid, Uuid) {
        let (cart_id, service_id) = self.open_cart(user_id).await;
        let item = self
            .seed_catalog_item(service_id, "Standard clean", Decimal::new(4000, 2))
            .await;
        let response = self
            .add_item(
                user_id,
                cart_id,
                item,
                2,
                json!([
                    { "kind": "addon", "name": "Inside fridge", "price": "5.00" },
                    { "kind": "preference", "name": "Products", "value": "eco" },
                    { "kind": "consent", "name": "Pets on site", "accepted": true }
                ]),
            )
            .await;
        assert_eq!(response.status(), 201, "line item should be added");
        assert_eq!(self.schedule(user_id, cart_id).await.status(), 200);
        assert_eq!(self.calculate(user_id, cart_id).await.status(), 200);
        (cart_id, service_id)
    }

    /// Priced cart with an issued intent. Returns `(cart_id, external_id)`.
    pub async fn checkout(&self, user_id: Uuid) -> (Uuid, String) {
        let (cart_id, _) = self.priced_cart(user_id).await;
        let response = self.create_intent(user_id, cart_id).await;
        assert_eq!(response.status(), 200, "payment intent should be issued");
        let body = response_json(response).await;
        let external_id = body["data"]["paymentIntentId"]
            .as_str()
            .expect("payment intent id")
            .to_string();
        (cart_id, external_id)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn succeeded_event(external_id: &str) -> Value {
    json!({
        "id": format!("evt_{}", external_id),
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": external_id, "object": "payment_intent" } }
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn uuid_at(value: &Value) -> Uuid {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("expected uuid, got {}", value))
}

pub fn decimal_at(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap_or_else(|_| panic!("bad decimal {}", s)),
        Value::Number(n) => n.to_string().parse().unwrap_or_else(|_| panic!("bad decimal {}", n)),
        other => panic!("expected decimal, got {}", other),
    }
}
