// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::issue_token,
    config::AppConfig,
    db,
    entities::{product, OrderModel, PaymentMethod, ProductModel},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    payments::{
        InitiatedPayment, PaymentOutcome, PaymentProvider, PaymentRegistry, VerifiedPayment,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

/// Scriptable behavior for a stub payment provider, shared with the test so
/// it can flip outcomes mid-flight.
#[derive(Default)]
pub struct StubBehavior {
    /// When set, verify reports the payment as failed
    pub fail_verify: AtomicBool,
    /// When set, verify reports this captured amount
    pub amount: Mutex<Option<Decimal>>,
    pub initiate_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

impl StubBehavior {
    pub fn set_fail(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn set_amount(&self, amount: Option<Decimal>) {
        *self.amount.lock().unwrap() = amount;
    }
}

/// In-process payment provider standing in for the PayPal/Paystack HTTP APIs.
pub struct StubProvider {
    method: PaymentMethod,
    pub behavior: Arc<StubBehavior>,
}

impl StubProvider {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            behavior: Arc::new(StubBehavior::default()),
        }
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(
        &self,
        order: &OrderModel,
        _email: &str,
    ) -> Result<InitiatedPayment, ServiceError> {
        self.behavior.initiate_calls.fetch_add(1, Ordering::SeqCst);
        let reference = format!("stub-{}-{}", self.method, order.id.simple());
        Ok(InitiatedPayment {
            provider_ref: reference.clone(),
            redirect_url: format!("https://pay.example.test/approve/{}", reference),
        })
    }

    async fn verify(&self, _provider_ref: &str) -> Result<VerifiedPayment, ServiceError> {
        self.behavior.verify_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if self.behavior.fail_verify.load(Ordering::SeqCst) {
            PaymentOutcome::Failed
        } else {
            PaymentOutcome::Succeeded
        };
        Ok(VerifiedPayment {
            outcome,
            amount: *self.behavior.amount.lock().unwrap(),
            currency: None,
            paid_at: Some(Utc::now()),
        })
    }
}

/// Application harness backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub customer_id: Uuid,
    customer_token: String,
    admin_token: String,
    pub paypal: Arc<StubBehavior>,
    pub paystack: Arc<StubBehavior>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single pooled connection keeps the in-memory database alive and
        // shared across the whole test
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.paystack_secret_key = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let paypal_stub = StubProvider::new(PaymentMethod::Paypal);
        let paystack_stub = StubProvider::new(PaymentMethod::Paystack);
        let paypal = paypal_stub.behavior.clone();
        let paystack = paystack_stub.behavior.clone();
        let mut registry = PaymentRegistry::new();
        registry.register(Arc::new(paypal_stub));
        registry.register(Arc::new(paystack_stub));

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            Arc::new(cfg.clone()),
            Arc::new(registry),
        );

        let state = Arc::new(AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        });

        let customer_id = Uuid::new_v4();
        let customer_token = issue_token(
            &cfg,
            customer_id,
            Some("customer@example.test"),
            &["customer"],
        )
        .expect("issue customer token");
        let admin_token = issue_token(&cfg, Uuid::new_v4(), Some("admin@example.test"), &["admin"])
            .expect("issue admin token");

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            customer_id,
            customer_token,
            admin_token,
            paypal,
            paystack,
            _event_task: event_task,
        }
    }

    pub fn customer_token(&self) -> &str {
        &self.customer_token
    }

    #[allow(dead_code)]
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Sends a request with arbitrary extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Request as a guest browser session.
    pub async fn request_as_session(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session_id: &str,
    ) -> axum::response::Response {
        self.request(method, uri, body, &[("x-session-id", session_id)])
            .await
    }

    /// Request as the default signed-in customer.
    pub async fn request_as_customer(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let auth = format!("Bearer {}", self.customer_token);
        self.request(method, uri, body, &[("authorization", auth.as_str())])
            .await
    }

    /// Request with the admin bearer token.
    pub async fn request_as_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let auth = format!("Bearer {}", self.admin_token);
        self.request(method, uri, body, &[("authorization", auth.as_str())])
            .await
    }

    /// Inserts a product directly into the catalog.
    pub async fn seed_product(&self, title: &str, price: Decimal, stock: i32) -> ProductModel {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            description: Set(Some(format!("{} seeded for tests", title))),
            price: Set(price),
            sale_price: Set(None),
            stock: Set(stock),
            image_url: Set(None),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    /// Reads a product's current stock straight from the database.
    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        use sea_orm::EntityTrait;
        storefront_api::entities::Product::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Decodes a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("response body is JSON")
}

/// Asserts a status and returns the parsed body.
pub async fn expect_status(response: axum::response::Response, status: StatusCode) -> Value {
    let got = response.status();
    let body = body_json(response).await;
    assert_eq!(got, status, "unexpected status, body: {}", body);
    body
}
