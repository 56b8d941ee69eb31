#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::config::RetryConfig;
use storefront_api::db::bootstrap_schema;
use storefront_api::entities::product;
use storefront_api::events::EventSender;
use storefront_api::services::checkout::CheckoutService;
use storefront_api::services::orders::OrderService;
use storefront_api::services::payments::completion::PaymentCompletionService;
use storefront_api::services::payments::{
    CapturePaymentRequest, CapturePaymentResponse, CreatePaymentRequest, CreatePaymentResponse,
    PaymentError, PaymentErrorCode, PaymentProvider, PaymentService, PaymentSessionStatus,
    RefundRequest, RefundResponse, WebhookEvent, WebhookEventKind, WebhookSignature,
};
use storefront_api::services::settings::SettingsService;
use storefront_api::services::stock::CartLine;

/// In-process payment provider with scripted behavior and call counters.
pub struct ScriptedProvider {
    pub create_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    /// Amounts of every refund request received, in order.
    pub refund_amounts: Mutex<Vec<i64>>,
    /// When set, refunds fail with the "already refunded" provider code.
    pub refuse_refunds: AtomicBool,
    currencies: Vec<String>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            refund_amounts: Mutex::new(Vec::new()),
            refuse_refunds: AtomicBool::new(false),
            currencies: vec!["USD".to_string(), "EUR".to_string()],
        }
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn display_name(&self) -> &str {
        "Scripted"
    }

    fn supported_currencies(&self) -> &[String] {
        &self.currencies
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, PaymentError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CreatePaymentResponse {
            provider_id: "scripted".to_string(),
            provider_payment_id: format!("pay-{}", request.order_id),
            status: PaymentSessionStatus::Created,
            approval_url: Some("https://pay.example.test/approve".to_string()),
        })
    }

    async fn capture_payment(
        &self,
        request: &CapturePaymentRequest,
    ) -> Result<CapturePaymentResponse, PaymentError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CapturePaymentResponse {
            transaction_id: format!("txn-{}", request.provider_payment_id),
            amount_captured: 0,
            payer_email: Some("payer@example.test".to_string()),
            status: PaymentSessionStatus::Completed,
        })
    }

    async fn get_payment_status(
        &self,
        _provider_payment_id: &str,
    ) -> Result<PaymentSessionStatus, PaymentError> {
        Ok(PaymentSessionStatus::Approved)
    }

    async fn refund_payment(
        &self,
        request: &RefundRequest,
    ) -> Result<RefundResponse, PaymentError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.refund_amounts.lock().unwrap().push(request.amount);
        if self.refuse_refunds.load(Ordering::SeqCst) {
            return Err(
                PaymentError::new(PaymentErrorCode::ProviderError, "already refunded")
                    .with_provider_code("CAPTURE_FULLY_REFUNDED"),
            );
        }
        Ok(RefundResponse {
            refund_id: format!("refund-{}", Uuid::new_v4()),
            status: PaymentSessionStatus::Refunded,
        })
    }

    async fn process_webhook(
        &self,
        payload: &[u8],
        _signature: &WebhookSignature,
    ) -> Result<WebhookEvent, PaymentError> {
        let json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::validation(format!("bad payload: {}", e)))?;
        Ok(WebhookEvent {
            kind: WebhookEventKind::PaymentCompleted,
            order_id: json
                .get("order_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok()),
            provider_payment_id: None,
            transaction_id: json
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            amount: json.get("amount").and_then(|v| v.as_i64()),
            payer_email: None,
            event_type: "TEST.PAYMENT.COMPLETED".to_string(),
        })
    }
}

/// Fully wired service graph over a fresh in-memory SQLite database.
///
/// A single pooled connection keeps transactional interleavings
/// deterministic under concurrent calls.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub completion: Arc<PaymentCompletionService>,
    pub payments: Arc<PaymentService>,
    pub settings: Arc<SettingsService>,
    pub provider: Arc<ScriptedProvider>,
    pub event_sender: EventSender,
    _event_rx: mpsc::Receiver<storefront_api::events::Event>,
}

/// Minimal configuration for router-level tests.
pub fn test_config() -> storefront_api::config::AppConfig {
    storefront_api::config::AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        settings_cache_ttl_secs: 60,
        payments: storefront_api::config::PaymentsConfig::default(),
    }
}

pub async fn test_app() -> TestApp {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).sqlx_logging(false);
    let db = Arc::new(Database::connect(opts).await.expect("sqlite connect"));
    bootstrap_schema(&db).await.expect("schema bootstrap");

    let (tx, rx) = mpsc::channel(256);
    let event_sender = EventSender::new(tx);

    let provider = Arc::new(ScriptedProvider::new());
    let mut providers: HashMap<String, Arc<dyn PaymentProvider>> = HashMap::new();
    providers.insert("scripted".to_string(), provider.clone());
    let retry = RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        backoff_multiplier: 2.0,
    };
    let payments =
        Arc::new(PaymentService::with_providers(providers, "scripted", retry).expect("payments"));

    let settings = Arc::new(SettingsService::new(
        db.clone(),
        Duration::from_secs(60),
        "USD".to_string(),
    ));
    let completion = Arc::new(PaymentCompletionService::new(db.clone(), event_sender.clone()));
    let orders = Arc::new(OrderService::new(
        db.clone(),
        payments.clone(),
        settings.clone(),
        event_sender.clone(),
    ));
    let checkout = Arc::new(CheckoutService::new(
        db.clone(),
        orders.clone(),
        settings.clone(),
        event_sender.clone(),
    ));

    TestApp {
        db,
        orders,
        checkout,
        completion,
        payments,
        settings,
        provider,
        event_sender,
        _event_rx: rx,
    }
}

pub async fn seed_product(
    db: &DatabaseConnection,
    name: &str,
    price: i64,
    stock: Option<i32>,
    is_digital: bool,
) -> product::Model {
    seed_product_with_status(db, name, price, stock, is_digital, "active").await
}

pub async fn seed_product_with_status(
    db: &DatabaseConnection,
    name: &str,
    price: i64,
    stock: Option<i32>,
    is_digital: bool,
    status: &str,
) -> product::Model {
    let now = Utc::now();
    let model = product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        price: Set(price),
        compare_at_price: Set(None),
        stock: Set(stock),
        is_digital: Set(is_digital),
        status: Set(status.to_string()),
        images: Set(serde_json::json!([])),
        created_at: Set(now),
        updated_at: Set(now),
    };
    model.insert(db).await.expect("seed product")
}

pub fn cart_line(product: &product::Model, quantity: i32) -> CartLine {
    CartLine {
        id: product.id,
        name: product.name.clone(),
        price: product.price,
        quantity,
        is_digital: product.is_digital,
        image: None,
    }
}

pub fn checkout_form(
    items: Vec<CartLine>,
    confirmed: bool,
) -> storefront_api::services::checkout::CheckoutForm {
    storefront_api::services::checkout::CheckoutForm {
        customer_name: "Ada Lovelace".to_string(),
        customer_email: "ada@example.test".to_string(),
        customer_phone: None,
        shipping_address: Some("12 Analytical Way".to_string()),
        shipping_city: Some("London".to_string()),
        shipping_postal_code: Some("N1 7AA".to_string()),
        shipping_country: Some("GB".to_string()),
        payment_method: Some("paypal".to_string()),
        notes: None,
        items,
        confirmed,
    }
}
