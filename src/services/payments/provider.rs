use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed error taxonomy for the payments layer. Raw provider and HTTP
/// errors never escape it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentErrorCode {
    ConfigurationError,
    ValidationError,
    NetworkError,
    Timeout,
    ProviderError,
    PaymentDeclined,
    InsufficientFunds,
    ExpiredCard,
    AuthenticationFailed,
    RateLimited,
    Unknown,
}

impl PaymentErrorCode {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::RateLimited | Self::Unknown
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub message: String,
    /// Gateway-native error code, preserved for policy decisions such as
    /// treating an already-refunded capture as refunded.
    pub provider_code: Option<String>,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, provider_code: impl Into<String>) -> Self {
        self.provider_code = Some(provider_code.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ValidationError, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ConfigurationError, message)
    }

    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }

    /// Refund rejections that mean the money is already back with the payer
    /// (fully refunded, or the gateway forbids refunding this capture).
    pub fn is_refund_not_allowed(&self) -> bool {
        matches!(
            self.provider_code.as_deref(),
            Some("CAPTURE_FULLY_REFUNDED") | Some("REFUND_NOT_ALLOWED")
        )
    }
}

/// Provider-side payment session status, normalized across gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentSessionStatus {
    Created,
    Pending,
    Approved,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    /// Amount in minor units; must be positive.
    pub amount: i64,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    /// Explicit provider choice; wins over currency-based auto-selection.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatePaymentResponse {
    pub provider_id: String,
    pub provider_payment_id: String,
    pub status: PaymentSessionStatus,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CapturePaymentRequest {
    pub order_id: Uuid,
    pub provider_payment_id: String,
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CapturePaymentResponse {
    /// Gateway capture/transaction id.
    pub transaction_id: String,
    /// Captured amount in minor units.
    pub amount_captured: i64,
    pub payer_email: Option<String>,
    pub status: PaymentSessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundRequest {
    /// Gateway transaction id of the original capture.
    pub transaction_id: String,
    /// Refund amount in minor units.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefundResponse {
    pub refund_id: String,
    pub status: PaymentSessionStatus,
}

/// Signature material extracted from webhook request headers. Which fields
/// are present depends on the gateway's transmission scheme.
#[derive(Debug, Clone, Default)]
pub struct WebhookSignature {
    // PayPal multi-header transmission bundle
    pub transmission_id: Option<String>,
    pub transmission_time: Option<String>,
    pub transmission_sig: Option<String>,
    pub cert_url: Option<String>,
    pub auth_algo: Option<String>,
    // Single-header schemes (Stripe-style)
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

impl WebhookSignature {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        Self {
            transmission_id: get("paypal-transmission-id"),
            transmission_time: get("paypal-transmission-time"),
            transmission_sig: get("paypal-transmission-sig"),
            cert_url: get("paypal-cert-url"),
            auth_algo: get("paypal-auth-algo"),
            signature: get("x-signature").or_else(|| get("stripe-signature")),
            timestamp: get("x-timestamp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    PaymentCompleted,
    PaymentApproved,
    PaymentFailed,
    PaymentCancelled,
    PaymentRefunded,
    Unhandled,
}

/// Provider-parsed webhook payload, normalized for the reconciler.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub order_id: Option<Uuid>,
    pub provider_payment_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Amount in minor units, when the event carries one.
    pub amount: Option<i64>,
    pub payer_email: Option<String>,
    pub event_type: String,
}

/// Uniform contract implemented per external payment gateway.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Stable registry key, e.g. "paypal".
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn supported_currencies(&self) -> &[String];

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, PaymentError>;

    async fn capture_payment(
        &self,
        request: &CapturePaymentRequest,
    ) -> Result<CapturePaymentResponse, PaymentError>;

    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> Result<PaymentSessionStatus, PaymentError>;

    async fn refund_payment(&self, request: &RefundRequest)
        -> Result<RefundResponse, PaymentError>;

    /// Verifies and parses a provider-initiated webhook. The raw payload and
    /// header signature material are handed through untouched.
    async fn process_webhook(
        &self,
        payload: &[u8],
        signature: &WebhookSignature,
    ) -> Result<WebhookEvent, PaymentError>;
}
