use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::PayPalConfig;
use crate::services::payments::provider::{
    CapturePaymentRequest, CapturePaymentResponse, CreatePaymentRequest, CreatePaymentResponse,
    PaymentError, PaymentErrorCode, PaymentProvider, PaymentSessionStatus, RefundRequest,
    RefundResponse, WebhookEvent, WebhookEventKind, WebhookSignature,
};

pub const PROVIDER_ID: &str = "paypal";

const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const PRODUCTION_BASE_URL: &str = "https://api-m.paypal.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
// Refresh the cached OAuth token this long before PayPal expires it.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// PayPal Checkout (Orders v2) provider.
pub struct PayPalProvider {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    supported_currencies: Vec<String>,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalProvider {
    pub fn from_config(cfg: &PayPalConfig) -> Result<Self, PaymentError> {
        let base_url = match cfg.environment.as_str() {
            "production" => PRODUCTION_BASE_URL,
            "sandbox" => SANDBOX_BASE_URL,
            other => {
                return Err(PaymentError::configuration(format!(
                    "unknown paypal environment: {}",
                    other
                )))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PaymentError::configuration(format!("http client: {}", e)))?;

        if cfg.webhook_id.is_none() {
            warn!("paypal webhook_id not configured; webhook signature verification disabled");
        }

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            webhook_id: cfg.webhook_id.clone(),
            supported_currencies: cfg.supported_currencies.clone(),
            token: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(map_http_error)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PaymentError::new(
                PaymentErrorCode::AuthenticationFailed,
                "paypal rejected the configured credentials",
            ));
        }
        if !response.status().is_success() {
            return Err(PaymentError::new(
                PaymentErrorCode::Unknown,
                format!("paypal token endpoint returned {}", response.status()),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(map_http_error)?;
        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));

        let access_token = token.access_token.clone();
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    /// Converts a non-success PayPal response into the error taxonomy.
    async fn error_from_response(response: reqwest::Response) -> PaymentError {
        #[derive(Deserialize)]
        struct ErrorDetail {
            issue: Option<String>,
            description: Option<String>,
        }
        #[derive(Deserialize)]
        struct ErrorBody {
            name: Option<String>,
            message: Option<String>,
            details: Option<Vec<ErrorDetail>>,
        }

        let status = response.status();
        match status.as_u16() {
            401 => {
                return PaymentError::new(
                    PaymentErrorCode::AuthenticationFailed,
                    "paypal authentication failed",
                )
            }
            429 => {
                return PaymentError::new(
                    PaymentErrorCode::RateLimited,
                    "paypal rate limit exceeded",
                )
            }
            500..=599 => {
                return PaymentError::new(
                    PaymentErrorCode::Unknown,
                    format!("paypal server error {}", status),
                )
            }
            _ => {}
        }

        let body: Option<ErrorBody> = response.json().await.ok();
        let (issue, message) = match &body {
            Some(body) => {
                let issue = body
                    .details
                    .as_ref()
                    .and_then(|d| d.first())
                    .and_then(|d| d.issue.clone())
                    .or_else(|| body.name.clone());
                let message = body
                    .details
                    .as_ref()
                    .and_then(|d| d.first())
                    .and_then(|d| d.description.clone())
                    .or_else(|| body.message.clone())
                    .unwrap_or_else(|| format!("paypal request failed with {}", status));
                (issue, message)
            }
            None => (None, format!("paypal request failed with {}", status)),
        };

        let code = match issue.as_deref() {
            Some("INSTRUMENT_DECLINED") | Some("TRANSACTION_REFUSED") => {
                PaymentErrorCode::PaymentDeclined
            }
            Some("INSUFFICIENT_FUNDS") => PaymentErrorCode::InsufficientFunds,
            Some("CARD_EXPIRED") => PaymentErrorCode::ExpiredCard,
            _ => PaymentErrorCode::ProviderError,
        };

        let mut err = PaymentError::new(code, message);
        if let Some(issue) = issue {
            err = err.with_provider_code(issue);
        }
        err
    }

    fn map_order_status(status: &str) -> PaymentSessionStatus {
        match status {
            "CREATED" => PaymentSessionStatus::Created,
            "SAVED" | "PAYER_ACTION_REQUIRED" => PaymentSessionStatus::Pending,
            "APPROVED" => PaymentSessionStatus::Approved,
            "COMPLETED" => PaymentSessionStatus::Completed,
            "VOIDED" => PaymentSessionStatus::Cancelled,
            other => {
                debug!(status = other, "unmapped paypal order status");
                PaymentSessionStatus::Pending
            }
        }
    }
}

#[derive(Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Deserialize)]
struct Money {
    value: String,
}

#[derive(Deserialize)]
struct Capture {
    id: String,
    amount: Option<Money>,
}

#[derive(Deserialize)]
struct UnitPayments {
    captures: Option<Vec<Capture>>,
}

#[derive(Deserialize)]
struct PurchaseUnit {
    payments: Option<UnitPayments>,
}

#[derive(Deserialize)]
struct Payer {
    email_address: Option<String>,
}

#[derive(Deserialize)]
struct OrderResource {
    id: String,
    status: String,
    links: Option<Vec<Link>>,
    purchase_units: Option<Vec<PurchaseUnit>>,
    payer: Option<Payer>,
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "PayPal"
    }

    fn supported_currencies(&self) -> &[String] {
        &self.supported_currencies
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, PaymentError> {
        let token = self.access_token().await?;

        let mut body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_id.to_string(),
                "custom_id": request.order_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.currency,
                    "value": format_minor(request.amount),
                },
            }],
        });
        if request.return_url.is_some() || request.cancel_url.is_some() {
            body["application_context"] = json!({
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
            });
        }

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let order: OrderResource = response.json().await.map_err(map_http_error)?;
        let approval_url = order
            .links
            .as_ref()
            .and_then(|links| links.iter().find(|l| l.rel == "approve"))
            .map(|l| l.href.clone());

        Ok(CreatePaymentResponse {
            provider_id: PROVIDER_ID.to_string(),
            provider_payment_id: order.id,
            status: Self::map_order_status(&order.status),
            approval_url,
        })
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn capture_payment(
        &self,
        request: &CapturePaymentRequest,
    ) -> Result<CapturePaymentResponse, PaymentError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.base_url, request.provider_payment_id
            ))
            .bearer_auth(token)
            .header("Prefer", "return=representation")
            .json(&json!({}))
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let order: OrderResource = response.json().await.map_err(map_http_error)?;
        let capture = order
            .purchase_units
            .as_ref()
            .and_then(|units| units.first())
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.as_ref())
            .and_then(|captures| captures.first())
            .ok_or_else(|| {
                PaymentError::new(
                    PaymentErrorCode::ProviderError,
                    "paypal capture response carried no capture",
                )
            })?;

        let amount_captured = capture
            .amount
            .as_ref()
            .map(|m| parse_minor(&m.value))
            .transpose()?
            .unwrap_or(0);

        Ok(CapturePaymentResponse {
            transaction_id: capture.id.clone(),
            amount_captured,
            payer_email: order.payer.and_then(|p| p.email_address),
            status: Self::map_order_status(&order.status),
        })
    }

    #[instrument(skip(self))]
    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> Result<PaymentSessionStatus, PaymentError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!(
                "{}/v2/checkout/orders/{}",
                self.base_url, provider_payment_id
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let order: OrderResource = response.json().await.map_err(map_http_error)?;
        Ok(Self::map_order_status(&order.status))
    }

    #[instrument(skip(self, request))]
    async fn refund_payment(
        &self,
        request: &RefundRequest,
    ) -> Result<RefundResponse, PaymentError> {
        let token = self.access_token().await?;

        let body = json!({
            "amount": {
                "currency_code": request.currency,
                "value": format_minor(request.amount),
            },
            "note_to_payer": request.reason,
        });

        let response = self
            .client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.base_url, request.transaction_id
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        #[derive(Deserialize)]
        struct RefundResource {
            id: String,
            status: String,
        }

        let refund: RefundResource = response.json().await.map_err(map_http_error)?;
        let status = match refund.status.as_str() {
            "COMPLETED" => PaymentSessionStatus::Refunded,
            "CANCELLED" | "FAILED" => PaymentSessionStatus::Failed,
            _ => PaymentSessionStatus::Pending,
        };

        Ok(RefundResponse {
            refund_id: refund.id,
            status,
        })
    }

    #[instrument(skip(self, payload, signature))]
    async fn process_webhook(
        &self,
        payload: &[u8],
        signature: &WebhookSignature,
    ) -> Result<WebhookEvent, PaymentError> {
        let event: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::validation(format!("invalid webhook payload: {}", e)))?;

        if let Some(webhook_id) = &self.webhook_id {
            self.verify_webhook_signature(webhook_id, &event, signature)
                .await?;
        } else {
            warn!("accepting paypal webhook without signature verification");
        }

        let event_type = event
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let resource = event.get("resource").cloned().unwrap_or(json!({}));

        let kind = match event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" => WebhookEventKind::PaymentCompleted,
            "CHECKOUT.ORDER.APPROVED" => WebhookEventKind::PaymentApproved,
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => {
                WebhookEventKind::PaymentFailed
            }
            "CHECKOUT.ORDER.VOIDED" => WebhookEventKind::PaymentCancelled,
            "PAYMENT.CAPTURE.REFUNDED" | "PAYMENT.CAPTURE.REVERSED" => {
                WebhookEventKind::PaymentRefunded
            }
            _ => WebhookEventKind::Unhandled,
        };

        // Capture events carry our order id as custom_id on the capture;
        // order events carry it on the first purchase unit.
        let custom_id = resource
            .get("custom_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                resource
                    .get("purchase_units")
                    .and_then(|u| u.get(0))
                    .and_then(|u| u.get("custom_id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });
        let order_id = custom_id.as_deref().and_then(|s| Uuid::from_str(s).ok());

        let resource_id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let (provider_payment_id, transaction_id) = if event_type.starts_with("CHECKOUT.ORDER") {
            (resource_id, None)
        } else {
            // Capture-scoped events: the resource id is the capture id and
            // supplementary_data links back to the checkout order.
            let checkout_order = resource
                .pointer("/supplementary_data/related_ids/order_id")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            (checkout_order, resource_id)
        };

        let amount = resource
            .pointer("/amount/value")
            .and_then(|v| v.as_str())
            .map(parse_minor)
            .transpose()?;

        let payer_email = resource
            .pointer("/payer/email_address")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(WebhookEvent {
            kind,
            order_id,
            provider_payment_id,
            transaction_id,
            amount,
            payer_email,
            event_type,
        })
    }
}

impl PayPalProvider {
    async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        event: &serde_json::Value,
        signature: &WebhookSignature,
    ) -> Result<(), PaymentError> {
        let (Some(transmission_id), Some(transmission_time), Some(transmission_sig), Some(cert_url), Some(auth_algo)) = (
            signature.transmission_id.as_ref(),
            signature.transmission_time.as_ref(),
            signature.transmission_sig.as_ref(),
            signature.cert_url.as_ref(),
            signature.auth_algo.as_ref(),
        ) else {
            return Err(PaymentError::new(
                PaymentErrorCode::AuthenticationFailed,
                "missing paypal transmission headers",
            ));
        };

        let token = self.access_token().await?;
        let body = json!({
            "auth_algo": auth_algo,
            "cert_url": cert_url,
            "transmission_id": transmission_id,
            "transmission_sig": transmission_sig,
            "transmission_time": transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        #[derive(Deserialize)]
        struct Verification {
            verification_status: String,
        }

        let verification: Verification = response.json().await.map_err(map_http_error)?;
        if verification.verification_status != "SUCCESS" {
            return Err(PaymentError::new(
                PaymentErrorCode::AuthenticationFailed,
                "paypal webhook signature verification failed",
            ));
        }
        Ok(())
    }
}

fn map_http_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::new(PaymentErrorCode::Timeout, "paypal request timed out")
    } else if err.is_connect() || err.is_request() {
        PaymentError::new(
            PaymentErrorCode::NetworkError,
            format!("paypal request failed: {}", err),
        )
    } else {
        PaymentError::new(PaymentErrorCode::Unknown, format!("paypal error: {}", err))
    }
}

/// Formats minor units as a two-decimal amount string ("1050" -> "10.50").
/// Currencies with a non-2 exponent are not supported by this store.
fn format_minor(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, amount % 100)
}

/// Parses a two-decimal amount string into minor units.
fn parse_minor(value: &str) -> Result<i64, PaymentError> {
    let decimal = Decimal::from_str(value).map_err(|e| {
        PaymentError::new(
            PaymentErrorCode::Unknown,
            format!("unparseable paypal amount {:?}: {}", value, e),
        )
    })?;
    (decimal * Decimal::from(100)).round().to_i64().ok_or_else(|| {
        PaymentError::new(
            PaymentErrorCode::Unknown,
            format!("paypal amount out of range: {}", value),
        )
    })
}
