use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::payments::{WebhookEvent, WebhookEventKind, WebhookSignature};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/payment/:provider_id", post(payment_webhook))
}

/// Provider-initiated payment notification
///
/// Always answers 200: a non-2xx response makes gateways retry
/// aggressively or disable the webhook, and the recovery poll covers any
/// event we fail to apply.
#[utoipa::path(
    post,
    path = "/webhooks/payment/{provider_id}",
    params(("provider_id" = String, Path, description = "Payment provider id")),
    request_body = String,
    responses((status = 200, description = "Webhook accepted")),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = &state.config.payments.webhook_secret {
        if !verify_shared_secret(
            &headers,
            &body,
            secret,
            state.config.payments.webhook_tolerance_secs,
        ) {
            warn!(provider_id, "webhook shared-secret verification failed");
            return StatusCode::OK;
        }
    }

    let signature = WebhookSignature::from_headers(&headers);
    let event = match state
        .payments
        .process_webhook(&provider_id, &body, &signature)
        .await
    {
        Ok(event) => event,
        Err(err) => {
            warn!(provider_id, error = %err, "webhook rejected by provider verification");
            return StatusCode::OK;
        }
    };

    if let Err(err) = apply_event(&state, &provider_id, &event).await {
        warn!(
            provider_id,
            event_type = %event.event_type,
            error = %err,
            "webhook event could not be applied"
        );
    }

    StatusCode::OK
}

async fn apply_event(
    state: &AppState,
    provider_id: &str,
    event: &WebhookEvent,
) -> Result<(), ServiceError> {
    let Some(order_id) = resolve_order_id(state, event).await? else {
        info!(provider_id, event_type = %event.event_type, "webhook carries no resolvable order");
        return Ok(());
    };

    match event.kind {
        WebhookEventKind::PaymentCompleted => {
            let transaction_id = event
                .transaction_id
                .clone()
                .or_else(|| event.provider_payment_id.clone())
                .ok_or_else(|| {
                    ServiceError::BadRequest("completed event without a transaction id".to_string())
                })?;
            let paid_amount = match event.amount {
                Some(amount) => amount,
                None => {
                    let (order, _) = state.orders.get_order(order_id).await?;
                    order.total()
                }
            };
            let outcome = state
                .completion
                .complete_order_payment(
                    order_id,
                    &transaction_id,
                    paid_amount,
                    event.payer_email.as_deref(),
                )
                .await?;
            info!(%order_id, updated = outcome.updated, "webhook payment completion applied");
        }
        WebhookEventKind::PaymentApproved => {
            state.completion.mark_payment_approved(order_id).await?;
        }
        WebhookEventKind::PaymentFailed => {
            state
                .completion
                .fail_order_payment(order_id, PaymentStatus::Failed)
                .await?;
        }
        WebhookEventKind::PaymentCancelled => {
            state
                .completion
                .fail_order_payment(order_id, PaymentStatus::Cancelled)
                .await?;
        }
        WebhookEventKind::PaymentRefunded => {
            // Refunds originate from our own refund/cancel flows, which
            // already reconcile the order; log for audit.
            info!(%order_id, event_type = %event.event_type, "refund webhook received");
        }
        WebhookEventKind::Unhandled => {
            info!(%order_id, event_type = %event.event_type, "unhandled webhook event type");
        }
    }

    Ok(())
}

/// Order id from the event itself, falling back to a lookup by the
/// provider-side payment session id.
async fn resolve_order_id(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<Option<Uuid>, ServiceError> {
    if let Some(order_id) = event.order_id {
        return Ok(Some(order_id));
    }
    let Some(payment_id) = &event.provider_payment_id else {
        return Ok(None);
    };
    let order = OrderEntity::find()
        .filter(order::Column::ProviderPaymentId.eq(payment_id.clone()))
        .one(&*state.db)
        .await?;
    Ok(order.map(|o| o.id))
}

/// Generic HMAC pre-check over `x-timestamp`/`x-signature` headers, applied
/// before provider-level verification when a shared secret is configured.
fn verify_shared_secret(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let (Some(ts), Some(sig)) = (
        headers.get("x-timestamp").and_then(|v| v.to_str().ok()),
        headers.get("x-signature").and_then(|v| v.to_str().ok()),
    ) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(secret: &str, ts: i64, payload: &str) -> HeaderMap {
        let signed = format!("{}.{}", ts, payload);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert("x-signature", sig.parse().unwrap());
        headers
    }

    #[test]
    fn valid_shared_secret_signature_passes() {
        let ts = chrono::Utc::now().timestamp();
        let headers = signed_headers("topsecret", ts, "{}");
        assert!(verify_shared_secret(
            &headers,
            &Bytes::from_static(b"{}"),
            "topsecret",
            300
        ));
    }

    #[test]
    fn wrong_secret_fails() {
        let ts = chrono::Utc::now().timestamp();
        let headers = signed_headers("topsecret", ts, "{}");
        assert!(!verify_shared_secret(
            &headers,
            &Bytes::from_static(b"{}"),
            "other",
            300
        ));
    }

    #[test]
    fn stale_timestamp_fails() {
        let ts = chrono::Utc::now().timestamp() - 3600;
        let headers = signed_headers("topsecret", ts, "{}");
        assert!(!verify_shared_secret(
            &headers,
            &Bytes::from_static(b"{}"),
            "topsecret",
            300
        ));
    }

    #[test]
    fn missing_headers_fail() {
        assert!(!verify_shared_secret(
            &HeaderMap::new(),
            &Bytes::from_static(b"{}"),
            "topsecret",
            300
        ));
    }
}
