use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::payments::{
    CapturePaymentRequest, CreatePaymentRequest, CreatePaymentResponse, PaymentSessionStatus,
};
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/capture", post(capture_payment))
        .route("/payments/:order_id/status", get(payment_status))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderPaymentRequest {
    pub order_id: Uuid,
    /// Explicit provider choice; omitted means currency-based selection
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CaptureOrderPaymentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Completed {
        order_id: Uuid,
        transaction_id: String,
        /// Captured amount in minor units
        amount: i64,
        /// False when a concurrent webhook completed the payment first
        newly_completed: bool,
    },
    /// Capture errored transiently; a bounded recovery poll will reconcile.
    PendingRecovery { order_id: Uuid },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub order_id: Uuid,
    /// Payment status as recorded on the order
    pub payment_status: String,
    /// Live provider-side session status, when reachable
    pub provider_status: Option<PaymentSessionStatus>,
}

/// Create a provider payment session for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreateOrderPaymentRequest,
    responses(
        (status = 201, description = "Payment session created", body = CreatePaymentResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order not payable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatePaymentResponse>>), ServiceError> {
    let (order, _items) = state.orders.get_order(request.order_id).await?;

    if order.payment_status == PaymentStatus::Completed.to_string()
        || order.payment_status == PaymentStatus::Refunded.to_string()
    {
        return Err(ServiceError::InvalidOperation(
            "Order payment is already settled".to_string(),
        ));
    }
    if order.status == OrderStatus::Cancelled.to_string() {
        return Err(ServiceError::InvalidOperation(
            "Cancelled orders cannot be paid".to_string(),
        ));
    }

    let currency = state.settings.pricing().await?.currency;
    let payment_request = CreatePaymentRequest {
        order_id: order.id,
        amount: order.total(),
        currency,
        customer_name: order.customer_name.clone(),
        customer_email: order.customer_email.clone(),
        provider_id: request.provider_id,
        return_url: request.return_url,
        cancel_url: request.cancel_url,
        description: Some(format!("Order {}", order.order_number)),
    };
    let response = state.payments.create_payment(&payment_request).await?;

    let mut active: order::ActiveModel = order.into();
    active.payment_provider_id = Set(Some(response.provider_id.clone()));
    active.provider_payment_id = Set(Some(response.provider_payment_id.clone()));
    active.payment_status = Set(PaymentStatus::Pending.to_string());
    active.updated_at = Set(Utc::now());
    active.update(&*state.db).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Capture an approved payment and reconcile the order
#[utoipa::path(
    post,
    path = "/api/v1/payments/capture",
    request_body = CaptureOrderPaymentRequest,
    responses(
        (status = 200, description = "Payment captured", body = CaptureOutcome),
        (status = 202, description = "Capture pending recovery", body = CaptureOutcome),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn capture_payment(
    State(state): State<AppState>,
    Json(request): Json<CaptureOrderPaymentRequest>,
) -> Result<(StatusCode, Json<CaptureOutcome>), ServiceError> {
    let (order, _items) = state.orders.get_order(request.order_id).await?;
    let provider_payment_id = order.provider_payment_id.clone().ok_or_else(|| {
        ServiceError::InvalidOperation("Order has no payment session to capture".to_string())
    })?;

    let capture_request = CapturePaymentRequest {
        order_id: order.id,
        provider_payment_id: provider_payment_id.clone(),
        provider_id: order.payment_provider_id.clone(),
    };

    match state.payments.capture_payment(&capture_request).await {
        Ok(response) => {
            let outcome = state
                .completion
                .complete_order_payment(
                    order.id,
                    &response.transaction_id,
                    response.amount_captured,
                    response.payer_email.as_deref(),
                )
                .await?;
            Ok((
                StatusCode::OK,
                Json(CaptureOutcome::Completed {
                    order_id: order.id,
                    transaction_id: response.transaction_id,
                    amount: response.amount_captured,
                    newly_completed: outcome.updated,
                }),
            ))
        }
        Err(err) if err.retryable() => {
            // The provider may have captured server-side even though our
            // call failed, and the webhook may still land. Poll instead of
            // failing the order outright.
            warn!(order_id = %order.id, error = %err, "capture errored; starting recovery poll");
            let _ = state.completion.spawn_recovery(
                state.payments.clone(),
                order.id,
                order.payment_provider_id.clone(),
                provider_payment_id,
                state.config.payments.recovery_max_attempts,
                Duration::from_millis(state.config.payments.recovery_interval_ms),
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(CaptureOutcome::PendingRecovery { order_id: order.id }),
            ))
        }
        Err(err) => {
            if let Err(fail_err) = state
                .completion
                .fail_order_payment(order.id, PaymentStatus::Failed)
                .await
            {
                error!(order_id = %order.id, error = %fail_err, "failed to record payment failure");
            }
            Err(err.into())
        }
    }
}

/// Payment status for an order
#[utoipa::path(
    get,
    path = "/api/v1/payments/{order_id}/status",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment status", body = PaymentStatusResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let (order, _items) = state.orders.get_order(order_id).await?;

    let provider_status = match &order.provider_payment_id {
        Some(payment_id) => {
            match state
                .payments
                .get_payment_status(order.payment_provider_id.as_deref(), payment_id)
                .await
            {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!(%order_id, error = %err, "provider status lookup failed");
                    None
                }
            }
        }
        None => None,
    };

    Ok(Json(ApiResponse::success(PaymentStatusResponse {
        order_id,
        payment_status: order.payment_status,
        provider_status,
    })))
}
