use std::str::FromStr;

use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState, PaginatedResponse};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/status", post(update_order_status))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/orders/:order_id/refund", post(refund_order))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    #[schema(value_type = Object)]
    pub order: order::Model,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PaginationParams {
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size (max 100)
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// Target status (pending, confirmed, processing, shipped, delivered,
    /// completed)
    #[schema(example = "shipped")]
    pub status: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundOrderRequest {
    /// Amount in minor units; omitted means the full refundable remainder
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Get one order with its items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = OrderDetail),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let (order, items) = state.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(OrderDetail { order, items })))
}

/// List orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses((status = 200, description = "Paginated orders")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<order::Model>>>, ServiceError> {
    let page = state
        .orders
        .list_orders(params.page.unwrap_or(1), params.limit.unwrap_or(20))
        .await?;

    let total_pages = page.total.div_ceil(page.per_page);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: page.orders,
        total: page.total,
        page: page.page,
        limit: page.per_page,
        total_pages,
    })))
}

/// Change fulfillment status
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/status",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Disallowed transition", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let status = OrderStatus::from_str(&request.status).map_err(|_| {
        ServiceError::ValidationError(format!("Unknown order status: {}", request.status))
    })?;
    let order = state.orders.update_order_status(order_id, status).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel an order, refunding it when already paid
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/cancel",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not cancellable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    request: Option<Json<CancelOrderRequest>>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let reason = request.and_then(|Json(r)| r.reason);
    let order = state.orders.cancel_order(order_id, reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Refund a paid order, fully or partially
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/refund",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = RefundOrderRequest,
    responses(
        (status = 200, description = "Refund applied"),
        (status = 400, description = "Amount exceeds refundable remainder", body = crate::errors::ErrorResponse),
        (status = 422, description = "Payment not refundable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RefundOrderRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state
        .orders
        .refund_order(order_id, request.amount, request.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
