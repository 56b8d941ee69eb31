use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::checkout::process_checkout,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::refund_order,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::capture_payment,
        crate::handlers::payments::payment_status,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::settings::list_settings,
        crate::handlers::settings::upsert_setting,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::checkout::CheckoutForm,
        crate::services::checkout::CheckoutOutcome,
        crate::services::stock::CartLine,
        crate::services::stock::StockAdjustment,
        crate::services::stock::StockAction,
        crate::services::payments::CreatePaymentRequest,
        crate::services::payments::CreatePaymentResponse,
        crate::services::payments::CapturePaymentRequest,
        crate::services::payments::CapturePaymentResponse,
        crate::services::payments::RefundRequest,
        crate::services::payments::RefundResponse,
        crate::services::payments::PaymentErrorCode,
        crate::services::payments::PaymentSessionStatus,
        crate::handlers::orders::OrderDetail,
        crate::handlers::orders::UpdateOrderStatusRequest,
        crate::handlers::orders::CancelOrderRequest,
        crate::handlers::orders::RefundOrderRequest,
        crate::handlers::payments::CreateOrderPaymentRequest,
        crate::handlers::payments::CaptureOrderPaymentRequest,
        crate::handlers::payments::CaptureOutcome,
        crate::handlers::payments::PaymentStatusResponse,
        crate::handlers::settings::UpsertSettingRequest,
    )),
    tags(
        (name = "Checkout", description = "Cart validation and order creation"),
        (name = "Orders", description = "Order lifecycle, cancellation, refunds"),
        (name = "Payments", description = "Provider payment sessions and capture"),
        (name = "Webhooks", description = "Provider-initiated payment notifications"),
        (name = "Settings", description = "Store configuration"),
        (name = "Health", description = "Service health"),
    ),
    info(
        title = "Storefront API",
        description = "Checkout, order, and payment orchestration API"
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the generated document at
/// `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
