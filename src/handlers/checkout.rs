use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};

use crate::errors::ServiceError;
use crate::services::checkout::{CheckoutForm, CheckoutOutcome};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/checkout", post(process_checkout))
}

/// Submit a cart for checkout
///
/// Creates an order when the cart validates cleanly (or the client confirmed
/// the proposed stock adjustments). A cart exceeding available stock yields a
/// `needs_confirmation` response instead of an order.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutForm,
    responses(
        (status = 201, description = "Order created", body = CheckoutOutcome),
        (status = 200, description = "Stock adjustments need confirmation", body = CheckoutOutcome),
        (status = 400, description = "Invalid cart or form", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn process_checkout(
    State(state): State<AppState>,
    Json(form): Json<CheckoutForm>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ServiceError> {
    let outcome = state.checkout.process_checkout(form).await?;
    let status = match &outcome {
        CheckoutOutcome::Created { .. } => StatusCode::CREATED,
        CheckoutOutcome::NeedsConfirmation { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}
