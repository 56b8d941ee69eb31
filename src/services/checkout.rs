use std::sync::Arc;

use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::orders::{NewOrderInput, OrderService};
use crate::services::settings::SettingsService;
use crate::services::stock::{self, CartLine, StockAdjustment};

/// Checkout submission. The cart is client-held state and is fully
/// revalidated server-side; nothing in it is trusted.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutForm {
    #[validate(length(min = 1, max = 100))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: Option<String>,

    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub shipping_city: Option<String>,
    #[serde(default)]
    pub shipping_postal_code: Option<String>,
    #[serde(default)]
    pub shipping_country: Option<String>,

    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,

    #[validate(length(min = 1))]
    pub items: Vec<CartLine>,

    /// Set on resubmission after the client accepted proposed stock
    /// adjustments.
    #[serde(default)]
    pub confirmed: bool,
}

/// Result of a checkout attempt. `NeedsConfirmation` is a normal outcome,
/// not an error: the cart exceeded available stock and the client must
/// accept the proposed adjustments before an order is created.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Created {
        order_id: Uuid,
        order_number: String,
        /// Order total in minor units.
        total: i64,
        currency: String,
    },
    NeedsConfirmation {
        stock_issues: Vec<StockAdjustment>,
        /// Cart total in minor units after the proposed adjustments.
        adjusted_total: i64,
    },
}

/// Two-phase checkout coordinator.
///
/// Each attempt runs inside a single database transaction: validation reads
/// and the order insert see one consistent catalog snapshot, and a rejected
/// attempt leaves no rows behind. Stock itself is not decremented here; that
/// happens once payment completes.
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    settings: Arc<SettingsService>,
    event_sender: EventSender,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        settings: Arc<SettingsService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            orders,
            settings,
            event_sender,
        }
    }

    #[instrument(skip(self, form), fields(items = form.items.len(), confirmed = form.confirmed))]
    pub async fn process_checkout(
        &self,
        form: CheckoutForm,
    ) -> Result<CheckoutOutcome, ServiceError> {
        form.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let pricing = self.settings.pricing().await?;
        let txn = self.db.begin().await?;

        let validation = stock::validate_cart(&txn, &form.items).await?;

        if validation.has_hard_errors() {
            txn.rollback().await?;
            return Err(ServiceError::ValidationError(
                validation.product_errors.join("; "),
            ));
        }

        if validation.needs_confirmation() && !form.confirmed {
            txn.rollback().await?;
            return Ok(CheckoutOutcome::NeedsConfirmation {
                stock_issues: validation.stock_issues,
                adjusted_total: validation.adjusted_total,
            });
        }

        let lines = if validation.needs_confirmation() {
            stock::apply_adjustments(form.items.clone(), &validation.stock_issues)
        } else {
            form.items.clone()
        };
        if lines.is_empty() {
            txn.rollback().await?;
            return Err(ServiceError::ValidationError(
                "All items in the cart are out of stock".to_string(),
            ));
        }

        if lines.iter().any(|line| !line.is_digital) {
            Self::require_shipping_fields(&form)?;
        }

        let input = NewOrderInput {
            customer_name: form.customer_name.clone(),
            customer_email: form.customer_email.clone(),
            customer_phone: form.customer_phone.clone(),
            shipping_address: form.shipping_address.clone(),
            shipping_city: form.shipping_city.clone(),
            shipping_postal_code: form.shipping_postal_code.clone(),
            shipping_country: form.shipping_country.clone(),
            payment_method: form.payment_method.clone(),
            notes: form.notes.clone(),
        };

        let order = self
            .orders
            .create_order_with_items(&txn, &input, &lines, &pricing)
            .await?;

        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, "order created");
        let _ = self.event_sender.send(Event::OrderCreated(order.id)).await;

        Ok(CheckoutOutcome::Created {
            order_id: order.id,
            order_number: order.order_number,
            total: order.subtotal + order.shipping_amount + order.tax_amount,
            currency: pricing.currency,
        })
    }

    fn require_shipping_fields(form: &CheckoutForm) -> Result<(), ServiceError> {
        let missing = form
            .shipping_address
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
            || form
                .shipping_country
                .as_deref()
                .map_or(true, |s| s.trim().is_empty());
        if missing {
            return Err(ServiceError::ValidationError(
                "Shipping address and country are required for physical items".to_string(),
            ));
        }
        Ok(())
    }
}
