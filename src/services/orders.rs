use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::{PaymentService, RefundRequest};
use crate::services::settings::{PricingSettings, SettingsService};
use crate::services::stock::CartLine;

/// Customer-entered order fields, already validated at the HTTP edge.
#[derive(Debug, Clone)]
pub struct NewOrderInput {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_country: Option<String>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

/// Monetary breakdown computed at assembly time. All minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub shipping_amount: i64,
    pub tax_amount: i64,
    pub is_digital: bool,
}

impl OrderTotals {
    pub fn total(&self) -> i64 {
        self.subtotal + self.shipping_amount + self.tax_amount
    }
}

/// Derives totals from validated cart lines and store pricing settings.
///
/// A cart of only digital items ships nothing and pays no shipping. Free
/// shipping applies when the threshold is configured (> 0) and the subtotal
/// reaches it. Tax is a fraction of the subtotal, rounded half away from
/// zero to whole minor units.
pub fn compute_totals(lines: &[CartLine], pricing: &PricingSettings) -> OrderTotals {
    let subtotal: i64 = lines
        .iter()
        .map(|line| line.price * i64::from(line.quantity))
        .sum();
    let is_digital = !lines.is_empty() && lines.iter().all(|line| line.is_digital);

    let shipping_amount = if is_digital {
        0
    } else if pricing.free_shipping_threshold > 0 && subtotal >= pricing.free_shipping_threshold {
        0
    } else {
        pricing.shipping_flat_amount
    };

    let tax_amount = (Decimal::from(subtotal) * pricing.tax_rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0);

    OrderTotals {
        subtotal,
        shipping_amount,
        tax_amount,
        is_digital,
    }
}

/// Human-readable order number: `ORD-YYYYMMDD-` plus six random uppercase
/// alphanumerics. Uniqueness is enforced by the column constraint; the
/// keyspace makes same-day collisions negligible.
pub fn generate_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", date, suffix)
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

pub struct OrderService {
    db: Arc<DatabaseConnection>,
    payments: Arc<PaymentService>,
    settings: Arc<SettingsService>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<PaymentService>,
        settings: Arc<SettingsService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            payments,
            settings,
            event_sender,
        }
    }

    /// Inserts the order row and its items on the given connection, which is
    /// a transaction handle during checkout so the whole assembly commits or
    /// rolls back as one.
    pub async fn create_order_with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: &NewOrderInput,
        lines: &[CartLine],
        pricing: &PricingSettings,
    ) -> Result<order::Model, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let totals = compute_totals(lines, pricing);
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        // Digital-only orders carry no shipping address even if one was sent.
        let (address, city, postal_code, country) = if totals.is_digital {
            (None, None, None, None)
        } else {
            (
                input.shipping_address.clone(),
                input.shipping_city.clone(),
                input.shipping_postal_code.clone(),
                input.shipping_country.clone(),
            )
        };

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_name: Set(input.customer_name.clone()),
            customer_email: Set(input.customer_email.clone()),
            customer_phone: Set(input.customer_phone.clone()),
            shipping_address: Set(address),
            shipping_city: Set(city),
            shipping_postal_code: Set(postal_code),
            shipping_country: Set(country),
            payment_method: Set(input.payment_method.clone()),
            payment_provider_id: Set(None),
            provider_payment_id: Set(None),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Created.to_string()),
            is_digital: Set(totals.is_digital),
            subtotal: Set(totals.subtotal),
            shipping_amount: Set(totals.shipping_amount),
            tax_amount: Set(totals.tax_amount),
            paid_amount: Set(None),
            paid_at: Set(None),
            transaction_id: Set(None),
            payer_email: Set(None),
            refund_amount: Set(0),
            refunded_at: Set(None),
            refund_id: Set(None),
            notes: Set(input.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let order = order.insert(conn).await?;

        for line in lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.id),
                product_name: Set(line.name.clone()),
                price: Set(line.price),
                quantity: Set(line.quantity),
                is_digital: Set(line.is_digital),
                created_at: Set(now),
            };
            item.insert(conn).await?;
        }

        Ok(order)
    }

    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    /// Orders, newest first, paginated. `page` is 1-based.
    pub async fn list_orders(&self, page: u64, per_page: u64) -> Result<OrderPage, ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let page = page.max(1);

        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Advances fulfillment status with a version bump. Terminal orders
    /// (cancelled, refunded) are immutable.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current = OrderStatus::from_str(&order.status)
            .map_err(|_| ServiceError::InternalError(format!("Bad order status: {}", order.status)))?;

        if matches!(current, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order is {} and cannot change status",
                current
            )));
        }
        if current == new_status {
            return Ok(order);
        }

        let old_status = order.status.clone();
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Utc::now());
        active.version = Set(version + 1);
        let updated = active.update(&*self.db).await?;

        let _ = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Cancels an order. Paid orders get the unrefunded remainder back at the
    /// provider and their physical stock is restored; unpaid orders just flip
    /// state. Gateway "refund not allowed" rejections mean the money is
    /// already back with the payer and are treated as success.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let status = OrderStatus::from_str(&order.status)
            .map_err(|_| ServiceError::InternalError(format!("Bad order status: {}", order.status)))?;
        if !status.is_cancellable() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status {} cannot be cancelled",
                status
            )));
        }

        let was_paid = order.payment_status == PaymentStatus::Completed.to_string();
        let paid = order.paid_amount.unwrap_or_else(|| order.total());
        // Partial refunds may have gone out already; only the remainder is
        // asked back from the gateway.
        let remaining = paid - order.refund_amount;
        let mut refund_id = None;

        if was_paid && remaining > 0 {
            let transaction_id = order.transaction_id.clone().ok_or_else(|| {
                ServiceError::InternalError("Paid order has no transaction id".to_string())
            })?;
            let currency = self.settings.pricing().await?.currency;

            let request = RefundRequest {
                transaction_id,
                amount: remaining,
                currency,
                provider_id: order.payment_provider_id.clone(),
                reason: reason.clone().or_else(|| Some("Order cancelled".to_string())),
            };
            match self.payments.refund_payment(&request).await {
                Ok(response) => refund_id = Some(response.refund_id),
                Err(err) if err.is_refund_not_allowed() => {
                    info!(%order_id, "refund already settled at provider");
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Terminal write and restock commit together; a failure between them
        // must not leave stock restored on a still-cancellable order.
        let txn = self.db.begin().await?;

        let version = order.version;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        if was_paid {
            active.payment_status = Set(PaymentStatus::Refunded.to_string());
            active.refund_amount = Set(paid);
            active.refunded_at = Set(Some(now));
            if refund_id.is_some() {
                active.refund_id = Set(refund_id.clone());
            }
        } else {
            active.payment_status = Set(PaymentStatus::Cancelled.to_string());
        }
        if let Some(reason) = &reason {
            active.notes = Set(Some(format!("Cancelled: {}", reason)));
        }
        active.updated_at = Set(now);
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        let restocked = if was_paid {
            self.restock_items(&txn, order_id).await?
        } else {
            Vec::new()
        };

        txn.commit().await?;

        let _ = self.event_sender.send(Event::OrderCancelled(order_id)).await;
        for (product_id, quantity) in restocked {
            let _ = self
                .event_sender
                .send(Event::StockRestored {
                    product_id,
                    quantity,
                })
                .await;
        }
        if was_paid && remaining > 0 {
            let _ = self
                .event_sender
                .send(Event::PaymentRefunded {
                    order_id,
                    refund_id: refund_id.unwrap_or_default(),
                    amount: remaining,
                })
                .await;
        }

        info!(%order_id, was_paid, "order cancelled");
        Ok(updated)
    }

    /// Refunds a paid order, fully or partially. The requested amount is
    /// capped against what remains refundable before the provider is called,
    /// so an over-ask never reaches the gateway.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        amount: Option<i64>,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.payment_status != PaymentStatus::Completed.to_string() {
            return Err(ServiceError::InvalidOperation(
                "Only completed payments can be refunded".to_string(),
            ));
        }
        let paid = order.paid_amount.unwrap_or_else(|| order.total());
        let remaining = paid - order.refund_amount;
        if remaining <= 0 {
            return Err(ServiceError::InvalidOperation(
                "Order is already fully refunded".to_string(),
            ));
        }

        let amount = amount.unwrap_or(remaining);
        if amount <= 0 {
            return Err(ServiceError::ValidationError(
                "Refund amount must be positive".to_string(),
            ));
        }
        if amount > remaining {
            return Err(ServiceError::ValidationError(format!(
                "Refund amount {} exceeds refundable remainder {}",
                amount, remaining
            )));
        }

        let transaction_id = order.transaction_id.clone().ok_or_else(|| {
            ServiceError::InternalError("Paid order has no transaction id".to_string())
        })?;
        let currency = self.settings.pricing().await?.currency;

        let request = RefundRequest {
            transaction_id,
            amount,
            currency,
            provider_id: order.payment_provider_id.clone(),
            reason,
        };
        let (refund_id, refunded_amount) = match self.payments.refund_payment(&request).await {
            Ok(response) => (Some(response.refund_id), amount),
            Err(err) if err.is_refund_not_allowed() => {
                // Already fully refunded at the gateway; reconcile our side.
                warn!(%order_id, "gateway reports capture already refunded");
                (None, remaining)
            }
            Err(err) => return Err(err.into()),
        };

        let new_refund_total = order.refund_amount + refunded_amount;
        let fully_refunded = new_refund_total >= paid;
        let version = order.version;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.refund_amount = Set(new_refund_total);
        active.refunded_at = Set(Some(now));
        if refund_id.is_some() {
            active.refund_id = Set(refund_id.clone());
        }
        if fully_refunded {
            active.payment_status = Set(PaymentStatus::Refunded.to_string());
            active.status = Set(OrderStatus::Refunded.to_string());
        }
        active.updated_at = Set(now);
        active.version = Set(version + 1);
        let updated = active.update(&*self.db).await?;

        let _ = self
            .event_sender
            .send(Event::PaymentRefunded {
                order_id,
                refund_id: refund_id.unwrap_or_default(),
                amount: refunded_amount,
            })
            .await;

        info!(%order_id, refunded_amount, fully_refunded, "order refunded");
        Ok(updated)
    }

    /// Returns physical stock decremented at payment completion. Unlimited
    /// stock rows (NULL) are untouched.
    async fn restock_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;

        let mut restocked = Vec::new();
        for item in items.iter().filter(|i| !i.is_digital) {
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).add(item.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::Stock.is_not_null())
                .exec(conn)
                .await?;
            if result.rows_affected > 0 {
                restocked.push((item.product_id, item.quantity));
            }
        }
        Ok(restocked)
    }
}
