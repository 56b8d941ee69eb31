use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::{PaymentService, PaymentSessionStatus};

/// Result of a completion attempt. `updated` is false when another trigger
/// (capture call or webhook) already completed the payment and this call was
/// a no-op.
#[derive(Debug)]
pub struct CompletionOutcome {
    pub updated: bool,
    pub order: order::Model,
}

/// Applies a finished provider payment to an order exactly once.
///
/// Both the synchronous capture handler and the asynchronous webhook handler
/// converge here; neither carries its own completion logic. The at-most-once
/// guarantee rests on a conditional update that claims the order row only
/// while `payment_status` is not yet `completed`.
pub struct PaymentCompletionService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl PaymentCompletionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Marks the order paid and decrements stock. Safe to invoke any number
    /// of times with the same order; only the first call writes.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn complete_order_payment(
        &self,
        order_id: Uuid,
        transaction_id: &str,
        paid_amount: i64,
        payer_email: Option<&str>,
    ) -> Result<CompletionOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let claim = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Confirmed.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed.to_string()),
            )
            .col_expr(
                order::Column::TransactionId,
                Expr::value(Some(transaction_id.to_string())),
            )
            .col_expr(order::Column::PaidAmount, Expr::value(Some(paid_amount)))
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::PayerEmail,
                Expr::value(payer_email.map(str::to_string)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed.to_string()))
            .exec(&txn)
            .await?;

        if claim.rows_affected == 0 {
            txn.rollback().await?;
            let order = OrderEntity::find_by_id(order_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
            info!(%order_id, "payment already completed; no-op");
            return Ok(CompletionOutcome {
                updated: false,
                order,
            });
        }

        // Stock only ever moves here, never at order creation: inventory is
        // not reserved for abandoned or failed payments.
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let mut oversells = Vec::new();
        for item in &items {
            let product = ProductEntity::find_by_id(item.product_id).one(&txn).await?;
            let Some(product) = product else {
                warn!(%order_id, product_id = %item.product_id, "product missing at completion");
                continue;
            };
            let Some(stock) = product.stock else {
                continue; // unlimited stock
            };

            if stock < item.quantity {
                oversells.push((item.product_id, item.quantity, stock));
            }

            ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(item.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::Stock.is_not_null())
                .exec(&txn)
                .await?;

            // Oversold rows are clamped at zero; the sale is honored.
            ProductEntity::update_many()
                .col_expr(product::Column::Stock, Expr::value(0))
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::Stock.lt(0))
                .exec(&txn)
                .await?;
        }

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        txn.commit().await?;

        info!(%order_id, transaction_id, paid_amount, "order payment completed");

        let _ = self
            .event_sender
            .send(Event::PaymentCaptured {
                order_id,
                transaction_id: transaction_id.to_string(),
                amount: paid_amount,
            })
            .await;
        for item in &items {
            let _ = self
                .event_sender
                .send(Event::StockDecremented {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .await;
        }
        for (product_id, requested, available) in oversells {
            warn!(
                %order_id,
                %product_id,
                requested,
                available,
                "stock oversold at payment completion; honoring sale"
            );
            let _ = self
                .event_sender
                .send(Event::OversellDetected {
                    order_id,
                    product_id,
                    requested,
                    available,
                })
                .await;
        }

        Ok(CompletionOutcome {
            updated: true,
            order,
        })
    }

    /// Records provider-side approval ahead of capture. Only moves forward
    /// from created/pending; completed or terminal orders are untouched.
    pub async fn mark_payment_approved(&self, order_id: Uuid) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Approved.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.is_in([
                PaymentStatus::Created.to_string(),
                PaymentStatus::Pending.to_string(),
            ]))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Failure-path twin of `complete_order_payment`: records a definitive
    /// provider failure and cancels the order. Orders whose payment already
    /// completed or was refunded are left untouched.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fail_order_payment(
        &self,
        order_id: Uuid,
        payment_status: PaymentStatus,
    ) -> Result<CompletionOutcome, ServiceError> {
        if !matches!(
            payment_status,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Expired
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "{} is not a failure payment status",
                payment_status
            )));
        }

        let now = Utc::now();
        let updated = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(payment_status.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(
                order::Column::PaymentStatus.is_not_in([
                    PaymentStatus::Completed.to_string(),
                    PaymentStatus::Refunded.to_string(),
                ]),
            )
            .exec(&*self.db)
            .await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if updated.rows_affected == 0 {
            return Ok(CompletionOutcome {
                updated: false,
                order,
            });
        }

        warn!(%order_id, %payment_status, "order payment failed; order cancelled");
        let _ = self
            .event_sender
            .send(Event::PaymentFailed {
                order_id,
                payment_status: payment_status.to_string(),
            })
            .await;

        Ok(CompletionOutcome {
            updated: true,
            order,
        })
    }

    /// Bounded recovery poll for a capture call that errored client-side:
    /// the provider webhook may still complete the payment, so the order is
    /// only marked failed once the poll budget is exhausted.
    pub fn spawn_recovery(
        self: &Arc<Self>,
        payments: Arc<PaymentService>,
        order_id: Uuid,
        provider_id: Option<String>,
        provider_payment_id: String,
        max_attempts: u32,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let completion = Arc::clone(self);
        tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                tokio::time::sleep(interval).await;

                match completion.order_payment_state(order_id).await {
                    Ok(Some(status)) => match status {
                        PaymentStatus::Completed | PaymentStatus::Refunded => {
                            info!(%order_id, "recovery: payment settled by another trigger");
                            return;
                        }
                        PaymentStatus::Failed
                        | PaymentStatus::Cancelled
                        | PaymentStatus::Expired => return,
                        _ => {}
                    },
                    Ok(None) => {
                        error!(%order_id, "recovery: order vanished");
                        return;
                    }
                    Err(err) => {
                        error!(%order_id, error = %err, "recovery: order read failed");
                        continue;
                    }
                }

                match payments
                    .get_payment_status(provider_id.as_deref(), &provider_payment_id)
                    .await
                {
                    Ok(PaymentSessionStatus::Completed) => {
                        // Capture went through server-side; the provider
                        // payment id stands in for the capture id until a
                        // webhook refines it.
                        if let Err(err) = completion
                            .complete_from_recovery(order_id, &provider_payment_id)
                            .await
                        {
                            error!(%order_id, error = %err, "recovery: completion failed");
                        }
                        return;
                    }
                    Ok(PaymentSessionStatus::Approved) => {
                        let request = super::CapturePaymentRequest {
                            order_id,
                            provider_payment_id: provider_payment_id.clone(),
                            provider_id: provider_id.clone(),
                        };
                        match payments.capture_payment(&request).await {
                            Ok(response) => {
                                if let Err(err) = completion
                                    .complete_order_payment(
                                        order_id,
                                        &response.transaction_id,
                                        response.amount_captured,
                                        response.payer_email.as_deref(),
                                    )
                                    .await
                                {
                                    error!(%order_id, error = %err, "recovery: completion failed");
                                }
                                return;
                            }
                            Err(err) => {
                                warn!(%order_id, attempt, error = %err, "recovery: capture retry failed");
                            }
                        }
                    }
                    Ok(
                        PaymentSessionStatus::Failed
                        | PaymentSessionStatus::Cancelled
                        | PaymentSessionStatus::Expired,
                    ) => {
                        let _ = completion
                            .fail_order_payment(order_id, PaymentStatus::Failed)
                            .await;
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%order_id, attempt, error = %err, "recovery: status poll failed");
                    }
                }
            }

            warn!(%order_id, "recovery attempts exhausted; marking payment failed");
            if let Err(err) = completion
                .fail_order_payment(order_id, PaymentStatus::Failed)
                .await
            {
                error!(%order_id, error = %err, "recovery: final failure transition failed");
            }
        })
    }

    async fn complete_from_recovery(
        &self,
        order_id: Uuid,
        provider_payment_id: &str,
    ) -> Result<CompletionOutcome, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let total = order.total();
        self.complete_order_payment(order_id, provider_payment_id, total, None)
            .await
    }

    async fn order_payment_state(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PaymentStatus>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id).one(&*self.db).await?;
        Ok(order.and_then(|o| PaymentStatus::from_str(&o.payment_status).ok()))
    }
}
