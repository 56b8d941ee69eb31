use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Customer order. Created in `pending`/`created` state by checkout; payment
/// and fulfillment state advance from there. Orders are never deleted —
/// terminal states are retained for audit.
///
/// `payment_status` moves to `completed` at most once; that transition is
/// guarded by a conditional update in the payment completion service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    pub customer_name: String,
    pub customer_email: String,
    #[sea_orm(nullable)]
    pub customer_phone: Option<String>,

    // Structured shipping address; all None for digital-only orders.
    #[sea_orm(nullable)]
    pub shipping_address: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_city: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_postal_code: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_country: Option<String>,

    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    #[sea_orm(nullable)]
    pub payment_provider_id: Option<String>,
    /// Foreign reference to the provider-side payment session.
    #[sea_orm(nullable)]
    pub provider_payment_id: Option<String>,

    pub status: String,
    pub payment_status: String,

    /// Derived once from cart composition at creation; never changes.
    pub is_digital: bool,

    // Amounts in integer minor units.
    pub subtotal: i64,
    pub shipping_amount: i64,
    pub tax_amount: i64,

    #[sea_orm(nullable)]
    pub paid_amount: Option<i64>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTimeUtc>,
    #[sea_orm(nullable)]
    pub transaction_id: Option<String>,
    #[sea_orm(nullable)]
    pub payer_email: Option<String>,

    /// Cumulative refunded amount in minor units.
    pub refund_amount: i64,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTimeUtc>,
    #[sea_orm(nullable)]
    pub refund_id: Option<String>,

    #[sea_orm(nullable)]
    pub notes: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Order total in minor units.
    pub fn total(&self) -> i64 {
        self.subtotal + self.shipping_amount + self.tax_amount
    }
}

/// Order fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// States from which an order may still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::Processing)
    }
}

/// Payment lifecycle status mirrored from the provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Pending,
    Approved,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
}
