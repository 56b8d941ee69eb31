use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Catalog product. Monetary amounts are integer minor units; `stock` is
/// `None` for unlimited (typically digital) items and is only meaningful
/// when `is_digital` is false.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    #[sea_orm(nullable)]
    pub compare_at_price: Option<i64>,
    #[sea_orm(nullable)]
    pub stock: Option<i32>,
    pub is_digital: bool,
    pub status: String,
    /// Ordered list of image URLs.
    #[sea_orm(column_type = "Json")]
    pub images: Json,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
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

/// Product lifecycle status. Only `active` products are purchasable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Draft,
    Archived,
}

impl Model {
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active.to_string()
    }
}
