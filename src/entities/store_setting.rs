use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Store-wide key/value setting grouped by category (`identity` for
/// storefront presentation, `operational` for pricing and fulfillment
/// parameters such as tax rate and shipping thresholds).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "store_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub value: String,
    pub category: String,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Setting categories used by the admin surface.
pub const CATEGORY_IDENTITY: &str = "identity";
pub const CATEGORY_OPERATIONAL: &str = "operational";
