use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{instrument, warn};

use crate::entities::store_setting::{self, Entity as StoreSettingEntity};
use crate::errors::ServiceError;

// Operational setting keys consumed by order assembly.
pub const KEY_CURRENCY: &str = "currency";
pub const KEY_TAX_RATE: &str = "tax_rate";
pub const KEY_SHIPPING_FLAT_AMOUNT: &str = "shipping_flat_amount";
pub const KEY_FREE_SHIPPING_THRESHOLD: &str = "free_shipping_threshold";

/// Pricing parameters resolved from store settings.
#[derive(Debug, Clone)]
pub struct PricingSettings {
    pub currency: String,
    /// Fraction of the subtotal, e.g. 0.0875 for 8.75%.
    pub tax_rate: Decimal,
    /// Flat shipping cost in minor units for physical orders.
    pub shipping_flat_amount: i64,
    /// Subtotal (minor units) at or above which shipping is free.
    pub free_shipping_threshold: i64,
}

struct CachedValue {
    value: String,
    fetched_at: Instant,
}

/// Key-value store settings with TTL-cached reads, invalidated on write.
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
    cache: DashMap<String, CachedValue>,
    ttl: Duration,
    default_currency: String,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>, ttl: Duration, default_currency: String) -> Self {
        Self {
            db,
            cache: DashMap::new(),
            ttl,
            default_currency,
        }
    }

    /// Reads one setting, serving from cache within the TTL.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        if let Some(cached) = self.cache.get(key) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Some(cached.value.clone()));
            }
        }

        let row = StoreSettingEntity::find_by_id(key.to_string())
            .one(&*self.db)
            .await?;

        match row {
            Some(setting) => {
                self.cache.insert(
                    key.to_string(),
                    CachedValue {
                        value: setting.value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(Some(setting.value))
            }
            None => {
                self.cache.remove(key);
                Ok(None)
            }
        }
    }

    /// Upserts a setting and invalidates its cache entry.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str, category: &str) -> Result<(), ServiceError> {
        let now = Utc::now();
        let existing = StoreSettingEntity::find_by_id(key.to_string())
            .one(&*self.db)
            .await?;

        match existing {
            Some(row) => {
                let mut active: store_setting::ActiveModel = row.into();
                active.value = Set(value.to_string());
                active.category = Set(category.to_string());
                active.updated_at = Set(now);
                active.update(&*self.db).await?;
            }
            None => {
                let active = store_setting::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                    category: Set(category.to_string()),
                    updated_at: Set(now),
                };
                active.insert(&*self.db).await?;
            }
        }

        self.cache.remove(key);
        Ok(())
    }

    /// Lists all settings in one category (uncached; admin surface).
    pub async fn list_category(
        &self,
        category: &str,
    ) -> Result<Vec<store_setting::Model>, ServiceError> {
        let rows = StoreSettingEntity::find()
            .filter(store_setting::Column::Category.eq(category))
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Resolves the pricing parameters used by order assembly, falling back
    /// to defaults for absent or unparseable values.
    pub async fn pricing(&self) -> Result<PricingSettings, ServiceError> {
        let currency = self
            .get(KEY_CURRENCY)
            .await?
            .unwrap_or_else(|| self.default_currency.clone());
        let tax_rate = self.parse_or_default(KEY_TAX_RATE, Decimal::ZERO).await?;
        let shipping_flat_amount = self.parse_or_default(KEY_SHIPPING_FLAT_AMOUNT, 0i64).await?;
        let free_shipping_threshold = self
            .parse_or_default(KEY_FREE_SHIPPING_THRESHOLD, 0i64)
            .await?;

        Ok(PricingSettings {
            currency,
            tax_rate,
            shipping_flat_amount,
            free_shipping_threshold,
        })
    }

    async fn parse_or_default<T>(&self, key: &str, default: T) -> Result<T, ServiceError>
    where
        T: FromStr + Copy,
    {
        match self.get(key).await? {
            Some(raw) => match raw.parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(key, raw, "unparseable setting value; using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }
}
