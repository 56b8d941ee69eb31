use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::config::AppConfig;
use crate::entities;

/// Establishes the primary database connection from application config.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("database connection established");
    Ok(db)
}

/// Creates any missing tables from the entity definitions. Used for sqlite
/// and development databases when `auto_migrate` is enabled; production
/// Postgres schemas are managed externally.
pub async fn bootstrap_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm::ConnectionTrait;

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut products = schema.create_table_from_entity(entities::Product);
    products.if_not_exists();
    db.execute(backend.build(&products)).await?;

    let mut orders = schema.create_table_from_entity(entities::Order);
    orders.if_not_exists();
    db.execute(backend.build(&orders)).await?;

    let mut order_items = schema.create_table_from_entity(entities::OrderItem);
    order_items.if_not_exists();
    db.execute(backend.build(&order_items)).await?;

    let mut settings = schema.create_table_from_entity(entities::StoreSetting);
    settings.if_not_exists();
    db.execute(backend.build(&settings)).await?;

    info!("schema bootstrap complete");
    Ok(())
}
