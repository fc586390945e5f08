//! Database configuration module for the stock ledger.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Creation is idempotent, which lets the
//! binary call it on every start against a persistent database file.

use crate::entities::{
    Notification, NotificationColumn, Product, StockMovement, StockMovementColumn, SystemState,
    User,
};
use crate::errors::Result;
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema, sea_query::Index,
};
use tracing::{debug, info, instrument};

/// Fallback location of the ledger database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/stock_ledger.sqlite?mode=rwc";

/// Resolves the database URL: `DATABASE_URL` from the environment wins, then the
/// configured value, then [`DEFAULT_DATABASE_URL`].
#[must_use]
pub fn get_database_url(configured: Option<&str>) -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        configured
            .map_or_else(|| DEFAULT_DATABASE_URL.to_string(), ToString::to_string)
    })
}

/// Establishes a connection to the ledger database.
#[instrument]
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database");
    Database::connect(database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables and lookup indexes, skipping any that already exist.
///
/// Tables are created parents first so foreign keys resolve: users and products,
/// then the ledger and notifications that reference them.
#[instrument(skip(db))]
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, User).await?;
    create_table(db, &schema, Product).await?;
    create_table(db, &schema, StockMovement).await?;
    create_table(db, &schema, Notification).await?;
    create_table(db, &schema, SystemState).await?;

    let movements_by_product = Index::create()
        .if_not_exists()
        .name("idx_stock_movements_product")
        .table(StockMovement)
        .col(StockMovementColumn::ProductId)
        .col(StockMovementColumn::Id)
        .to_owned();
    db.execute(builder.build(&movements_by_product)).await?;

    // Dedup lookups filter on all four columns.
    let notification_dedup = Index::create()
        .if_not_exists()
        .name("idx_notifications_dedup")
        .table(Notification)
        .col(NotificationColumn::UserId)
        .col(NotificationColumn::ProductId)
        .col(NotificationColumn::NotificationType)
        .col(NotificationColumn::CreatedAt)
        .to_owned();
    db.execute(builder.build(&notification_dedup)).await?;

    info!("Database tables ensured");
    Ok(())
}
