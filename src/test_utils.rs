//! Shared test utilities for `StockLedger`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test users, products, and an in-memory messaging gateway.

use crate::{
    core::{
        gateway::{DeliveryReceipt, MessagingGateway, OutgoingMessage},
        product::{self, NewProduct},
        stock::StockEngine,
        user::{self, NotificationChannel},
    },
    entities::{self, Role},
    errors::{Error, Result},
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::{Arc, Mutex, PoisonError};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates an active admin named "Test Admin" (`admin@example.com`).
pub async fn create_test_admin(db: &DatabaseConnection) -> Result<entities::user::Model> {
    user::create_user(
        db,
        "Test Admin".to_string(),
        "admin@example.com".to_string(),
        Role::Admin,
    )
    .await
}

/// Creates an active staff user with default notification preferences.
pub async fn create_test_user(
    db: &DatabaseConnection,
    email: &str,
) -> Result<entities::user::Model> {
    user::create_user(db, "Test User".to_string(), email.to_string(), Role::Staff).await
}

/// Product input with sensible defaults.
///
/// # Defaults
/// * `name`: `"Test Product {sku}"`
/// * `barcode`: `"BC-{sku}"`
/// * `initial_stock`: 10
/// * `threshold`: 5
/// * no price, expiry date, or category
#[must_use]
pub fn new_test_product(sku: &str, created_by: i64) -> NewProduct {
    NewProduct {
        sku: sku.to_string(),
        barcode: format!("BC-{sku}"),
        name: format!("Test Product {sku}"),
        initial_stock: 10,
        threshold: 5,
        price: None,
        expiry_date: None,
        category_id: None,
        created_by,
    }
}

/// Creates a product with custom opening stock and threshold.
pub async fn create_custom_product(
    db: &DatabaseConnection,
    sku: &str,
    created_by: i64,
    initial_stock: i64,
    threshold: i64,
) -> Result<entities::product::Model> {
    let mut input = new_test_product(sku, created_by);
    input.initial_stock = initial_stock;
    input.threshold = threshold;
    product::create_product(db, input).await
}

/// Sets up a test database with one admin.
/// Returns (db, admin) for common test scenarios.
pub async fn setup_with_admin() -> Result<(DatabaseConnection, entities::user::Model)> {
    let db = setup_test_db().await?;
    let admin = create_test_admin(&db).await?;
    Ok((db, admin))
}

/// Sets up an engine, an admin, and one product ("SKU-TEST") with the given stock and threshold.
/// Returns (engine, admin, product) for stock mutation tests.
pub async fn setup_engine_with_product(
    initial_stock: i64,
    threshold: i64,
) -> Result<(
    StockEngine,
    entities::user::Model,
    entities::product::Model,
)> {
    let (db, admin) = setup_with_admin().await?;
    let product = create_custom_product(&db, "SKU-TEST", admin.id, initial_stock, threshold).await?;
    Ok((StockEngine::new(db), admin, product))
}

/// Gateway that keeps every message in memory. Optionally fails one channel.
#[derive(Debug, Default, Clone)]
pub struct RecordingGateway {
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    failing_channel: Option<NotificationChannel>,
}

impl RecordingGateway {
    /// Creates a gateway that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway that rejects every message on `channel`.
    #[must_use]
    pub fn failing_on(channel: NotificationChannel) -> Self {
        Self {
            sent: Arc::default(),
            failing_channel: Some(channel),
        }
    }

    /// Messages delivered so far, in delivery order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt> {
        if self.failing_channel == Some(message.channel) {
            return Err(Error::Delivery {
                channel: message.channel.as_str().to_string(),
                message: format!("{} unreachable", message.recipient),
            });
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(message.clone());
        Ok(DeliveryReceipt {
            channel: message.channel,
            reference: format!("rec-{}", sent.len()),
        })
    }
}
