//! Product entity - Represents a stocked item and its current quantity.
//!
//! `stock` is only ever written by the stock mutation engine so that it stays
//! equal to the net sum of the product's ledger entries. Products are archived
//! through `is_deleted` rather than removed, keeping their ledger intact.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Unique identifier for the product
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Stock keeping unit, unique across all products
    #[sea_orm(unique)]
    pub sku: String,
    /// Barcode, unique across all products
    #[sea_orm(unique)]
    pub barcode: String,
    /// Display name
    pub name: String,
    /// Current stock quantity, never negative
    pub stock: i64,
    /// Quantity at or below which the product counts as low stock
    pub threshold: i64,
    /// Optional unit price
    pub price: Option<f64>,
    /// Optional expiry date of the current batch
    pub expiry_date: Option<Date>,
    /// Opaque reference to an externally managed category
    pub category_id: Option<i64>,
    /// Soft delete flag - archived products keep their ledger history
    pub is_deleted: bool,
    /// User who created the product
    pub created_by: Option<i64>,
    /// When the product was created
    pub created_at: DateTime,
    /// When the product was last modified
    pub updated_at: DateTime,
}

/// Defines relationships between Product and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One product has many ledger entries
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
    /// One product has many notifications
    #[sea_orm(has_many = "super::notification::Entity")]
    Notifications,
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

impl Related<super::notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notifications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
