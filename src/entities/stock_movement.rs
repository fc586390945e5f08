//! Stock movement entity - One row of the stock ledger.
//!
//! Each movement records the signed `quantity_delta` applied to a product along
//! with the stock snapshot immediately before and after it was committed.
//! Corrections update a row in place and append an `Edit` row whose
//! `corrects_entry_id` and `replaced_delta` fields describe what changed.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of stock movement. `Edit` is reserved for correction audit rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementAction {
    /// Stock leaving through a sale (negative delta)
    #[sea_orm(string_value = "SALE")]
    Sale,
    /// Stock coming back from a customer (positive delta)
    #[sea_orm(string_value = "RETURN")]
    Return,
    /// Stock received from a supplier (positive delta)
    #[sea_orm(string_value = "RESTOCK")]
    Restock,
    /// Manual correction of the count (either sign)
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
    /// Audit row documenting a correction of another entry
    #[sea_orm(string_value = "EDIT")]
    Edit,
}

/// Stock movement database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    /// Ledger position; ids increase in commit order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Product this movement applies to
    pub product_id: i64,
    /// What kind of movement this is
    pub action: MovementAction,
    /// Signed change in stock (for `Edit` rows: the net adjustment applied)
    pub quantity_delta: i64,
    /// Product stock immediately before the change
    pub previous_stock: i64,
    /// Product stock immediately after the change
    pub new_stock: i64,
    /// User who performed (or last corrected) the movement
    pub actor_id: i64,
    /// Optional free-text note
    pub note: Option<String>,
    /// For `Edit` rows: the entry that was corrected
    pub corrects_entry_id: Option<i64>,
    /// For `Edit` rows: the delta the corrected entry carried before the edit
    pub replaced_delta: Option<i64>,
    /// When the movement was committed (refreshed on correction)
    pub timestamp: DateTimeUtc,
}

/// Defines relationships between `StockMovement` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each movement belongs to one product
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    /// Each movement was performed by one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ActorId",
        to = "super::user::Column::Id"
    )]
    Actor,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Actor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
