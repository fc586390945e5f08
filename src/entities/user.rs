//! User entity - The minimal slice of an operator account the ledger needs.
//!
//! Identity, role, and notification preferences. Preferences are stored as
//! flat flags per channel (`email_*`, `push_*`) so the sweep can read them
//! without decoding anything.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Operator role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// May trim the ledger and trigger sweeps manually
    #[sea_orm(string_value = "ADMIN")]
    Admin,
    /// Regular operator
    #[sea_orm(string_value = "STAFF")]
    Staff,
}

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// Delivery address for email alerts, unique across users
    #[sea_orm(unique)]
    pub email: String,
    /// Operator role
    pub role: Role,
    /// Inactive users receive no alerts and cannot act
    pub is_active: bool,
    /// Master switch for the email channel
    pub email_enabled: bool,
    /// Email alerts for low stock
    pub email_low_stock: bool,
    /// Email alerts for out of stock
    pub email_stock_out: bool,
    /// Email system alerts
    pub email_system_alerts: bool,
    /// Master switch for the push channel
    pub push_enabled: bool,
    /// Push alerts for low stock
    pub push_low_stock: bool,
    /// Push alerts for out of stock
    pub push_stock_out: bool,
    /// Push system alerts
    pub push_system_alerts: bool,
    /// When the user was created
    pub created_at: DateTime,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One user receives many notifications
    #[sea_orm(has_many = "super::notification::Entity")]
    Notifications,
    /// One user performs many stock movements
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
}

impl Related<super::notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notifications.def()
    }
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
