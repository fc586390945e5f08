//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod notification;
pub mod product;
pub mod stock_movement;
pub mod system_state;
pub mod user;

// Re-export specific types to avoid conflicts
pub use notification::{
    Column as NotificationColumn, Entity as Notification, Model as NotificationModel,
    NotificationType,
};
pub use product::{Column as ProductColumn, Entity as Product, Model as ProductModel};
pub use stock_movement::{
    Column as StockMovementColumn, Entity as StockMovement, Model as StockMovementModel,
    MovementAction,
};
pub use system_state::{
    Column as SystemStateColumn, Entity as SystemState, Model as SystemStateModel,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel, Role};
