//! Core business logic - Framework-agnostic stock, ledger, notification, and reporting operations.

/// Outbound delivery seam used by the notification sweep
pub mod gateway;
/// Per-product mutation locks
pub mod locks;
/// Ledger reads, reconciliation, and administrative trimming
pub mod movement;
/// Stored alerts, read-marking, and retention cleanup
pub mod notification;
/// Product identity, details, and archiving
pub mod product;
/// Filtered, paginated reads and stock summaries
pub mod report;
/// The stock mutation engine
pub mod stock;
/// Background low-stock and out-of-stock sweep
pub mod sweep;
/// Users, roles, and notification preferences
pub mod user;

pub use stock::StockEngine;
pub use sweep::{NotificationSweep, SweepHandle};
