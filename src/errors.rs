//! Unified error type for the stock ledger.
//!
//! Every engine operation returns [`Result`]. Storage errors are classified on
//! conversion so callers can tell a retryable failure (lock contention, lost
//! connection) from a permanent one.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Errors produced by the stock ledger.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input: wrong sign, zero delta, unknown sort field, bad page.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input
        message: String,
    },

    /// The referenced product does not exist or is archived.
    #[error("Product not found: {id}")]
    ProductNotFound {
        /// Requested product id
        id: i64,
    },

    /// The referenced ledger entry does not exist.
    #[error("Stock movement not found: {id}")]
    MovementNotFound {
        /// Requested movement id
        id: i64,
    },

    /// The referenced user does not exist or is inactive.
    #[error("User not found: {id}")]
    UserNotFound {
        /// Requested user id
        id: i64,
    },

    /// The referenced notification does not exist for this user.
    #[error("Notification not found: {id}")]
    NotificationNotFound {
        /// Requested notification id
        id: i64,
    },

    /// A unique identifier is already taken.
    #[error("{field} already exists: {value}")]
    Conflict {
        /// Which identifier collided (`sku`, `barcode`, `email`)
        field: String,
        /// The colliding value
        value: String,
    },

    /// The mutation would drive stock below zero.
    #[error("Insufficient stock for product {product_id}: current {current}, delta {delta}")]
    InsufficientStock {
        /// Product being mutated
        product_id: i64,
        /// Stock at the time of the attempt
        current: i64,
        /// Delta that was rejected
        delta: i64,
    },

    /// The actor lacks the role required for the operation.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Why access was denied
        message: String,
    },

    /// The storage transaction could not commit; the whole call is safe to retry.
    #[error("Transient storage error: {message}")]
    TransientStorage {
        /// Underlying driver message
        message: String,
    },

    /// Any other storage failure.
    #[error("Database error: {0}")]
    Database(DbErr),

    /// The messaging gateway failed to deliver.
    #[error("Delivery via {channel} failed: {message}")]
    Delivery {
        /// Channel that failed (`email`, `push`)
        channel: String,
        /// Gateway error text
        message: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// A notification sweep scheduler is already running in this process.
    #[error("Notification sweep is already running")]
    SweepAlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Shorthand for [`Error::InvalidInput`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// True for the not-found family of errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProductNotFound { .. }
                | Self::MovementNotFound { .. }
                | Self::UserNotFound { .. }
                | Self::NotificationNotFound { .. }
        )
    }

    /// True when retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage { .. })
    }
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return Self::Conflict {
                field: unique_field(&detail).to_string(),
                value: detail,
            };
        }

        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => Self::TransientStorage {
                message: err.to_string(),
            },
            other => {
                let message = other.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("database is locked") || lowered.contains("database is busy") {
                    Self::TransientStorage { message }
                } else {
                    Self::Database(other)
                }
            }
        }
    }
}

/// Picks the column name out of a driver unique-violation message.
fn unique_field(detail: &str) -> &'static str {
    if detail.contains("barcode") {
        "barcode"
    } else if detail.contains("sku") {
        "sku"
    } else if detail.contains("email") {
        "email"
    } else {
        "unique"
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
