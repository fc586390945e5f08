//! Movement ledger - Reads, reconciliation, and administrative trimming of stock movements.
//!
//! Rows are written only by the stock engine and product creation. This module
//! looks them up, checks that a product's stock still matches its ledger, and
//! offers the admin-only deletion used for audit cleanup.

use crate::{
    core::user,
    entities::{MovementAction, StockMovement, product, stock_movement},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, prelude::*};
use std::{fmt, str::FromStr};
use tracing::{instrument, warn};

impl MovementAction {
    /// Upper-case wire name (`SALE`, `RETURN`, ...)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Return => "RETURN",
            Self::Restock => "RESTOCK",
            Self::Adjustment => "ADJUSTMENT",
            Self::Edit => "EDIT",
        }
    }

    /// Whether callers may record this action directly. `Edit` is written by corrections only.
    #[must_use]
    pub const fn is_user_action(self) -> bool {
        !matches!(self, Self::Edit)
    }
}

impl fmt::Display for MovementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SALE" => Ok(Self::Sale),
            "RETURN" => Ok(Self::Return),
            "RESTOCK" => Ok(Self::Restock),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            "EDIT" => Ok(Self::Edit),
            other => Err(Error::invalid(format!("Unknown action type: {other}"))),
        }
    }
}

/// Result of comparing a product's stock with its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCheck {
    /// Product checked
    pub product_id: i64,
    /// Stock stored on the product
    pub product_stock: i64,
    /// Net sum of non-`Edit` ledger deltas
    pub ledger_sum: i64,
}

impl LedgerCheck {
    /// True when stock and ledger agree.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.product_stock == self.ledger_sum
    }
}

/// Finds a ledger entry by id.
pub async fn find_movement_by_id<C>(db: &C, entry_id: i64) -> Result<Option<stock_movement::Model>>
where
    C: ConnectionTrait,
{
    StockMovement::find_by_id(entry_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Loads a ledger entry by id.
///
/// # Errors
/// Returns [`Error::MovementNotFound`] if no such entry exists.
pub async fn get_movement<C>(db: &C, entry_id: i64) -> Result<stock_movement::Model>
where
    C: ConnectionTrait,
{
    find_movement_by_id(db, entry_id)
        .await?
        .ok_or(Error::MovementNotFound { id: entry_id })
}

/// All entries of a product in ledger order (oldest first).
pub async fn movements_for_product<C>(db: &C, product_id: i64) -> Result<Vec<stock_movement::Model>>
where
    C: ConnectionTrait,
{
    StockMovement::find()
        .filter(stock_movement::Column::ProductId.eq(product_id))
        .order_by_asc(stock_movement::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// `Edit` audit rows written for corrections of `entry_id`, oldest first.
pub async fn corrections_of(
    db: &DatabaseConnection,
    entry_id: i64,
) -> Result<Vec<stock_movement::Model>> {
    StockMovement::find()
        .filter(stock_movement::Column::Action.eq(MovementAction::Edit))
        .filter(stock_movement::Column::CorrectsEntryId.eq(entry_id))
        .order_by_asc(stock_movement::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Compares a product's stored stock with the net sum of its non-`Edit` ledger deltas.
///
/// Corrected entries carry their corrected delta, so the sum already accounts for
/// every correction. Entries trimmed with [`delete_movement`] are gone from the sum,
/// which is why trimming shows up here as an inconsistency.
pub async fn check_ledger(db: &DatabaseConnection, product_id: i64) -> Result<LedgerCheck> {
    let product = product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or(Error::ProductNotFound { id: product_id })?;

    let ledger_sum = movements_for_product(db, product_id)
        .await?
        .iter()
        .filter(|m| m.action.is_user_action())
        .map(|m| m.quantity_delta)
        .sum();

    Ok(LedgerCheck {
        product_id,
        product_stock: product.stock,
        ledger_sum,
    })
}

/// Deletes a ledger entry as an administrative audit trim.
///
/// This never alters product stock and never replays the ledger. Only admins may
/// trim; correction audit rows pointing at the deleted entry are kept.
///
/// # Errors
/// Returns [`Error::Forbidden`] for non-admin actors and [`Error::MovementNotFound`]
/// for unknown entries.
#[instrument(skip(db))]
pub async fn delete_movement(db: &DatabaseConnection, entry_id: i64, actor_id: i64) -> Result<()> {
    user::require_admin(db, actor_id).await?;
    let entry = get_movement(db, entry_id).await?;
    let product_id = entry.product_id;
    let delta = entry.quantity_delta;
    entry.delete(db).await?;
    warn!(
        entry_id,
        product_id, delta, actor_id, "Ledger entry trimmed; product stock left unchanged"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::product::get_product;
    use crate::test_utils::*;

    #[test]
    fn test_action_parsing() {
        assert_eq!("sale".parse::<MovementAction>().unwrap(), MovementAction::Sale);
        assert_eq!(
            " Restock ".parse::<MovementAction>().unwrap(),
            MovementAction::Restock
        );
        assert!(matches!(
            "TRANSFER".parse::<MovementAction>(),
            Err(Error::InvalidInput { .. })
        ));
        assert_eq!(MovementAction::Adjustment.to_string(), "ADJUSTMENT");
        assert!(!MovementAction::Edit.is_user_action());
    }

    #[tokio::test]
    async fn test_get_movement_not_found() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(matches!(
            get_movement(&db, 42).await,
            Err(Error::MovementNotFound { id: 42 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_check_ledger_after_opening_stock() -> Result<()> {
        let (db, admin) = setup_with_admin().await?;
        let product = create_custom_product(&db, "SKU-1", admin.id, 12, 3).await?;

        let check = check_ledger(&db, product.id).await?;
        assert!(check.is_consistent());
        assert_eq!(check.ledger_sum, 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_movement_is_admin_only_and_keeps_stock() -> Result<()> {
        let (db, admin) = setup_with_admin().await?;
        let staff = create_test_user(&db, "staff@example.com").await?;
        let product = create_custom_product(&db, "SKU-1", admin.id, 8, 3).await?;
        let entry = movements_for_product(&db, product.id).await?.remove(0);

        assert!(matches!(
            delete_movement(&db, entry.id, staff.id).await,
            Err(Error::Forbidden { .. })
        ));

        delete_movement(&db, entry.id, admin.id).await?;
        assert!(find_movement_by_id(&db, entry.id).await?.is_none());
        assert_eq!(get_product(&db, product.id).await?.stock, 8);

        let check = check_ledger(&db, product.id).await?;
        assert!(!check.is_consistent());

        assert!(matches!(
            delete_movement(&db, entry.id, admin.id).await,
            Err(Error::MovementNotFound { .. })
        ));
        Ok(())
    }
}
