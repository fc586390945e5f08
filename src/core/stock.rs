//! Stock mutation engine - The only code path that changes product stock.
//!
//! Every mutation runs the same protocol: take the product's lock, open a storage
//! transaction, read the current stock, compute the new value, reject it if it would
//! go negative, write the stock, append the ledger row, and commit. Stock and ledger
//! are therefore committed together or not at all. Dropping a pending call drops its
//! open transaction, which rolls back.
//!
//! Corrections re-align stock with the *marginal* difference between an entry's old
//! and new delta instead of replaying the product's ledger, so their cost does not
//! grow with history.

use crate::{
    core::{locks::ProductLocks, movement, product, sweep::SweepTrigger, user},
    entities::{MovementAction, product as product_entity, stock_movement},
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument, warn};

/// Outcome of [`StockEngine::correct_movement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionOutcome {
    /// The corrected entry as stored after the edit
    pub entry: stock_movement::Model,
    /// The `Edit` audit row documenting the correction
    pub audit_entry: stock_movement::Model,
    /// Net change applied to the product's current stock
    pub stock_delta: i64,
    /// Product stock after the correction
    pub new_stock: i64,
}

/// One operation of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperation {
    /// Product to mutate
    pub product_id: i64,
    /// Movement kind
    pub action: MovementAction,
    /// Signed quantity delta
    pub quantity_delta: i64,
    /// Optional note
    pub note: Option<String>,
}

/// A bulk operation that was rejected.
#[derive(Debug)]
pub struct BulkFailure {
    /// Position of the operation in the request
    pub index: usize,
    /// Product the operation targeted
    pub product_id: i64,
    /// Why it was rejected
    pub error: Error,
}

/// Result of [`StockEngine::apply_bulk`]. Operations succeed or fail independently.
#[derive(Debug, Default)]
pub struct BulkReport {
    /// Entries written for successful operations, in request order
    pub applied: Vec<stock_movement::Model>,
    /// Rejected operations, in request order
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    /// True when every operation was applied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Checks the sign convention of a delta for an action.
///
/// `Sale` must be negative, `Return` and `Restock` positive, `Adjustment` any non-zero
/// value. `Edit` rows are written by corrections only.
///
/// # Errors
/// Returns [`Error::InvalidInput`] when the delta is zero or has the wrong sign.
pub fn validate_delta(action: MovementAction, quantity_delta: i64) -> Result<()> {
    if quantity_delta == 0 {
        return Err(Error::invalid("Quantity delta must be non-zero"));
    }

    let sign_ok = match action {
        MovementAction::Sale => quantity_delta < 0,
        MovementAction::Return | MovementAction::Restock => quantity_delta > 0,
        MovementAction::Adjustment => true,
        MovementAction::Edit => {
            return Err(Error::invalid(
                "EDIT entries are written by corrections only",
            ));
        }
    };

    if sign_ok {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "{action} does not accept a delta of {quantity_delta}"
        )))
    }
}

/// Computes `current + delta`, rejecting overflow and negative results.
fn next_stock(product_id: i64, current: i64, delta: i64) -> Result<i64> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| Error::invalid(format!("Stock overflow applying {delta} to {current}")))?;
    if next < 0 {
        return Err(Error::InsufficientStock {
            product_id,
            current,
            delta,
        });
    }
    Ok(next)
}

fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// The stock mutation engine. Cheap to clone; clones share the lock registry.
#[derive(Clone)]
pub struct StockEngine {
    db: DatabaseConnection,
    locks: ProductLocks,
    sweep_trigger: Option<SweepTrigger>,
}

impl StockEngine {
    /// Creates an engine over a database connection.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            locks: ProductLocks::new(),
            sweep_trigger: None,
        }
    }

    /// Nudges the given sweep whenever a mutation leaves a product at or below threshold.
    #[must_use]
    pub fn with_sweep_trigger(mut self, trigger: SweepTrigger) -> Self {
        self.sweep_trigger = Some(trigger);
        self
    }

    /// The underlying database connection.
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Applies a signed quantity delta to a product and records it in the ledger.
    ///
    /// Stock write and ledger append commit in one transaction under the product lock.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The delta is zero, has the wrong sign for `action`, or `action` is `Edit`
    /// - The product does not exist or is archived
    /// - The actor does not exist or is inactive
    /// - The new stock would be negative ([`Error::InsufficientStock`])
    /// - The transaction fails to commit
    #[instrument(skip(self, note))]
    pub async fn apply_movement(
        &self,
        product_id: i64,
        action: MovementAction,
        quantity_delta: i64,
        actor_id: i64,
        note: Option<String>,
    ) -> Result<stock_movement::Model> {
        validate_delta(action, quantity_delta)?;
        let note = clean_note(note);

        let _guard = self.locks.acquire(product_id).await;
        let txn = self.db.begin().await?;

        let product = product::get_product(&txn, product_id).await?;
        user::require_active_user(&txn, actor_id).await?;

        let previous_stock = product.stock;
        let new_stock = next_stock(product_id, previous_stock, quantity_delta)?;

        product::set_stock(&txn, product_id, previous_stock, new_stock).await?;

        let entry = stock_movement::ActiveModel {
            product_id: Set(product_id),
            action: Set(action),
            quantity_delta: Set(quantity_delta),
            previous_stock: Set(previous_stock),
            new_stock: Set(new_stock),
            actor_id: Set(actor_id),
            note: Set(note),
            corrects_entry_id: Set(None),
            replaced_delta: Set(None),
            timestamp: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            entry_id = entry.id,
            product_id, quantity_delta, previous_stock, new_stock, "Stock movement applied"
        );
        self.after_commit(&product, new_stock);
        Ok(entry)
    }

    /// Corrects a historical ledger entry and re-aligns the product's current stock.
    ///
    /// The stock adjustment is `new_quantity_delta - old_delta`, applied to the product's
    /// *current* stock. The entry is updated in place (action, delta, note, timestamp,
    /// actor) and an `Edit` audit row records the old delta, the new delta and the stock
    /// change. The entry keeps its `previous_stock` and gets `new_stock = previous_stock +
    /// new delta`; once other movements have happened since, these snapshots are
    /// informational only. A `None` note keeps the entry's existing note.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The new delta is zero, has the wrong sign, or the new action is `Edit`
    /// - The entry does not exist, or is itself an `Edit` audit row
    /// - The product is archived or the actor is unknown
    /// - The adjusted stock would be negative ([`Error::InsufficientStock`])
    #[instrument(skip(self, new_note))]
    pub async fn correct_movement(
        &self,
        entry_id: i64,
        new_action: MovementAction,
        new_quantity_delta: i64,
        new_note: Option<String>,
        actor_id: i64,
    ) -> Result<CorrectionOutcome> {
        validate_delta(new_action, new_quantity_delta)?;
        let new_note = clean_note(new_note);

        // The product of an entry never changes, so it is safe to look it up before locking.
        let product_id = movement::get_movement(&self.db, entry_id).await?.product_id;

        let _guard = self.locks.acquire(product_id).await;
        let txn = self.db.begin().await?;

        let entry = movement::get_movement(&txn, entry_id).await?;
        if entry.action == MovementAction::Edit {
            return Err(Error::invalid(format!(
                "Entry {entry_id} is a correction record and cannot be corrected"
            )));
        }
        user::require_active_user(&txn, actor_id).await?;
        let product = product::get_product(&txn, product_id).await?;

        let old_delta = entry.quantity_delta;
        let adjustment = new_quantity_delta
            .checked_sub(old_delta)
            .ok_or_else(|| Error::invalid("Correction delta overflow"))?;
        let current_stock = product.stock;
        let updated_stock = next_stock(product_id, current_stock, adjustment)?;

        if adjustment != 0 {
            product::set_stock(&txn, product_id, current_stock, updated_stock).await?;
        }

        let now = chrono::Utc::now();
        let snapshot_new_stock = entry
            .previous_stock
            .checked_add(new_quantity_delta)
            .ok_or_else(|| Error::invalid("Correction delta overflow"))?;

        let mut corrected: stock_movement::ActiveModel = entry.clone().into();
        corrected.action = Set(new_action);
        corrected.quantity_delta = Set(new_quantity_delta);
        corrected.new_stock = Set(snapshot_new_stock);
        corrected.actor_id = Set(actor_id);
        corrected.timestamp = Set(now);
        if new_note.is_some() {
            corrected.note = Set(new_note);
        }
        let corrected = corrected.update(&txn).await?;

        let audit_entry = stock_movement::ActiveModel {
            product_id: Set(product_id),
            action: Set(MovementAction::Edit),
            quantity_delta: Set(adjustment),
            previous_stock: Set(current_stock),
            new_stock: Set(updated_stock),
            actor_id: Set(actor_id),
            note: Set(Some(format!(
                "Corrected entry #{entry_id}: {} {old_delta} -> {new_action} {new_quantity_delta}",
                entry.action
            ))),
            corrects_entry_id: Set(Some(entry_id)),
            replaced_delta: Set(Some(old_delta)),
            timestamp: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            entry_id,
            audit_entry_id = audit_entry.id,
            product_id,
            old_delta,
            new_quantity_delta,
            adjustment,
            updated_stock,
            "Stock movement corrected"
        );
        self.after_commit(&product, updated_stock);

        Ok(CorrectionOutcome {
            entry: corrected,
            audit_entry,
            stock_delta: adjustment,
            new_stock: updated_stock,
        })
    }

    /// Applies several operations, each in its own transaction.
    ///
    /// A rejected operation is reported by index and does not stop the rest.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an empty request.
    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn apply_bulk(
        &self,
        operations: Vec<BulkOperation>,
        actor_id: i64,
    ) -> Result<BulkReport> {
        if operations.is_empty() {
            return Err(Error::invalid("Operations list cannot be empty"));
        }

        let mut report = BulkReport::default();
        for (index, op) in operations.into_iter().enumerate() {
            let product_id = op.product_id;
            match self
                .apply_movement(product_id, op.action, op.quantity_delta, actor_id, op.note)
                .await
            {
                Ok(entry) => report.applied.push(entry),
                Err(error) => {
                    warn!(index, product_id, %error, "Bulk operation rejected");
                    report.failures.push(BulkFailure {
                        index,
                        product_id,
                        error,
                    });
                }
            }
        }

        info!(
            applied = report.applied.len(),
            failed = report.failures.len(),
            "Bulk stock update finished"
        );
        Ok(report)
    }

    fn after_commit(&self, product: &product_entity::Model, new_stock: i64) {
        if new_stock > product.threshold {
            return;
        }
        if let Some(trigger) = &self.sweep_trigger {
            debug!(product_id = product.id, new_stock, "Product at or below threshold");
            trigger.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::core::movement::{check_ledger, movements_for_product};
    use crate::core::product::get_product;
    use crate::entities::StockMovement;
    use crate::test_utils::*;
    use sea_orm::ConnectionTrait;

    #[test]
    fn test_validate_delta_sign_convention() {
        assert!(validate_delta(MovementAction::Sale, -1).is_ok());
        assert!(validate_delta(MovementAction::Sale, 1).is_err());
        assert!(validate_delta(MovementAction::Return, 2).is_ok());
        assert!(validate_delta(MovementAction::Return, -2).is_err());
        assert!(validate_delta(MovementAction::Restock, 5).is_ok());
        assert!(validate_delta(MovementAction::Restock, -5).is_err());
        assert!(validate_delta(MovementAction::Adjustment, -3).is_ok());
        assert!(validate_delta(MovementAction::Adjustment, 3).is_ok());
        assert!(validate_delta(MovementAction::Adjustment, 0).is_err());
        assert!(validate_delta(MovementAction::Edit, 1).is_err());
    }

    #[tokio::test]
    async fn test_apply_movement_validation_touches_no_storage() -> Result<()> {
        // Neither product 1 nor user 1 exists: reaching storage would fail differently.
        let engine = StockEngine::new(setup_test_db().await?);

        let result = engine
            .apply_movement(1, MovementAction::Sale, 0, 1, None)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        let result = engine
            .apply_movement(1, MovementAction::Edit, 4, 1, None)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_sale_records_snapshot() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;

        let entry = engine
            .apply_movement(product.id, MovementAction::Sale, -3, admin.id, None)
            .await?;

        assert_eq!(entry.previous_stock, 10);
        assert_eq!(entry.new_stock, 7);
        assert_eq!(entry.quantity_delta, -3);
        assert_eq!(entry.action, MovementAction::Sale);
        assert_eq!(entry.actor_id, admin.id);
        assert_eq!(get_product(engine.db(), product.id).await?.stock, 7);

        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_stock_rejected_whole() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;
        engine
            .apply_movement(product.id, MovementAction::Sale, -3, admin.id, None)
            .await?;

        let result = engine
            .apply_movement(product.id, MovementAction::Sale, -8, admin.id, None)
            .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                current: 7,
                delta: -8,
                ..
            })
        ));

        assert_eq!(get_product(engine.db(), product.id).await?.stock, 7);
        // Opening entry plus the successful sale.
        assert_eq!(movements_for_product(engine.db(), product.id).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_product_and_actor() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;

        let result = engine
            .apply_movement(999, MovementAction::Restock, 1, admin.id, None)
            .await;
        assert!(matches!(result, Err(Error::ProductNotFound { id: 999 })));

        let result = engine
            .apply_movement(product.id, MovementAction::Restock, 1, 999, None)
            .await;
        assert!(matches!(result, Err(Error::UserNotFound { id: 999 })));

        assert_eq!(get_product(engine.db(), product.id).await?.stock, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_notes_are_trimmed() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;

        let with_note = engine
            .apply_movement(
                product.id,
                MovementAction::Return,
                1,
                admin.id,
                Some("  damaged box ".to_string()),
            )
            .await?;
        assert_eq!(with_note.note.as_deref(), Some("damaged box"));

        let blank = engine
            .apply_movement(
                product.id,
                MovementAction::Return,
                1,
                admin.id,
                Some("   ".to_string()),
            )
            .await?;
        assert_eq!(blank.note, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_correct_movement_applies_marginal_adjustment() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;
        let sale = engine
            .apply_movement(product.id, MovementAction::Sale, -3, admin.id, None)
            .await?;

        let outcome = engine
            .correct_movement(
                sale.id,
                MovementAction::Sale,
                -5,
                Some("miscounted".to_string()),
                admin.id,
            )
            .await?;

        assert_eq!(outcome.stock_delta, -2);
        assert_eq!(outcome.new_stock, 5);
        assert_eq!(outcome.entry.id, sale.id);
        assert_eq!(outcome.entry.quantity_delta, -5);
        assert_eq!(outcome.entry.previous_stock, 10);
        assert_eq!(outcome.entry.new_stock, 5);
        assert_eq!(outcome.entry.note.as_deref(), Some("miscounted"));

        let audit = &outcome.audit_entry;
        assert_eq!(audit.action, MovementAction::Edit);
        assert_eq!(audit.corrects_entry_id, Some(sale.id));
        assert_eq!(audit.replaced_delta, Some(-3));
        assert_eq!(audit.quantity_delta, -2);
        assert_eq!(audit.previous_stock, 7);
        assert_eq!(audit.new_stock, 5);

        assert_eq!(get_product(engine.db(), product.id).await?.stock, 5);
        assert!(check_ledger(engine.db(), product.id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_correction_equivalent_to_direct_apply() -> Result<()> {
        let (engine, admin, corrected_product) = setup_engine_with_product(20, 5).await?;
        let direct_product = create_custom_product(engine.db(), "SKU-DIRECT", admin.id, 20, 5).await?;

        let entry = engine
            .apply_movement(corrected_product.id, MovementAction::Adjustment, 4, admin.id, None)
            .await?;
        engine
            .correct_movement(entry.id, MovementAction::Adjustment, -6, None, admin.id)
            .await?;

        engine
            .apply_movement(direct_product.id, MovementAction::Adjustment, -6, admin.id, None)
            .await?;

        let corrected = get_product(engine.db(), corrected_product.id).await?;
        let direct = get_product(engine.db(), direct_product.id).await?;
        assert_eq!(corrected.stock, direct.stock);
        assert_eq!(corrected.stock, 14);
        Ok(())
    }

    #[tokio::test]
    async fn test_correction_uses_current_stock_not_snapshot() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 0).await?;
        let sale = engine
            .apply_movement(product.id, MovementAction::Sale, -2, admin.id, None)
            .await?;
        engine
            .apply_movement(product.id, MovementAction::Restock, 30, admin.id, None)
            .await?;

        // Current stock is 38; correcting -2 to -9 takes 7 more.
        let outcome = engine
            .correct_movement(sale.id, MovementAction::Sale, -9, None, admin.id)
            .await?;
        assert_eq!(outcome.new_stock, 31);
        assert_eq!(outcome.audit_entry.previous_stock, 38);
        assert!(check_ledger(engine.db(), product.id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_correction_that_would_go_negative_is_rejected() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(5, 0).await?;
        let sale = engine
            .apply_movement(product.id, MovementAction::Sale, -4, admin.id, None)
            .await?;

        let result = engine
            .correct_movement(sale.id, MovementAction::Sale, -6, None, admin.id)
            .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                current: 1,
                delta: -2,
                ..
            })
        ));

        let unchanged = crate::core::movement::get_movement(engine.db(), sale.id).await?;
        assert_eq!(unchanged, sale);
        assert_eq!(get_product(engine.db(), product.id).await?.stock, 1);
        assert_eq!(movements_for_product(engine.db(), product.id).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_edit_entries_cannot_be_corrected() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 0).await?;
        let sale = engine
            .apply_movement(product.id, MovementAction::Sale, -1, admin.id, None)
            .await?;
        let outcome = engine
            .correct_movement(sale.id, MovementAction::Sale, -2, None, admin.id)
            .await?;

        let result = engine
            .correct_movement(
                outcome.audit_entry.id,
                MovementAction::Adjustment,
                1,
                None,
                admin.id,
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        let missing = engine
            .correct_movement(999, MovementAction::Sale, -1, None, admin.id)
            .await;
        assert!(matches!(missing, Err(Error::MovementNotFound { id: 999 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_correction_can_change_action_type() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 0).await?;
        let sale = engine
            .apply_movement(product.id, MovementAction::Sale, -2, admin.id, None)
            .await?;

        let outcome = engine
            .correct_movement(sale.id, MovementAction::Return, 2, None, admin.id)
            .await?;

        assert_eq!(outcome.entry.action, MovementAction::Return);
        assert_eq!(outcome.stock_delta, 4);
        assert_eq!(outcome.new_stock, 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_ledger_failure_leaves_stock_untouched() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;

        // Make every ledger append fail after the stock write has run.
        engine
            .db()
            .execute_unprepared(
                "CREATE TRIGGER reject_ledger BEFORE INSERT ON stock_movements \
                 BEGIN SELECT RAISE(ABORT, 'ledger unavailable'); END;",
            )
            .await?;

        let result = engine
            .apply_movement(product.id, MovementAction::Sale, -3, admin.id, None)
            .await;
        assert!(result.is_err());

        assert_eq!(get_product(engine.db(), product.id).await?.stock, 10);
        assert_eq!(StockMovement::find().all(engine.db()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_sales_of_last_unit() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(1, 0).await?;

        let first = engine.clone();
        let second = engine.clone();
        let (a, b) = tokio::join!(
            first.apply_movement(product.id, MovementAction::Sale, -1, admin.id, None),
            second.apply_movement(product.id, MovementAction::Sale, -1, admin.id, None),
        );

        let outcomes = [a, b];
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        let insufficient = outcomes
            .iter()
            .filter(|r| matches!(r, Err(Error::InsufficientStock { .. })))
            .count();
        assert_eq!(succeeded, 1);
        assert_eq!(insufficient, 1);

        assert_eq!(get_product(engine.db(), product.id).await?.stock, 0);
        let sales: Vec<_> = movements_for_product(engine.db(), product.id)
            .await?
            .into_iter()
            .filter(|m| m.action == MovementAction::Sale)
            .collect();
        assert_eq!(sales.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_correction_and_sale_are_serialized() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 0).await?;
        let sale = engine
            .apply_movement(product.id, MovementAction::Sale, -2, admin.id, None)
            .await?;

        // Stock is 8. Either order leaves room for only one of the two changes:
        // correction first gives 5 then 5 - 6 fails, sale first gives 2 then 2 - 3 fails.
        let corrector = engine.clone();
        let seller = engine.clone();
        let (corrected, sold) = tokio::join!(
            corrector.correct_movement(sale.id, MovementAction::Sale, -5, None, admin.id),
            seller.apply_movement(product.id, MovementAction::Sale, -6, admin.id, None),
        );

        let stock = get_product(engine.db(), product.id).await?.stock;
        match (corrected, sold) {
            (Ok(outcome), Err(Error::InsufficientStock { current, delta, .. })) => {
                assert_eq!(outcome.new_stock, 5);
                assert_eq!((current, delta), (5, -6));
                assert_eq!(stock, 5);
            }
            (Err(Error::InsufficientStock { current, delta, .. }), Ok(entry)) => {
                assert_eq!(entry.new_stock, 2);
                assert_eq!((current, delta), (2, -3));
                assert_eq!(stock, 2);
            }
            (corrected, sold) => panic!("not a serial outcome: {corrected:?} / {sold:?}"),
        }

        assert!(stock >= 0);
        assert!(check_ledger(engine.db(), product.id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_random_walk_keeps_invariants() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(3, 0).await?;
        let deltas = [-2, 5, -7, -1, 4, -4, 9, -12, 1, -1, -1];
        let mut entries = Vec::new();

        for delta in deltas {
            let action = if delta < 0 {
                MovementAction::Sale
            } else {
                MovementAction::Restock
            };
            if let Ok(entry) = engine
                .apply_movement(product.id, action, delta, admin.id, None)
                .await
            {
                entries.push(entry);
            }
            let stock = get_product(engine.db(), product.id).await?.stock;
            assert!(stock >= 0);
        }

        for (i, entry) in entries.iter().enumerate() {
            let new_delta = if i % 2 == 0 { entry.quantity_delta * 2 } else { 1 };
            let action = if new_delta < 0 {
                MovementAction::Sale
            } else {
                MovementAction::Restock
            };
            let _ = engine
                .correct_movement(entry.id, action, new_delta, None, admin.id)
                .await;
            assert!(get_product(engine.db(), product.id).await?.stock >= 0);
            assert!(check_ledger(engine.db(), product.id).await?.is_consistent());
        }

        // Each row stays self-consistent even after corrections.
        let history = movements_for_product(engine.db(), product.id).await?;
        assert!(history.iter().all(|m| m.new_stock == m.previous_stock + m.quantity_delta));
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_bulk_isolates_failures() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(5, 0).await?;

        let report = engine
            .apply_bulk(
                vec![
                    BulkOperation {
                        product_id: product.id,
                        action: MovementAction::Sale,
                        quantity_delta: -2,
                        note: None,
                    },
                    BulkOperation {
                        product_id: 999,
                        action: MovementAction::Restock,
                        quantity_delta: 1,
                        note: None,
                    },
                    BulkOperation {
                        product_id: product.id,
                        action: MovementAction::Sale,
                        quantity_delta: -10,
                        note: None,
                    },
                    BulkOperation {
                        product_id: product.id,
                        action: MovementAction::Restock,
                        quantity_delta: 4,
                        note: Some("supplier A".to_string()),
                    },
                ],
                admin.id,
            )
            .await?;

        assert!(!report.is_complete());
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].index, 1);
        assert!(report.failures[0].error.is_not_found());
        assert_eq!(report.failures[1].index, 2);
        assert!(matches!(
            report.failures[1].error,
            Error::InsufficientStock { .. }
        ));
        assert_eq!(get_product(engine.db(), product.id).await?.stock, 7);

        assert!(matches!(
            engine.apply_bulk(Vec::new(), admin.id).await,
            Err(Error::InvalidInput { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_low_stock_mutation_nudges_sweep() -> Result<()> {
        let (engine, admin, product) = setup_engine_with_product(10, 5).await?;
        let trigger = SweepTrigger::new();
        let engine = engine.with_sweep_trigger(trigger.clone());

        engine
            .apply_movement(product.id, MovementAction::Sale, -1, admin.id, None)
            .await?;
        assert!(!trigger.is_pending());

        engine
            .apply_movement(product.id, MovementAction::Sale, -4, admin.id, None)
            .await?;
        assert!(trigger.is_pending());
        Ok(())
    }
}
