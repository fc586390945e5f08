//! Product business logic - The product store.
//!
//! This module owns product identity (SKU and barcode uniqueness), product details,
//! and archiving. It deliberately has no way for callers to set stock directly:
//! stock only changes through [`crate::core::stock::StockEngine`], which uses the
//! crate-internal `set_stock` inside its own transaction. A product created with
//! an initial quantity gets an opening ledger entry in the same transaction so the
//! ledger sums to the product's stock from the first moment.

use crate::{
    core::user,
    entities::{MovementAction, Product, product, stock_movement},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{Condition, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument, warn};

/// Fields needed to create a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    /// Unique stock keeping unit
    pub sku: String,
    /// Unique barcode
    pub barcode: String,
    /// Display name
    pub name: String,
    /// Opening stock; recorded as an opening ledger entry when positive
    pub initial_stock: i64,
    /// Low-stock threshold
    pub threshold: i64,
    /// Optional unit price
    pub price: Option<f64>,
    /// Optional expiry date
    pub expiry_date: Option<NaiveDate>,
    /// Optional external category reference
    pub category_id: Option<i64>,
    /// Operator creating the product
    pub created_by: i64,
}

/// Editable product fields. Stock is intentionally absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDetails {
    /// Display name
    pub name: String,
    /// Low-stock threshold
    pub threshold: i64,
    /// Optional unit price
    pub price: Option<f64>,
    /// Optional expiry date
    pub expiry_date: Option<NaiveDate>,
    /// Optional external category reference
    pub category_id: Option<i64>,
}

/// Which identifier collided in a uniqueness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    /// The SKU is taken
    Sku,
    /// The barcode is taken
    Barcode,
}

impl UniqueField {
    /// Field name as used in [`Error::Conflict`]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sku => "sku",
            Self::Barcode => "barcode",
        }
    }
}

fn validate_threshold(threshold: i64) -> Result<()> {
    if threshold < 0 {
        return Err(Error::invalid(format!(
            "Threshold cannot be negative: {threshold}"
        )));
    }
    Ok(())
}

fn validate_price(price: Option<f64>) -> Result<()> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => {
            Err(Error::invalid(format!("Invalid price: {p}")))
        }
        _ => Ok(()),
    }
}

/// Retrieves a product by id, including archived products.
pub async fn find_product_by_id<C>(db: &C, product_id: i64) -> Result<Option<product::Model>>
where
    C: ConnectionTrait,
{
    Product::find_by_id(product_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a live (non-archived) product by id.
///
/// # Errors
/// Returns [`Error::ProductNotFound`] if the product does not exist or is archived.
pub async fn get_product<C>(db: &C, product_id: i64) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    find_product_by_id(db, product_id)
        .await?
        .filter(|p| !p.is_deleted)
        .ok_or(Error::ProductNotFound { id: product_id })
}

/// Finds a product by SKU.
pub async fn find_product_by_sku(
    db: &DatabaseConnection,
    sku: &str,
) -> Result<Option<product::Model>> {
    Product::find()
        .filter(product::Column::Sku.eq(sku.trim()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a product by barcode.
pub async fn find_product_by_barcode(
    db: &DatabaseConnection,
    barcode: &str,
) -> Result<Option<product::Model>> {
    Product::find()
        .filter(product::Column::Barcode.eq(barcode.trim()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Checks whether a SKU or barcode is already taken, optionally ignoring one product
/// (the one being edited). Returns the first colliding field, SKU before barcode.
///
/// Archived products still hold their identifiers.
///
/// # Errors
/// Returns [`Error::InvalidInput`] when neither identifier is given.
pub async fn check_unique<C>(
    db: &C,
    sku: Option<&str>,
    barcode: Option<&str>,
    exclude_id: Option<i64>,
) -> Result<Option<UniqueField>>
where
    C: ConnectionTrait,
{
    if sku.is_none() && barcode.is_none() {
        return Err(Error::invalid("sku or barcode is required"));
    }

    let mut any = Condition::any();
    if let Some(sku) = sku {
        any = any.add(product::Column::Sku.eq(sku.trim()));
    }
    if let Some(barcode) = barcode {
        any = any.add(product::Column::Barcode.eq(barcode.trim()));
    }
    let mut query = Product::find().filter(any);
    if let Some(id) = exclude_id {
        query = query.filter(product::Column::Id.ne(id));
    }

    let found = query.all(db).await?;
    if sku.is_some_and(|s| found.iter().any(|p| p.sku == s.trim())) {
        return Ok(Some(UniqueField::Sku));
    }
    if barcode.is_some_and(|b| found.iter().any(|p| p.barcode == b.trim())) {
        return Ok(Some(UniqueField::Barcode));
    }
    Ok(None)
}

/// Creates a product, checking SKU and barcode uniqueness.
///
/// When `initial_stock` is positive an `Adjustment` ledger entry (0 -> initial) is
/// written in the same transaction.
///
/// # Errors
/// Returns an error if:
/// - SKU, barcode, or name is empty
/// - Initial stock, threshold, or price is negative
/// - The creator does not exist
/// - The SKU or barcode already exists ([`Error::Conflict`])
#[instrument(skip(db, new_product), fields(sku = %new_product.sku))]
pub async fn create_product(
    db: &DatabaseConnection,
    new_product: NewProduct,
) -> Result<product::Model> {
    let sku = new_product.sku.trim().to_string();
    let barcode = new_product.barcode.trim().to_string();
    let name = new_product.name.trim().to_string();

    if sku.is_empty() || barcode.is_empty() {
        return Err(Error::invalid("SKU and barcode are required"));
    }
    if name.is_empty() {
        return Err(Error::invalid("Product name cannot be empty"));
    }
    if new_product.initial_stock < 0 {
        return Err(Error::invalid(format!(
            "Initial stock cannot be negative: {}",
            new_product.initial_stock
        )));
    }
    validate_threshold(new_product.threshold)?;
    validate_price(new_product.price)?;

    let txn = db.begin().await?;

    user::require_active_user(&txn, new_product.created_by).await?;

    if let Some(field) = check_unique(&txn, Some(&sku), Some(&barcode), None).await? {
        let value = match field {
            UniqueField::Sku => sku,
            UniqueField::Barcode => barcode,
        };
        return Err(Error::Conflict {
            field: field.as_str().to_string(),
            value,
        });
    }

    let now = chrono::Utc::now();
    let product = product::ActiveModel {
        sku: Set(sku),
        barcode: Set(barcode),
        name: Set(name),
        stock: Set(new_product.initial_stock),
        threshold: Set(new_product.threshold),
        price: Set(new_product.price),
        expiry_date: Set(new_product.expiry_date),
        category_id: Set(new_product.category_id),
        is_deleted: Set(false),
        created_by: Set(Some(new_product.created_by)),
        created_at: Set(now.naive_utc()),
        updated_at: Set(now.naive_utc()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if new_product.initial_stock > 0 {
        stock_movement::ActiveModel {
            product_id: Set(product.id),
            action: Set(MovementAction::Adjustment),
            quantity_delta: Set(new_product.initial_stock),
            previous_stock: Set(0),
            new_stock: Set(new_product.initial_stock),
            actor_id: Set(new_product.created_by),
            note: Set(Some("Opening stock".to_string())),
            corrects_entry_id: Set(None),
            replaced_delta: Set(None),
            timestamp: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;
    info!(product_id = product.id, "Product created");
    Ok(product)
}

/// Updates a product's descriptive fields and threshold. Never touches stock.
///
/// # Errors
/// Returns an error if the product does not exist, the name is empty, or the
/// threshold or price is negative.
pub async fn update_product_details(
    db: &DatabaseConnection,
    product_id: i64,
    details: ProductDetails,
) -> Result<product::Model> {
    let name = details.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::invalid("Product name cannot be empty"));
    }
    validate_threshold(details.threshold)?;
    validate_price(details.price)?;

    let product = get_product(db, product_id).await?;
    let mut active_model: product::ActiveModel = product.into();
    active_model.name = Set(name);
    active_model.threshold = Set(details.threshold);
    active_model.price = Set(details.price);
    active_model.expiry_date = Set(details.expiry_date);
    active_model.category_id = Set(details.category_id);
    active_model.updated_at = Set(chrono::Utc::now().naive_utc());
    active_model.update(db).await.map_err(Into::into)
}

/// Archives (soft-deletes) a product. Its ledger history is kept and it no longer
/// accepts movements or appears in the notification sweep.
pub async fn archive_product(db: &DatabaseConnection, product_id: i64) -> Result<product::Model> {
    let product = get_product(db, product_id).await?;
    let mut active_model: product::ActiveModel = product.into();
    active_model.is_deleted = Set(true);
    active_model.updated_at = Set(chrono::Utc::now().naive_utc());
    let archived = active_model.update(db).await?;
    info!(product_id, "Product archived");
    Ok(archived)
}

/// All live products, ordered by name.
pub async fn list_active_products<C>(db: &C) -> Result<Vec<product::Model>>
where
    C: ConnectionTrait,
{
    Product::find()
        .filter(product::Column::IsDeleted.eq(false))
        .order_by_asc(product::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Writes a product's stock. Only the stock engine calls this, inside its transaction
/// and while holding the product lock.
///
/// The update is a compare-and-set on `expected_stock`: it only lands if the stored
/// stock still equals the value the caller read. A mismatch means another writer got
/// in between and is reported as [`Error::TransientStorage`], so the whole mutation
/// can be retried.
pub(crate) async fn set_stock<C>(
    db: &C,
    product_id: i64,
    expected_stock: i64,
    new_stock: i64,
) -> Result<()>
where
    C: ConnectionTrait,
{
    if new_stock < 0 {
        return Err(Error::invalid(format!(
            "Stock cannot be negative: {new_stock}"
        )));
    }

    let result = Product::update_many()
        .col_expr(product::Column::Stock, Expr::value(new_stock))
        .col_expr(
            product::Column::UpdatedAt,
            Expr::value(chrono::Utc::now().naive_utc()),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::IsDeleted.eq(false))
        .filter(product::Column::Stock.eq(expected_stock))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        // Tell a vanished product apart from a lost race.
        get_product(db, product_id).await?;
        warn!(product_id, expected_stock, "Stock changed underneath the update");
        return Err(Error::TransientStorage {
            message: format!(
                "Stock of product {product_id} changed concurrently; expected {expected_stock}"
            ),
        });
    }
    Ok(())
}
