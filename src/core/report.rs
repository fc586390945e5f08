//! Report generation business logic - Filtered, paginated reads over the ledger and products.
//!
//! Everything here is read-only. Pagination is 1-based with page sizes between 1 and
//! [`MAX_PAGE_SIZE`]; sort fields come from a closed whitelist parsed with [`FromStr`]
//! so callers can pass query-string values straight through.

use crate::{
    core::product::find_product_by_id,
    entities::{MovementAction, NotificationType, Product, StockMovement, product, stock_movement},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    Condition, DatabaseConnection, FromQueryResult, Order, PaginatorTrait, QueryOrder, Select,
    prelude::*,
    sea_query::Expr,
};
use serde::Serialize;
use std::str::FromStr;

/// Largest accepted page size
pub const MAX_PAGE_SIZE: u64 = 100;
/// Page size used by [`PageRequest::default`]
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page number, starting at 1
    pub page: u64,
    /// Items per page, 1..=[`MAX_PAGE_SIZE`]
    pub page_size: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Builds a validated page request.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for page 0 or a page size outside 1..=100.
    pub fn new(page: u64, page_size: u64) -> Result<Self> {
        let request = Self { page, page_size };
        request.validate()?;
        Ok(request)
    }

    fn validate(self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::invalid("Page numbers start at 1"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::invalid(format!(
                "Page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Number of items across all pages
    pub total_count: u64,
    /// Page number, starting at 1
    pub page: u64,
    /// Requested page size
    pub page_size: u64,
}

impl<T> Page<T> {
    /// Number of pages needed for `total_count` items.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_count.div_ceil(self.page_size)
    }
}

/// Runs a paginated select. Callers add an id tiebreak so pages are stable.
async fn fetch_page<E, M>(db: &DatabaseConnection, query: Select<E>, request: PageRequest) -> Result<Page<M>>
where
    E: EntityTrait<Model = M>,
    M: FromQueryResult + Sized + Send + Sync + 'static,
{
    request.validate()?;
    let paginator = query.paginate(db, request.page_size);
    let total_count = paginator.num_items().await?;
    let items = paginator.fetch_page(request.page - 1).await?;
    Ok(Page {
        items,
        total_count,
        page: request.page,
        page_size: request.page_size,
    })
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first
    Asc,
    /// Largest first
    #[default]
    Desc,
}

impl SortOrder {
    const fn order(self) -> Order {
        match self {
            Self::Asc => Order::Asc,
            Self::Desc => Order::Desc,
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::invalid(format!("Unknown sort order: {other}"))),
        }
    }
}

/// Whitelisted sort fields for ledger listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementSortField {
    /// Entry timestamp
    #[default]
    Timestamp,
    /// Ledger order
    Id,
    /// Product id
    ProductId,
    /// Action name
    Action,
    /// Signed quantity delta
    QuantityDelta,
}

impl MovementSortField {
    const fn column(self) -> stock_movement::Column {
        match self {
            Self::Timestamp => stock_movement::Column::Timestamp,
            Self::Id => stock_movement::Column::Id,
            Self::ProductId => stock_movement::Column::ProductId,
            Self::Action => stock_movement::Column::Action,
            Self::QuantityDelta => stock_movement::Column::QuantityDelta,
        }
    }
}

impl FromStr for MovementSortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Self::Timestamp),
            "id" => Ok(Self::Id),
            "product_id" => Ok(Self::ProductId),
            "action" => Ok(Self::Action),
            "quantity_delta" | "quantity" => Ok(Self::QuantityDelta),
            other => Err(Error::invalid(format!("Cannot sort movements by {other}"))),
        }
    }
}

/// Sort specification for ledger listings. Defaults to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovementSort {
    /// Primary sort field
    pub field: MovementSortField,
    /// Direction
    pub order: SortOrder,
}

/// Filter for ledger listings. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    /// Only entries of this product
    pub product_id: Option<i64>,
    /// Only entries of this action
    pub action: Option<MovementAction>,
    /// Only entries recorded (or last corrected) by this actor
    pub actor_id: Option<i64>,
    /// Inclusive lower timestamp bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound
    pub to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    fn condition(&self) -> Result<Condition> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(Error::invalid("Date range start is after its end"));
            }
        }

        let mut condition = Condition::all();
        if let Some(product_id) = self.product_id {
            condition = condition.add(stock_movement::Column::ProductId.eq(product_id));
        }
        if let Some(action) = self.action {
            condition = condition.add(stock_movement::Column::Action.eq(action));
        }
        if let Some(actor_id) = self.actor_id {
            condition = condition.add(stock_movement::Column::ActorId.eq(actor_id));
        }
        if let Some(from) = self.from {
            condition = condition.add(stock_movement::Column::Timestamp.gte(from));
        }
        if let Some(to) = self.to {
            condition = condition.add(stock_movement::Column::Timestamp.lte(to));
        }
        Ok(condition)
    }
}

/// Lists ledger entries matching `filter`, one page at a time.
///
/// # Errors
/// Returns [`Error::InvalidInput`] for an invalid page or an inverted date range.
pub async fn list_movements(
    db: &DatabaseConnection,
    filter: &MovementFilter,
    page: PageRequest,
    sort: MovementSort,
) -> Result<Page<stock_movement::Model>> {
    let order = sort.order.order();
    let query = StockMovement::find()
        .filter(filter.condition()?)
        .order_by(sort.field.column(), order.clone())
        .order_by(stock_movement::Column::Id, order);
    fetch_page(db, query, page).await
}

/// Ledger of one product, newest first. Archived products keep their history.
///
/// # Errors
/// Returns [`Error::ProductNotFound`] if the product never existed.
pub async fn stock_history(
    db: &DatabaseConnection,
    product_id: i64,
    page: PageRequest,
) -> Result<Page<stock_movement::Model>> {
    if find_product_by_id(db, product_id).await?.is_none() {
        return Err(Error::ProductNotFound { id: product_id });
    }
    let query = StockMovement::find()
        .filter(stock_movement::Column::ProductId.eq(product_id))
        .order_by_desc(stock_movement::Column::Id);
    fetch_page(db, query, page).await
}

/// Stock level bucket of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StockBucket {
    /// Above threshold
    Good,
    /// Above zero, at or below threshold
    Low,
    /// Zero
    Out,
}

impl StockBucket {
    /// Classifies a stock level against a threshold.
    #[must_use]
    pub const fn classify(stock: i64, threshold: i64) -> Self {
        if stock <= 0 {
            Self::Out
        } else if stock <= threshold {
            Self::Low
        } else {
            Self::Good
        }
    }

    /// Alert type raised for this bucket, if any.
    #[must_use]
    pub const fn alert(self) -> Option<NotificationType> {
        match self {
            Self::Good => None,
            Self::Low => Some(NotificationType::LowStock),
            Self::Out => Some(NotificationType::OutOfStock),
        }
    }

    fn condition(self) -> Condition {
        let stock = || Expr::col(product::Column::Stock);
        let threshold = || Expr::col(product::Column::Threshold);
        match self {
            Self::Out => Condition::all().add(stock().lte(0)),
            Self::Low => Condition::all()
                .add(stock().gt(0))
                .add(stock().lte(threshold())),
            Self::Good => Condition::all().add(stock().gt(threshold())),
        }
    }
}

impl FromStr for StockBucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(Self::Good),
            "low" => Ok(Self::Low),
            "out" => Ok(Self::Out),
            other => Err(Error::invalid(format!("Unknown stock status: {other}"))),
        }
    }
}

/// Current stock position of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockStatus {
    pub product_id: i64,
    pub sku: String,
    pub name: String,
    /// Current stock
    pub current: i64,
    /// Low-stock threshold
    pub threshold: i64,
    pub bucket: StockBucket,
}

/// Reports a live product's stock against its threshold.
///
/// # Errors
/// Returns [`Error::ProductNotFound`] for unknown or archived products.
pub async fn get_stock_status(db: &DatabaseConnection, product_id: i64) -> Result<StockStatus> {
    let product = crate::core::product::get_product(db, product_id).await?;
    Ok(StockStatus {
        product_id: product.id,
        bucket: StockBucket::classify(product.stock, product.threshold),
        current: product.stock,
        threshold: product.threshold,
        sku: product.sku,
        name: product.name,
    })
}

/// Whitelisted sort fields for product listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductSortField {
    /// Product name
    #[default]
    Name,
    /// SKU
    Sku,
    /// Current stock
    Stock,
    /// Low-stock threshold
    Threshold,
    /// Creation time
    CreatedAt,
    /// Last update time
    UpdatedAt,
}

impl ProductSortField {
    const fn column(self) -> product::Column {
        match self {
            Self::Name => product::Column::Name,
            Self::Sku => product::Column::Sku,
            Self::Stock => product::Column::Stock,
            Self::Threshold => product::Column::Threshold,
            Self::CreatedAt => product::Column::CreatedAt,
            Self::UpdatedAt => product::Column::UpdatedAt,
        }
    }
}

impl FromStr for ProductSortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "sku" => Ok(Self::Sku),
            "stock" => Ok(Self::Stock),
            "threshold" => Ok(Self::Threshold),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            other => Err(Error::invalid(format!("Cannot sort products by {other}"))),
        }
    }
}

/// Filter for product listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    /// Only products in this stock bucket
    pub bucket: Option<StockBucket>,
    /// Substring matched against name, SKU and barcode
    pub search: Option<String>,
    /// Include archived products
    pub include_archived: bool,
}

/// Lists products matching `filter`.
///
/// # Errors
/// Returns [`Error::InvalidInput`] for an invalid page.
pub async fn list_products(
    db: &DatabaseConnection,
    filter: &ProductFilter,
    page: PageRequest,
    sort_field: ProductSortField,
    sort_order: SortOrder,
) -> Result<Page<product::Model>> {
    let mut query = Product::find();
    if !filter.include_archived {
        query = query.filter(product::Column::IsDeleted.eq(false));
    }
    if let Some(bucket) = filter.bucket {
        query = query.filter(bucket.condition());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(
            Condition::any()
                .add(product::Column::Name.contains(search))
                .add(product::Column::Sku.contains(search))
                .add(product::Column::Barcode.contains(search)),
        );
    }

    let order = sort_order.order();
    let query = query
        .order_by(sort_field.column(), order.clone())
        .order_by(product::Column::Id, order);
    fetch_page(db, query, page).await
}

/// Counts of live products per stock bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    /// Live products
    pub total: u64,
    pub good: u64,
    pub low: u64,
    pub out: u64,
}

/// Summarizes live products by stock bucket.
pub async fn inventory_summary(db: &DatabaseConnection) -> Result<InventorySummary> {
    let live = || Product::find().filter(product::Column::IsDeleted.eq(false));

    Ok(InventorySummary {
        total: live().count(db).await?,
        good: live().filter(StockBucket::Good.condition()).count(db).await?,
        low: live().filter(StockBucket::Low.condition()).count(db).await?,
        out: live().filter(StockBucket::Out.condition()).count(db).await?,
    })
}
