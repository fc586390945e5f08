//! Notification business logic - Stored stock alerts and their maintenance.
//!
//! Notifications are created by the sweep and afterwards only ever marked read.
//! Read notifications past the retention window are deleted by a cleanup that the
//! sweep scheduler runs at most once per calendar day; the date of the last
//! cleanup is kept in the `system_state` table.

use crate::{
    core::{
        report::{Page, PageRequest},
        user,
    },
    entities::{Notification, NotificationType, SystemState, notification, system_state},
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{PaginatorTrait, QueryOrder, Set, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::{debug, info, instrument};

const LAST_CLEANUP_KEY: &str = "last_notification_cleanup";

/// Stores a new unread notification.
pub async fn create_notification<C>(
    db: &C,
    user_id: i64,
    product_id: i64,
    notification_type: NotificationType,
    message: String,
    created_at: DateTime<Utc>,
) -> Result<notification::Model>
where
    C: ConnectionTrait,
{
    notification::ActiveModel {
        user_id: Set(user_id),
        product_id: Set(product_id),
        notification_type: Set(notification_type),
        message: Set(message),
        is_read: Set(false),
        created_at: Set(created_at),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Whether `user_id` already has a `notification_type` alert for `product_id`
/// created at or after `since`. Read state does not matter.
pub async fn has_recent_notification<C>(
    db: &C,
    user_id: i64,
    product_id: i64,
    notification_type: NotificationType,
    since: DateTime<Utc>,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let count = Notification::find()
        .filter(notification::Column::UserId.eq(user_id))
        .filter(notification::Column::ProductId.eq(product_id))
        .filter(notification::Column::NotificationType.eq(notification_type))
        .filter(notification::Column::CreatedAt.gte(since))
        .count(db)
        .await?;
    Ok(count > 0)
}

/// A user's notifications, newest first.
///
/// # Errors
/// Returns [`Error::InvalidInput`] for an invalid page.
pub async fn list_for_user(
    db: &DatabaseConnection,
    user_id: i64,
    unread_only: bool,
    page: PageRequest,
) -> Result<Page<notification::Model>> {
    let page = PageRequest::new(page.page, page.page_size)?;
    let mut query = Notification::find().filter(notification::Column::UserId.eq(user_id));
    if unread_only {
        query = query.filter(notification::Column::IsRead.eq(false));
    }
    let paginator = query
        .order_by_desc(notification::Column::CreatedAt)
        .order_by_desc(notification::Column::Id)
        .paginate(db, page.page_size);

    Ok(Page {
        total_count: paginator.num_items().await?,
        items: paginator.fetch_page(page.page - 1).await?,
        page: page.page,
        page_size: page.page_size,
    })
}

/// Number of unread notifications of a user.
pub async fn unread_count(db: &DatabaseConnection, user_id: i64) -> Result<u64> {
    Notification::find()
        .filter(notification::Column::UserId.eq(user_id))
        .filter(notification::Column::IsRead.eq(false))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Marks one of the user's notifications as read.
///
/// # Errors
/// Returns [`Error::NotificationNotFound`] if the notification does not exist or
/// belongs to another user.
pub async fn mark_as_read(
    db: &DatabaseConnection,
    notification_id: i64,
    user_id: i64,
) -> Result<notification::Model> {
    let notification = Notification::find_by_id(notification_id)
        .filter(notification::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(Error::NotificationNotFound {
            id: notification_id,
        })?;

    if notification.is_read {
        return Ok(notification);
    }
    let mut active_model: notification::ActiveModel = notification.into();
    active_model.is_read = Set(true);
    active_model.update(db).await.map_err(Into::into)
}

/// Marks all of a user's notifications as read. Returns how many changed.
pub async fn mark_all_as_read(db: &DatabaseConnection, user_id: i64) -> Result<u64> {
    let result = Notification::update_many()
        .col_expr(notification::Column::IsRead, Expr::value(true))
        .filter(notification::Column::UserId.eq(user_id))
        .filter(notification::Column::IsRead.eq(false))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Deletes read notifications created before `now - retention`. Unread ones are kept
/// regardless of age. Returns how many were deleted.
#[instrument(skip(db))]
pub async fn cleanup_old_notifications(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> Result<u64> {
    let cutoff = now - retention;
    let result = Notification::delete_many()
        .filter(notification::Column::IsRead.eq(true))
        .filter(notification::Column::CreatedAt.lt(cutoff))
        .exec(db)
        .await?;
    info!(deleted = result.rows_affected, %cutoff, "Cleaned up old notifications");
    Ok(result.rows_affected)
}

/// Retrieves the date of the last retention cleanup.
pub async fn last_cleanup_date(db: &DatabaseConnection) -> Result<Option<NaiveDate>> {
    let state = SystemState::find()
        .filter(system_state::Column::Key.eq(LAST_CLEANUP_KEY))
        .one(db)
        .await?;

    state
        .map(|s| {
            NaiveDate::parse_from_str(&s.value, "%Y-%m-%d").map_err(|e| Error::Config {
                message: format!("Failed to parse last cleanup date: {e}"),
            })
        })
        .transpose()
}

async fn set_last_cleanup_date(db: &DatabaseConnection, date: NaiveDate) -> Result<()> {
    let value = date.format("%Y-%m-%d").to_string();
    let now = Utc::now().naive_utc();

    let existing = SystemState::find()
        .filter(system_state::Column::Key.eq(LAST_CLEANUP_KEY))
        .one(db)
        .await?;

    if let Some(state) = existing {
        let mut active_model: system_state::ActiveModel = state.into();
        active_model.value = Set(value);
        active_model.updated_at = Set(now);
        active_model.update(db).await?;
    } else {
        system_state::ActiveModel {
            key: Set(LAST_CLEANUP_KEY.to_string()),
            value: Set(value),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

/// Runs [`cleanup_old_notifications`] unless it already ran on `now`'s calendar day.
///
/// # Returns
/// * `Ok(Some(deleted))` - Cleanup ran
/// * `Ok(None)` - Already cleaned up today
pub async fn run_daily_cleanup(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> Result<Option<u64>> {
    let today = now.date_naive();
    if last_cleanup_date(db).await? == Some(today) {
        debug!(%today, "Notification cleanup already ran today");
        return Ok(None);
    }
    let deleted = cleanup_old_notifications(db, now, retention).await?;
    set_last_cleanup_date(db, today).await?;
    Ok(Some(deleted))
}

/// Notification counts for the admin overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationStats {
    /// Low-stock alerts created in the window
    pub low_stock: u64,
    /// Out-of-stock alerts created in the window
    pub out_of_stock: u64,
    /// Unread notifications of any age
    pub unread: u64,
    /// Number of users
    pub total_users: u64,
}

/// Counts alerts created since `since` by type, plus global unread and user counts.
///
/// # Errors
/// Returns [`Error::Forbidden`] unless `actor_id` is an active admin.
pub async fn notification_stats(
    db: &DatabaseConnection,
    actor_id: i64,
    since: DateTime<Utc>,
) -> Result<NotificationStats> {
    user::require_admin(db, actor_id).await?;

    let of_type = |kind: NotificationType| {
        Notification::find()
            .filter(notification::Column::NotificationType.eq(kind))
            .filter(notification::Column::CreatedAt.gte(since))
    };

    Ok(NotificationStats {
        low_stock: of_type(NotificationType::LowStock).count(db).await?,
        out_of_stock: of_type(NotificationType::OutOfStock).count(db).await?,
        unread: Notification::find()
            .filter(notification::Column::IsRead.eq(false))
            .count(db)
            .await?,
        total_users: crate::entities::User::find().count(db).await?,
    })
}
