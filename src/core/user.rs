//! User business logic - Operator accounts, roles, and notification preferences.
//!
//! Users are an external collaborator of the ledger: the engine only needs to know
//! that an actor exists, whether it is an admin, and which alerts it wants on which
//! channel. Preferences default to the email channel fully on and push fully off.

use crate::{
    config::settings::UserSeed,
    entities::{NotificationType, Role, User, user},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Delivery channel for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    /// Email delivery
    Email,
    /// Push delivery
    Push,
}

impl NotificationChannel {
    /// Lowercase channel name used in logs and errors
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
        }
    }
}

/// Alert switches for a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    /// Master switch; nothing is sent on a disabled channel
    pub enabled: bool,
    /// Low-stock alerts
    pub low_stock: bool,
    /// Out-of-stock alerts
    pub stock_out: bool,
    /// System alerts
    pub system_alerts: bool,
}

impl ChannelPreferences {
    const fn all(enabled: bool) -> Self {
        Self {
            enabled,
            low_stock: enabled,
            stock_out: enabled,
            system_alerts: enabled,
        }
    }

    /// Whether this channel should carry alerts of `kind`.
    #[must_use]
    pub const fn allows(&self, kind: NotificationType) -> bool {
        self.enabled
            && match kind {
                NotificationType::LowStock => self.low_stock,
                NotificationType::OutOfStock => self.stock_out,
            }
    }
}

/// Per-channel notification preferences of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Email channel switches
    pub email: ChannelPreferences,
    /// Push channel switches
    pub push: ChannelPreferences,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: ChannelPreferences::all(true),
            push: ChannelPreferences::all(false),
        }
    }
}

impl NotificationPreferences {
    /// Reads the preference flags stored on a user row.
    #[must_use]
    pub const fn from_model(user: &user::Model) -> Self {
        Self {
            email: ChannelPreferences {
                enabled: user.email_enabled,
                low_stock: user.email_low_stock,
                stock_out: user.email_stock_out,
                system_alerts: user.email_system_alerts,
            },
            push: ChannelPreferences {
                enabled: user.push_enabled,
                low_stock: user.push_low_stock,
                stock_out: user.push_stock_out,
                system_alerts: user.push_system_alerts,
            },
        }
    }

    /// Channels that should carry an alert of `kind`, in delivery order.
    #[must_use]
    pub fn channels_for(&self, kind: NotificationType) -> Vec<NotificationChannel> {
        let mut channels = Vec::with_capacity(2);
        if self.email.allows(kind) {
            channels.push(NotificationChannel::Email);
        }
        if self.push.allows(kind) {
            channels.push(NotificationChannel::Push);
        }
        channels
    }

    /// Whether any channel wants alerts of `kind`.
    #[must_use]
    pub const fn wants(&self, kind: NotificationType) -> bool {
        self.email.allows(kind) || self.push.allows(kind)
    }

    fn apply_to(self, model: &mut user::ActiveModel) {
        model.email_enabled = Set(self.email.enabled);
        model.email_low_stock = Set(self.email.low_stock);
        model.email_stock_out = Set(self.email.stock_out);
        model.email_system_alerts = Set(self.email.system_alerts);
        model.push_enabled = Set(self.push.enabled);
        model.push_low_stock = Set(self.push.low_stock);
        model.push_stock_out = Set(self.push.stock_out);
        model.push_system_alerts = Set(self.push.system_alerts);
    }
}

/// Creates a user with default notification preferences.
///
/// # Errors
/// Returns an error if:
/// - The name or email is empty, or the email has no `@`
/// - Another user already has this email
/// - The database insert fails
pub async fn create_user(
    db: &DatabaseConnection,
    name: String,
    email: String,
    role: Role,
) -> Result<user::Model> {
    let name = name.trim().to_string();
    let email = email.trim().to_lowercase();

    if name.is_empty() {
        return Err(Error::invalid("User name cannot be empty"));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(Error::invalid(format!("Invalid email address: {email:?}")));
    }

    if find_user_by_email(db, &email).await?.is_some() {
        return Err(Error::Conflict {
            field: "email".to_string(),
            value: email,
        });
    }

    let mut model = user::ActiveModel {
        name: Set(name),
        email: Set(email),
        role: Set(role),
        is_active: Set(true),
        created_at: Set(chrono::Utc::now().naive_utc()),
        ..Default::default()
    };
    NotificationPreferences::default().apply_to(&mut model);

    model.insert(db).await.map_err(Into::into)
}

/// Finds a user by email (case-insensitive, stored lowercase).
pub async fn find_user_by_email<C>(db: &C, email: &str) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Email.eq(email.trim().to_lowercase()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Loads a user by id.
///
/// # Errors
/// Returns [`Error::UserNotFound`] if no such user exists.
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or(Error::UserNotFound { id: user_id })
}

/// Loads a user that is allowed to act: it must exist and be active.
pub async fn require_active_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = get_user(db, user_id).await?;
    if user.is_active {
        Ok(user)
    } else {
        Err(Error::UserNotFound { id: user_id })
    }
}

/// Loads an active user and checks it holds the admin role.
///
/// # Errors
/// Returns [`Error::Forbidden`] for non-admin actors.
pub async fn require_admin<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = require_active_user(db, user_id).await?;
    match user.role {
        Role::Admin => Ok(user),
        Role::Staff => Err(Error::Forbidden {
            message: format!("user {user_id} is not an administrator"),
        }),
    }
}

/// All active users, ordered by id. These are the sweep's alert recipients.
pub async fn list_active_users<C>(db: &C) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::IsActive.eq(true))
        .order_by_asc(user::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Reads a user's notification preferences.
pub async fn get_preferences(
    db: &DatabaseConnection,
    user_id: i64,
) -> Result<NotificationPreferences> {
    let user = get_user(db, user_id).await?;
    Ok(NotificationPreferences::from_model(&user))
}

/// Replaces a user's notification preferences and returns the stored values.
pub async fn update_preferences(
    db: &DatabaseConnection,
    user_id: i64,
    preferences: NotificationPreferences,
) -> Result<NotificationPreferences> {
    let user = get_user(db, user_id).await?;
    let mut active_model: user::ActiveModel = user.into();
    preferences.apply_to(&mut active_model);
    let updated = active_model.update(db).await?;
    Ok(NotificationPreferences::from_model(&updated))
}

/// Marks a user inactive. Inactive users stop receiving alerts and cannot act.
pub async fn deactivate_user(db: &DatabaseConnection, user_id: i64) -> Result<user::Model> {
    let user = get_user(db, user_id).await?;
    let mut active_model: user::ActiveModel = user.into();
    active_model.is_active = Set(false);
    active_model.update(db).await.map_err(Into::into)
}

/// Creates the configured users that do not exist yet. Returns how many were created.
#[instrument(skip(db, seeds), fields(seeds = seeds.len()))]
pub async fn seed_users(db: &DatabaseConnection, seeds: &[UserSeed]) -> Result<usize> {
    let mut created = 0;
    for seed in seeds {
        if find_user_by_email(db, &seed.email).await?.is_some() {
            continue;
        }
        create_user(db, seed.name.clone(), seed.email.clone(), seed.role).await?;
        created += 1;
    }
    info!(created, "User seeding complete");
    Ok(created)
}
