//! Notification sweep - Background scan for low and out-of-stock products.
//!
//! One cycle walks IDLE -> SCANNING -> DEDUPING -> DISPATCHING -> IDLE:
//! live products at or below threshold are paired with every active user, pairs
//! whose user does not want that alert type or already received it inside the
//! dedup window are dropped, and each surviving pair gets exactly one stored
//! notification plus one delivery per enabled channel.
//!
//! The sweep only reads products and writes notifications; it takes no product
//! lock. Cycles are serialized process-wide, so a manual run and a scheduled run
//! never dedup against the same stale view. A scheduler started with
//! [`NotificationSweep::start`] repeats the cycle on an interval and runs the daily
//! retention cleanup. Only one scheduler may run per process.

use crate::{
    config::settings::SweepConfig,
    core::{
        gateway::{MessagingGateway, OutgoingMessage},
        notification,
        report::StockBucket,
        user::{self, NotificationPreferences},
    },
    entities::{NotificationType, Product, product, user as user_entity},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, QueryOrder, prelude::*, sea_query::Expr};
use serde::Serialize;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::{Mutex as AsyncMutex, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, instrument, warn};

static SCHEDULER_RUNNING: AtomicBool = AtomicBool::new(false);

/// Held for the whole of a cycle: dedup reads and inserts of two cycles never interleave.
static CYCLE_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Clears the process-wide scheduler flag when the scheduler task ends, even on panic.
struct SchedulerSlot;

impl SchedulerSlot {
    fn claim() -> Result<Self> {
        SCHEDULER_RUNNING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self)
            .map_err(|_| Error::SweepAlreadyRunning)
    }
}

impl Drop for SchedulerSlot {
    fn drop(&mut self) {
        SCHEDULER_RUNNING.store(false, Ordering::SeqCst);
    }
}

/// Requests an early sweep run. Cheap to clone; a no-op when no scheduler is running.
#[derive(Debug, Clone, Default)]
pub struct SweepTrigger {
    notify: Arc<Notify>,
    pending: Arc<AtomicBool>,
}

impl SweepTrigger {
    /// Creates a trigger not yet attached to a scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the scheduler to run as soon as it is idle. Repeated calls coalesce.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a requested run has not started yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn take(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}

/// Where the sweep currently is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepPhase {
    /// Waiting for the next run
    #[default]
    Idle,
    /// Looking for products at or below threshold
    Scanning,
    /// Dropping unwanted and recently alerted pairs
    Deduping,
    /// Storing and delivering alerts
    Dispatching,
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Products found at or below threshold
    pub candidates: usize,
    /// (user, product) pairs examined
    pub pairs_considered: usize,
    /// Pairs dropped because no channel of the user wants the alert type
    pub skipped_by_preference: usize,
    /// Pairs dropped because the same alert is inside the dedup window
    pub skipped_duplicates: usize,
    /// Notification rows written
    pub notifications_created: usize,
    /// Successful gateway deliveries
    pub deliveries_sent: usize,
    /// Failed gateway deliveries; their notifications are kept
    pub delivery_failures: usize,
    /// Pairs that failed on storage and were skipped
    pub storage_failures: usize,
    /// True when shutdown stopped the cycle before every pair was handled
    pub interrupted: bool,
}

/// Running totals of a sweep since it was created.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    /// Completed cycles
    pub runs: u64,
    pub notifications_created: u64,
    pub deliveries_sent: u64,
    pub delivery_failures: u64,
    pub failed_runs: u64,
    pub phase: SweepPhase,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SweepStats {
    fn record(&mut self, at: DateTime<Utc>, report: &SweepReport) {
        self.runs += 1;
        self.notifications_created += report.notifications_created as u64;
        self.deliveries_sent += report.deliveries_sent as u64;
        self.delivery_failures += report.delivery_failures as u64;
        self.last_run_at = Some(at);
    }
}

#[derive(Debug, Default)]
struct SweepShared {
    stop: AtomicBool,
    stats: Mutex<SweepStats>,
}

impl SweepShared {
    fn with_stats<R>(&self, f: impl FnOnce(&mut SweepStats) -> R) -> R {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_phase(&self, phase: SweepPhase) {
        self.with_stats(|stats| stats.phase = phase);
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

struct Candidate {
    product: product::Model,
    kind: NotificationType,
}

struct Survivor<'a> {
    candidate: &'a Candidate,
    user: &'a user_entity::Model,
    preferences: NotificationPreferences,
}

fn alert_text(product: &product::Model, kind: NotificationType) -> (String, String) {
    match kind {
        NotificationType::OutOfStock => (
            format!("URGENT: Stock Out Alert - {}", product.name),
            format!(
                "{} (SKU: {}) is OUT OF STOCK. Immediate restocking required.",
                product.name, product.sku
            ),
        ),
        NotificationType::LowStock => (
            format!("Low Stock Alert - {}", product.name),
            format!(
                "{} (SKU: {}) is running low. Current stock: {}, Threshold: {}",
                product.name, product.sku, product.stock, product.threshold
            ),
        ),
    }
}

/// The notification sweep and its scheduler.
pub struct NotificationSweep {
    db: DatabaseConnection,
    gateway: Arc<dyn MessagingGateway>,
    config: SweepConfig,
    trigger: SweepTrigger,
    shared: Arc<SweepShared>,
}

impl NotificationSweep {
    /// Creates a sweep over `db` delivering through `gateway`.
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        gateway: Arc<dyn MessagingGateway>,
        config: SweepConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            config,
            trigger: SweepTrigger::new(),
            shared: Arc::default(),
        }
    }

    /// Trigger that requests an early run from this sweep's scheduler.
    #[must_use]
    pub fn trigger_handle(&self) -> SweepTrigger {
        self.trigger.clone()
    }

    /// Runs one cycle now.
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Runs one cycle with `now` as the reference time for dedup and timestamps.
    #[instrument(skip(self))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let _cycle = CYCLE_LOCK.lock().await;
        let result = self.run_cycle(now).await;
        self.shared.set_phase(SweepPhase::Idle);
        match &result {
            Ok(report) => self.shared.with_stats(|stats| stats.record(now, report)),
            Err(e) => self.shared.with_stats(|stats| {
                stats.failed_runs += 1;
                stats.last_error = Some(e.to_string());
            }),
        }
        result
    }

    /// Manually triggered run on behalf of a user.
    ///
    /// # Errors
    /// Returns [`Error::Forbidden`] unless `actor_id` is an active admin.
    pub async fn run_once_as(&self, actor_id: i64) -> Result<SweepReport> {
        user::require_admin(&self.db, actor_id).await?;
        info!(actor_id, "Manual notification sweep requested");
        self.run_once().await
    }

    async fn scan(&self) -> Result<Vec<Candidate>> {
        let products = Product::find()
            .filter(product::Column::IsDeleted.eq(false))
            .filter(Expr::col(product::Column::Stock).lte(Expr::col(product::Column::Threshold)))
            .order_by_asc(product::Column::Id)
            .all(&self.db)
            .await?;

        Ok(products
            .into_iter()
            .filter_map(|product| {
                StockBucket::classify(product.stock, product.threshold)
                    .alert()
                    .map(|kind| Candidate { product, kind })
            })
            .collect())
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        self.shared.set_phase(SweepPhase::Scanning);
        let candidates = self.scan().await?;
        report.candidates = candidates.len();
        if candidates.is_empty() {
            debug!("No products at or below threshold");
            return Ok(report);
        }
        let users = user::list_active_users(&self.db).await?;

        self.shared.set_phase(SweepPhase::Deduping);
        let since = now - self.config.dedup_window();
        let mut survivors = Vec::new();
        'dedup: for candidate in &candidates {
            for user in &users {
                if self.shared.stopping() {
                    report.interrupted = true;
                    break 'dedup;
                }
                report.pairs_considered += 1;

                let preferences = NotificationPreferences::from_model(user);
                if !preferences.wants(candidate.kind) {
                    report.skipped_by_preference += 1;
                    continue;
                }

                match notification::has_recent_notification(
                    &self.db,
                    user.id,
                    candidate.product.id,
                    candidate.kind,
                    since,
                )
                .await
                {
                    Ok(true) => report.skipped_duplicates += 1,
                    Ok(false) => survivors.push(Survivor {
                        candidate,
                        user,
                        preferences,
                    }),
                    Err(e) => {
                        warn!(user_id = user.id, product_id = candidate.product.id, error = %e, "Dedup lookup failed");
                        report.storage_failures += 1;
                    }
                }
            }
        }

        self.shared.set_phase(SweepPhase::Dispatching);
        for survivor in survivors {
            if self.shared.stopping() {
                report.interrupted = true;
                break;
            }
            self.dispatch(&survivor, now, &mut report).await;
        }

        info!(
            candidates = report.candidates,
            created = report.notifications_created,
            sent = report.deliveries_sent,
            failed = report.delivery_failures,
            duplicates = report.skipped_duplicates,
            interrupted = report.interrupted,
            "Notification sweep finished"
        );
        Ok(report)
    }

    async fn dispatch(&self, survivor: &Survivor<'_>, now: DateTime<Utc>, report: &mut SweepReport) {
        let Survivor {
            candidate,
            user,
            preferences,
        } = survivor;
        let (subject, body) = alert_text(&candidate.product, candidate.kind);

        if let Err(e) = notification::create_notification(
            &self.db,
            user.id,
            candidate.product.id,
            candidate.kind,
            body.clone(),
            now,
        )
        .await
        {
            error!(user_id = user.id, product_id = candidate.product.id, error = %e, "Failed to store notification");
            report.storage_failures += 1;
            return;
        }
        report.notifications_created += 1;

        for channel in preferences.channels_for(candidate.kind) {
            let message = OutgoingMessage {
                user_id: user.id,
                channel,
                recipient: user.email.clone(),
                subject: subject.clone(),
                body: body.clone(),
            };
            match self.gateway.send(&message).await {
                Ok(receipt) => {
                    debug!(user_id = user.id, channel = channel.as_str(), reference = %receipt.reference, "Alert delivered");
                    report.deliveries_sent += 1;
                }
                Err(e) => {
                    warn!(user_id = user.id, channel = channel.as_str(), error = %e, "Alert delivery failed");
                    report.delivery_failures += 1;
                }
            }
        }
    }

    async fn run_scheduled(&self) {
        self.trigger.take();
        let now = Utc::now();
        if let Err(e) = self.run_once_at(now).await {
            error!(error = %e, "Notification sweep failed");
        }
        match notification::run_daily_cleanup(&self.db, now, self.config.retention()).await {
            Ok(Some(deleted)) => info!(deleted, "Daily notification cleanup done"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Daily notification cleanup failed"),
        }
    }

    /// Starts the background scheduler.
    ///
    /// The first run happens after the configured initial delay, then every interval
    /// or sooner when triggered.
    ///
    /// # Errors
    /// Returns [`Error::SweepAlreadyRunning`] if a scheduler is already running in
    /// this process.
    pub fn start(self) -> Result<SweepHandle> {
        let slot = SchedulerSlot::claim()?;
        self.shared.stop.store(false, Ordering::SeqCst);

        let sweep = Arc::new(self);
        let shutdown = Arc::new(Notify::new());
        let task_sweep = Arc::clone(&sweep);
        let task_shutdown = Arc::clone(&shutdown);

        let join = tokio::spawn(async move {
            let _slot = slot;
            let sweep = task_sweep;
            info!(
                interval_secs = sweep.config.interval_secs,
                initial_delay_secs = sweep.config.initial_delay_secs,
                "Notification sweep started"
            );

            let first_run = tokio::time::Instant::now() + sweep.config.initial_delay();
            let mut interval = tokio::time::interval_at(first_run, sweep.config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = task_shutdown.notified() => break,
                    () = sweep.trigger.notify.notified() => debug!("Sweep triggered early"),
                    _ = interval.tick() => {}
                }
                if sweep.shared.stopping() {
                    break;
                }
                sweep.run_scheduled().await;
            }

            info!("Notification sweep stopped");
        });

        Ok(SweepHandle {
            shutdown,
            join: Some(join),
            sweep,
        })
    }
}

/// Handle to a running sweep scheduler.
pub struct SweepHandle {
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
    sweep: Arc<NotificationSweep>,
}

impl SweepHandle {
    /// Requests an early run.
    pub fn trigger(&self) {
        self.sweep.trigger.trigger();
    }

    /// A trigger that can be handed to the stock engine.
    #[must_use]
    pub fn trigger_handle(&self) -> SweepTrigger {
        self.sweep.trigger_handle()
    }

    /// Manually triggered run on behalf of a user, queued behind any cycle the
    /// scheduler has in progress.
    ///
    /// # Errors
    /// Returns [`Error::Forbidden`] unless `actor_id` is an active admin.
    pub async fn run_once_as(&self, actor_id: i64) -> Result<SweepReport> {
        self.sweep.run_once_as(actor_id).await
    }

    /// Snapshot of the scheduler's running totals.
    #[must_use]
    pub fn stats(&self) -> SweepStats {
        self.sweep.shared.with_stats(|stats| stats.clone())
    }

    /// Stops the scheduler and waits for it to finish. A cycle in progress stops
    /// after the pair it is handling.
    pub async fn shutdown(mut self) {
        self.sweep.shared.stop.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "Notification sweep task ended abnormally");
            }
        }
    }
}
