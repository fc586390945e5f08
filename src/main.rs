use dotenvy::dotenv;
use std::sync::Arc;
use stock_ledger::{
    config::{database, settings},
    core::{NotificationSweep, gateway::LogGateway, movement, product, user},
    errors::Result,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = settings::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Connect and make sure the schema exists
    let database_url = database::get_database_url(app_config.database_url.as_deref());
    if database_url == database::DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data")?;
    }
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))?;

    // 5. Seed operator accounts from config
    user::seed_users(&db, &app_config.users)
        .await
        .inspect_err(|e| error!("Failed to seed users: {}", e))?;

    // 6. Report products whose stock no longer matches their ledger
    for live in product::list_active_products(&db).await? {
        let check = movement::check_ledger(&db, live.id).await?;
        if !check.is_consistent() {
            warn!(
                product_id = check.product_id,
                stock = check.product_stock,
                ledger_sum = check.ledger_sum,
                "Product stock differs from its ledger"
            );
        }
    }

    // 7. Start the notification sweep
    let sweep = NotificationSweep::new(db, Arc::new(LogGateway), app_config.sweep.clone());
    let sweep_handle = sweep.start()?;
    info!("Stock ledger running; press Ctrl-C to stop");

    // 8. Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let stats = sweep_handle.stats();
    sweep_handle.shutdown().await;
    info!(
        runs = stats.runs,
        notifications = stats.notifications_created,
        "Stopped"
    );

    Ok(())
}
