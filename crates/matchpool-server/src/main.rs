// Matchpool server entry point.
//
// Startup sequence:
// 1. Load config (copying defaults on first run)
// 2. Initialize tracing to the configured log directory
// 3. Open the database, replay the journal and seed admin accounts
// 4. Spawn the WebSocket server task
// 5. Run the application loop until Ctrl+C

use matchpool_core::config::{self, Config};
use matchpool_core::db;
use matchpool_server::{app, ws_server};

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;

    init_tracing(&config)?;
    info!(
        "{} starting: {} commission {}, slot policy {:?}, unclaimed pool {:?}",
        config.platform.name,
        config.platform.currency,
        config.platform.house_commission,
        config.platform.slot_policy,
        config.platform.unclaimed_pool
    );

    let db_path = config.server.database.path.clone();
    let db = db::Database::open(&db_path).context("failed to open database")?;
    info!("Database opened at {db_path}");

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (updates_tx, _) = broadcast::channel(256);

    let mut app_state = app::AppState::new(config.clone(), db, updates_tx.clone());
    match app::recover_from_db(&mut app_state) {
        Ok(true) => info!("Book restored from journal"),
        Ok(false) => info!("Starting with an empty book"),
        Err(e) => {
            error!("Crash recovery failed: {e:#}");
            return Err(e.context("crash recovery failed"));
        }
    }
    let seeded = app::seed_admins(&mut app_state, chrono::Utc::now())?;
    if seeded > 0 {
        info!("Seeded {seeded} admin accounts");
    }

    let ws_addr = config.server.ws_addr();
    let listener = ws_server::TungsteniteListener::bind(&ws_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {ws_addr}"))?;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, cmd_tx, updates_tx).await {
            error!("WebSocket server error: {e:#}");
        }
    });

    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(cmd_rx, app_state).await {
            error!("Application loop error: {e:#}");
        }
    });

    info!("Ready. WebSocket server listening on {ws_addr}");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    // Open connections still hold command senders, so the wait is bounded.
    ws_handle.abort();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), app_handle).await;

    info!("Matchpool shut down cleanly");
    Ok(())
}

/// Log to a file under the configured directory. `RUST_LOG` overrides the
/// configured filter.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join(&config.server.logging.directory);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_file = std::fs::File::create(log_dir.join("matchpool.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.logging.filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
