use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use conversation_service::config::{Config, StorageBackend};
use conversation_service::middleware::{SessionKeys, SessionMiddleware};
use conversation_service::repository::{
    ConversationStore, InMemoryConversationStore, PgConversationStore,
};
use conversation_service::workers::start_receipt_cleanup;
use conversation_service::{handlers, ConversationLedger};
use db_pool::{create_pool, DbConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "conversation-service";

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into());

    let json = log_format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn build_store(config: &Config) -> Result<Arc<dyn ConversationStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(InMemoryConversationStore::new()))
        }
        StorageBackend::Postgres => {
            let db_config =
                DbConfig::from_env(SERVICE_NAME).context("Invalid database configuration")?;
            db_config.log_config();

            let pool = create_pool(db_config)
                .await
                .context("Failed to create database pool")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");

            Ok(Arc::new(PgConversationStore::new(pool)))
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.app.log_format);

    tracing::info!("Starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));
    tracing::info!(
        env = %config.app.env,
        backend = ?config.storage.backend,
        require_auth_for_saves = config.ledger.require_auth_for_saves,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;
    let ledger = ConversationLedger::new(store, config.ledger_settings());

    let session_keys = config
        .session
        .jwt_secret
        .as_deref()
        .map(|secret| Arc::new(SessionKeys::from_secret(secret)));
    if session_keys.is_none() {
        tracing::warn!("SESSION_JWT_SECRET not set; bearer sessions will be rejected");
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let cleanup = tokio::spawn(start_receipt_cleanup(
        ledger.clone(),
        config.receipt_cleanup(),
        shutdown_tx.subscribe(),
    ));

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("HTTP server listening on {}", bind_address);

    let ledger_data = web::Data::new(ledger);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(ledger_data.clone())
            .wrap(SessionMiddleware::new(session_keys.clone()))
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let mut server_task = tokio::spawn(server);

    let server_result = tokio::select! {
        result = &mut server_task => result,
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("Shutdown signal received");
            server_handle.stop(true).await;
            (&mut server_task).await
        }
    };

    let _ = shutdown_tx.send(());
    if let Err(e) = cleanup.await {
        tracing::warn!("Receipt cleanup task ended abnormally: {}", e);
    }
    server_result
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;

    tracing::info!("{} shut down", SERVICE_NAME);
    Ok(())
}
