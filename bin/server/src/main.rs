use docshelf_access::{LdapDialer, OAuthClient};
use docshelf_server::{
    auth::{AppState, SessionManager, Stores},
    bootstrap,
    config::ServerConfig,
    router::router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load and check configuration
    let config = ServerConfig::from_env().expect("failed to load configuration");
    config.validate().expect("invalid configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let stores = Stores::postgres(db_pool);

    bootstrap::sync_config(&stores, &config.group_mappings, &config.global_access_rules)
        .await
        .expect("failed to synchronise configured access rules");

    if let (Some(username), Some(password)) =
        (&config.local.admin_username, &config.local.admin_password)
    {
        bootstrap::ensure_local_admin(stores.users.as_ref(), username, password)
            .await
            .expect("failed to create bootstrap admin");
    }

    let mut state = AppState::new(&stores, config.session.clone());
    if config.local.enabled {
        state = state.with_local();
    }
    if let Some(directory) = config.directory {
        tracing::info!(url = %directory.url, "Directory login enabled");
        state = state
            .with_directory(directory, Arc::new(LdapDialer))
            .expect("invalid directory configuration");
    }
    if let Some(oidc) = config.oidc {
        tracing::info!("Preparing identity provider client...");
        let client = OAuthClient::from_config(&oidc)
            .await
            .expect("failed to prepare identity provider client");
        state = state
            .with_oidc(oidc, Arc::new(client))
            .expect("invalid identity provider configuration");
    }
    tracing::info!(authenticators = ?state.login.names(), "Login chain ready");

    spawn_session_cleanup(state.sessions.clone()).await;

    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Deletes expired sessions now, then on the configured interval.
async fn spawn_session_cleanup(sessions: SessionManager) {
    match sessions.purge_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_sessions = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }

    let period = std::time::Duration::from_secs(sessions.config().cleanup_interval_seconds);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match sessions.purge_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });
}
