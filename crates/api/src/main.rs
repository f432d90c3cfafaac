use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tidings_core::config::ActivityConfig;
use tidings_db::Storage;
use tidings_events::delivery::email::{EmailConfig, EmailDelivery, SmtpMailTransport};
use tidings_events::delivery::slack::{SlackConfig, SlackTarget};
use tidings_events::delivery::sns::{AmazonSnsTarget, SnsConfig};
use tidings_events::delivery::template::TemplateRegistry;
use tidings_events::delivery::webhook::WebhookTarget;
use tidings_events::{ActivityServices, NotifiableRegistry, OptionalTargetRegistry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidings_api::config::ServerConfig;
use tidings_api::router::build_app_router;
use tidings_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidings_api=debug,tidings_events=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let activity = Arc::new(ActivityConfig::from_env().expect("Invalid activity configuration"));
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Storage ---
    let storage = match &config.database_url {
        Some(url) => {
            let pool = tidings_db::create_pool(url)
                .await
                .expect("Failed to connect to database");
            tidings_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");
            Storage::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping notifications in memory");
            Storage::in_memory()
        }
    };

    // --- Notifiable policies ---
    let notifiables = match &config.notifiable_config_path {
        Some(path) => NotifiableRegistry::from_path(path).expect("Failed to load notifiable config"),
        None => NotifiableRegistry::new(),
    };
    tracing::info!(types = notifiables.len(), "Notifiable types configured");

    // --- Email ---
    let mut templates = TemplateRegistry::new();
    if let Some(dir) = &config.template_dir {
        let loaded = templates
            .load_dir(dir)
            .expect("Failed to load mail templates");
        tracing::info!(loaded, dir = %dir.display(), "Mail templates loaded");
    }
    let email = match EmailConfig::from_env() {
        Some(email_config) => {
            let transport = SmtpMailTransport::new(&email_config).expect("Invalid SMTP configuration");
            tracing::info!(host = %email_config.smtp_host, "Email delivery configured");
            Some(Arc::new(EmailDelivery::new(
                Arc::new(transport),
                Arc::new(templates),
                &activity,
            )))
        }
        None => {
            tracing::info!("SMTP_HOST not set, email delivery disabled");
            None
        }
    };

    // --- Optional targets ---
    let mut optional_targets = OptionalTargetRegistry::new();
    if let Some(slack) = SlackConfig::from_env() {
        optional_targets.register(Arc::new(
            SlackTarget::new(slack).expect("Failed to build Slack client"),
        ));
    }
    if let Some(sns) = SnsConfig::from_env() {
        optional_targets.register(Arc::new(AmazonSnsTarget::connect(sns).await));
    }
    optional_targets.register(Arc::new(
        WebhookTarget::new(std::env::var("WEBHOOK_URL").ok()).expect("Failed to build webhook client"),
    ));

    // --- Services ---
    let services = ActivityServices::new(
        activity,
        storage,
        notifiables,
        optional_targets,
        email,
    );

    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(
        services
            .delivery_worker()
            .run(services.bus.subscribe(), cancel.clone()),
    );
    let batch_scheduler = services.batch_scheduler();
    let batch_cancel = cancel.clone();
    let batch_handle = tokio::spawn(async move {
        batch_scheduler.run(batch_cancel).await;
    });
    tracing::info!("Background services started (delivery worker, batch scheduler)");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        services,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(grace, worker_handle).await;
    let _ = tokio::time::timeout(grace, batch_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
