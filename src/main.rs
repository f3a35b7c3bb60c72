use std::sync::Arc;

use launch_notify::api::{AppState, app_routes};
use launch_notify::config::AppConfig;
use launch_notify::mail::{LoggingMailTransport, MailTransport, SmtpMailTransport};
use launch_notify::store::{Database, LibSqlBackend};
use launch_notify::tasks::{HttpTaskQueue, LoggingTaskQueue, TaskQueue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Warning: a rustls crypto provider was already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("launch-notify v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   App: {} ({})", config.mail.app_id, config.mail.environment.as_str());
    eprintln!("   Sending email: {}", config.mail.send_email);
    eprintln!("   Database: {}", config.db_path);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> =
        Arc::new(LibSqlBackend::new_local(std::path::Path::new(&config.db_path)).await?);

    // ── Mail transport ───────────────────────────────────────────────────
    let transport: Arc<dyn MailTransport> = match &config.smtp {
        Some(smtp) => {
            eprintln!("   SMTP relay: {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailTransport::new(smtp)?)
        }
        None => {
            eprintln!("   SMTP relay: not configured (mail is logged)");
            Arc::new(LoggingMailTransport)
        }
    };

    // ── Task queue ───────────────────────────────────────────────────────
    let tasks: Arc<dyn TaskQueue> = match &config.tasks_base_url {
        Some(base) => {
            eprintln!("   Task handler: {base}");
            Arc::new(HttpTaskQueue::new(base.clone()))
        }
        None => {
            eprintln!("   Task handler: not configured (tasks are logged)");
            Arc::new(LoggingTaskQueue)
        }
    };

    let port = config.port;
    let state = AppState::new(config, db, tasks, transport);
    let app = app_routes(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "HTTP server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
