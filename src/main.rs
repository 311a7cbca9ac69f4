use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dataset_issues::app::mailer::Mailer;
use dataset_issues::config::{AppConfig, StoreBackend};
use dataset_issues::http;
use dataset_issues::infra::db::Db;
use dataset_issues::infra::mail::LogMailer;
use dataset_issues::infra::memory::{MemoryDirectory, MemoryStore};
use dataset_issues::infra::queue::QueueClient;
use dataset_issues::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let mailer: Arc<dyn Mailer> = match &config.mail_queue {
        Some(queue) => {
            let client = QueueClient::new(queue).await?;
            tracing::info!(queue = client.queue_name(), "sending notification emails via relay queue");
            Arc::new(client)
        }
        None => {
            tracing::info!("no mail queue configured, notification emails are only logged");
            Arc::new(LogMailer)
        }
    };

    let state = match config.store_backend {
        StoreBackend::Postgres => {
            let db = Db::connect(&config).await?;
            db.migrate().await?;
            AppState::postgres(db, mailer, &config)
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, nothing survives a restart");
            AppState::memory(
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryDirectory::new(
                    config.issues.update_dataset_roles.clone(),
                )),
                mailer,
                &config,
            )
        }
    };

    let app: Router = http::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
