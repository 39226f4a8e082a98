//! Fieldpost Server - Main Entry Point
//!
//! Form submission backend with multi-file attachment ingestion.

use anyhow::Result;
use tracing::info;

use fp_server::email::EmailService;
use fp_server::{api, config, form};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fp_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Fieldpost server"
    );

    // Load the form schema
    let schema = form::FormSchema::load(&config.schema_path)?;
    info!(
        fields = schema.fields.len(),
        requires_multipart = schema.requires_multipart(),
        "Form schema loaded"
    );

    // Initialize mail dispatch (optional - submissions are rejected without it)
    let mailer = if config.has_smtp() {
        match EmailService::from_config(&config) {
            Ok(service) => match service.test_connection().await {
                Ok(()) => {
                    info!("SMTP relay connected");
                    Some(service)
                }
                Err(e) => {
                    tracing::warn!("SMTP connection test failed: {e}. Mail dispatch disabled.");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("SMTP initialization failed: {e}. Mail dispatch disabled.");
                None
            }
        }
    } else {
        tracing::warn!("SMTP not configured. Submissions will be rejected at intake.");
        None
    };

    // Build application state
    let state = api::AppState::new(config, schema, mailer);

    // Cleanup subscriber; fire-and-forget relative to the dispatch path
    form::LifecycleCleaner::new(state.registry.clone()).spawn(&state.dispatch);

    // Build router
    let bind_address = state.config.bind_address.clone();
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
