//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::email::EmailService;
use crate::form;
use crate::form::messages::MessageCatalog;
use crate::form::{DispatchBus, FormSchema, SecureStorageManager, SubmissionRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// The active form schema
    pub schema: Arc<FormSchema>,
    /// Message catalog (defaults + schema overrides)
    pub catalog: Arc<MessageCatalog>,
    /// Storage root manager
    pub storage: SecureStorageManager,
    /// Mail dispatch (optional; submissions are rejected without it)
    pub mailer: Option<EmailService>,
    /// Stored-file sets awaiting cleanup, by submission
    pub registry: SubmissionRegistry,
    /// Dispatched-event bus
    pub dispatch: DispatchBus,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, schema: FormSchema, mailer: Option<EmailService>) -> Self {
        let catalog = MessageCatalog::new(schema.messages.clone());
        let storage = SecureStorageManager::new(config.storage_dir.clone());
        Self {
            config: Arc::new(config),
            schema: Arc::new(schema),
            catalog: Arc::new(catalog),
            storage,
            mailer,
            registry: SubmissionRegistry::new(),
            dispatch: DispatchBus::new(),
        }
    }

    /// Check if mail dispatch is configured and available.
    #[must_use]
    pub const fn has_mailer(&self) -> bool {
        self.mailer.is_some()
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Body limit sized for multipart submissions (default is 2MB)
    let max_upload_size = state.config.max_upload_size;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Submission pipeline
        .nest("/api/forms", form::router())
        // API documentation
        .merge(api_docs())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_upload_size))
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether mail dispatch is configured
    mail_dispatch: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mail_dispatch: state.has_mailer(),
    })
}

/// API documentation routes.
fn api_docs() -> Router<AppState> {
    // TODO: assemble the utoipa::path annotations into an OpenApi document
    Router::new()
}
