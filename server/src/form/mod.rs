//! Form Submission Pipeline
//!
//! The server-side sequence for multi-file submissions: validation →
//! storage → attachment assembly → dispatch → cleanup.

pub mod attachments;
pub mod cleanup;
pub mod dispatch;
pub mod handlers;
pub mod messages;
pub mod schema;
pub mod storage;
pub mod validation;

use axum::routing::{get, post};
use axum::Router;

use crate::api::AppState;

pub use cleanup::{LifecycleCleaner, SubmissionRegistry};
pub use dispatch::{DispatchBus, DispatchEvent};
pub use schema::{FormSchema, MailTemplate};
pub use storage::{SecureStorageManager, StoredFile};

/// Create the forms router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/submit", post(handlers::submit_form))
        .route("/schema", get(handlers::get_schema))
}
