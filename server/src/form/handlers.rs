//! Submission Handlers
//!
//! HTTP entry points of the pipeline: multipart submission intake and the
//! public schema view a client uses to configure its advisory checks.

use std::collections::HashMap;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use fp_common::{base_field_name, FormField, SubmittedFile};

use crate::api::AppState;
use crate::email::ResolvedMail;
use crate::form::attachments::{substitute_mail_tags, AttachmentAssembler};
use crate::form::messages::ids;
use crate::form::validation::ValidationPipeline;

// ============================================================================
// Error Types
// ============================================================================

/// One failing field, per the validation failure contract.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct FieldError {
    /// The field that failed.
    pub field_name: String,
    /// Stable identifier of the failing rule.
    pub rule_id: String,
    /// Rendered, user-facing message.
    pub message: String,
}

/// Errors that can occur while handling a submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Mail dispatch is not configured; accepting files would strand them.
    #[error("Mail dispatch is not configured")]
    NotConfigured,

    /// The multipart stream could not be parsed.
    #[error("Malformed submission: {0}")]
    Malformed(String),

    /// One or more fields failed validation.
    #[error("{message}")]
    Validation {
        /// Rendered envelope message.
        message: String,
        /// Per-field failures, one per failing field.
        errors: Vec<FieldError>,
    },

    /// Moving validated uploads into storage failed.
    #[error("{message}")]
    Storage {
        /// Rendered, user-facing message.
        message: String,
    },

    /// The outbound message could not be dispatched.
    #[error("{message}")]
    Dispatch {
        /// Rendered, user-facing message.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("Submission failed")]
    Internal(String),
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal submission error");
        }

        let (status, code, message) = match &self {
            Self::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "MAIL_NOT_CONFIGURED",
                self.to_string(),
            ),
            Self::Malformed(_) => (
                StatusCode::BAD_REQUEST,
                "MALFORMED_SUBMISSION",
                self.to_string(),
            ),
            Self::Validation { message, .. } => {
                (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message.clone())
            }
            Self::Storage { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                message.clone(),
            ),
            Self::Dispatch { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "MAIL_FAILED",
                message.clone(),
            ),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let mut body = serde_json::json!({
            "error": code,
            "message": message,
        });
        if let Self::Validation { errors, .. } = self {
            body["errors"] = serde_json::to_value(errors).unwrap_or_default();
        }

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Response for an accepted, dispatched submission.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmitResponse {
    /// Outcome tag (`mail_sent`).
    pub status: String,
    /// Rendered, user-facing message.
    pub message: String,
}

/// Public view of the active form schema.
#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    /// Whether submissions must be multipart-encoded.
    pub requires_multipart: bool,
    /// Fields with their limits, in form order.
    pub fields: Vec<FormField>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Accept one form submission.
///
/// POST /api/forms/submit
///
/// Multipart form; binary parts arrive under `fieldname[]` names. Runs the
/// full pipeline: validation → storage → attachment assembly → dispatch →
/// dispatched-event emission.
#[utoipa::path(
    post,
    path = "/api/forms/submit",
    tag = "forms",
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SubmitResponse),
        (status = 400, description = "Malformed submission or validation failure"),
        (status = 500, description = "Storage or dispatch failure"),
    ),
)]
#[tracing::instrument(skip(state, multipart))]
pub async fn submit_form(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, SubmitError> {
    // Fail-closed before accepting any payload
    let mailer = state.mailer.as_ref().ok_or(SubmitError::NotConfigured)?;

    let submission_id = Uuid::now_v7();
    let spool = tempfile::tempdir().map_err(|e| SubmitError::Internal(e.to_string()))?;

    // ------------------------------------------------------------------
    // Receive: spool every binary part, collect text values
    // ------------------------------------------------------------------
    let mut text_values: HashMap<String, String> = HashMap::new();
    let mut files_by_field: HashMap<String, Vec<SubmittedFile>> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SubmitError::Malformed(e.to_string()))?
    {
        let part_name = field.name().unwrap_or_default().to_string();
        let field_name = base_field_name(&part_name).to_string();

        if let Some(original_name) = field.file_name().map(String::from) {
            let claimed_mime = field
                .content_type()
                .map(String::from)
                .or_else(|| {
                    mime_guess::from_path(&original_name)
                        .first()
                        .map(|m| m.to_string())
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());

            let temp_path = spool.path().join(Uuid::new_v4().to_string());
            let submitted = match field.bytes().await {
                Ok(data) => {
                    // Browsers send an empty part for a file input left blank
                    if original_name.is_empty() && data.is_empty() {
                        continue;
                    }
                    let upload_error = tokio::fs::write(&temp_path, &data)
                        .await
                        .err()
                        .map(|e| e.to_string());
                    SubmittedFile {
                        field_name: field_name.clone(),
                        original_name,
                        claimed_mime,
                        size_bytes: data.len() as u64,
                        temp_path,
                        upload_error,
                    }
                }
                Err(e) => SubmittedFile {
                    field_name: field_name.clone(),
                    original_name,
                    claimed_mime,
                    size_bytes: 0,
                    temp_path,
                    upload_error: Some(e.to_string()),
                },
            };
            files_by_field.entry(field_name).or_default().push(submitted);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| SubmitError::Malformed(e.to_string()))?;
            text_values.insert(field_name, value);
        }
    }

    // ------------------------------------------------------------------
    // Validate: fixed rule order per field, fail-fast within each field
    // ------------------------------------------------------------------
    let empty: Vec<SubmittedFile> = Vec::new();
    let mut errors = Vec::new();
    for config in state.schema.file_fields() {
        let files = files_by_field.get(&config.name).unwrap_or(&empty);
        let pipeline = ValidationPipeline::for_field(config, &state.catalog)
            .map_err(|e| SubmitError::Internal(format!("bad accepted-type pattern: {e}")))?;
        let verdict = pipeline.evaluate(files);
        if let Some(failure) = verdict.failure {
            errors.push(FieldError {
                field_name: verdict.field_name,
                rule_id: failure.rule_id.to_string(),
                message: failure.message,
            });
        }
    }
    if !errors.is_empty() {
        tracing::info!(
            %submission_id,
            failed_fields = errors.len(),
            "Submission rejected by validation"
        );
        return Err(SubmitError::Validation {
            message: state.catalog.text(ids::VALIDATION_ERROR),
            errors,
        });
    }

    // ------------------------------------------------------------------
    // Store: all-or-nothing move into the storage root
    // ------------------------------------------------------------------
    let known: Vec<SubmittedFile> = state
        .schema
        .file_fields()
        .filter_map(|config| files_by_field.remove(&config.name))
        .flatten()
        .collect();
    for unknown in files_by_field.keys() {
        tracing::debug!(field_name = %unknown, "Ignoring files for a field not in the schema");
    }

    let stored = state.storage.store_submission(&known).map_err(|e| {
        tracing::error!(%submission_id, error = %e, "Failed to move uploads into storage");
        SubmitError::Storage {
            message: state.catalog.text(ids::UPLOAD_FAILED),
        }
    })?;

    state.registry.register(submission_id, &stored);

    // ------------------------------------------------------------------
    // Assemble: attachments + mail-tag substitution from stored paths
    // ------------------------------------------------------------------
    let assembler = AttachmentAssembler::new(state.config.list_separator.clone());
    let attachments = assembler.assemble(&stored);

    let mut tag_values = text_values;
    for config in state.schema.file_fields() {
        tag_values.insert(
            config.name.clone(),
            assembler.mail_tag_value(&stored, &config.name),
        );
    }
    let mail = ResolvedMail {
        to: state.schema.mail.to.clone(),
        subject: substitute_mail_tags(&state.schema.mail.subject, &tag_values),
        body: substitute_mail_tags(&state.schema.mail.body, &tag_values),
    };

    // ------------------------------------------------------------------
    // Dispatch, then signal the cleaner. No event on failure: the stored
    // files persist until a dispatch succeeds.
    // ------------------------------------------------------------------
    if let Err(e) = mailer.send_submission(&mail, &attachments).await {
        tracing::error!(%submission_id, error = %e, "Mail dispatch failed; stored files kept");
        return Err(SubmitError::Dispatch {
            message: state.catalog.text(ids::MAIL_SENT_NG),
        });
    }

    state.dispatch.notify_dispatched(submission_id);

    tracing::info!(
        %submission_id,
        stored_files = stored.len(),
        attachments = attachments.len(),
        "Submission dispatched"
    );

    Ok(Json(SubmitResponse {
        status: "mail_sent".to_string(),
        message: state.catalog.text(ids::MAIL_SENT_OK),
    }))
}

/// Public limits of the active form.
///
/// GET /api/forms/schema
#[utoipa::path(
    get,
    path = "/api/forms/schema",
    tag = "forms",
    responses(
        (status = 200, description = "Field limits and encoding requirements"),
    ),
)]
pub async fn get_schema(State(state): State<AppState>) -> Json<SchemaResponse> {
    Json(SchemaResponse {
        requires_multipart: state.schema.requires_multipart(),
        fields: state.schema.fields.clone(),
    })
}
