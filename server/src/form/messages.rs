//! Message Catalog
//!
//! User-facing messages for validation and delivery outcomes, keyed by
//! message id. Defaults ship here; a form schema may override any entry.
//! Templated messages carry literal tokens (`__min_file_limit__`) replaced
//! with configured values at render time.

use std::collections::HashMap;

/// Message ids used by the pipeline.
pub mod ids {
    /// A required field received no files.
    pub const INVALID_REQUIRED: &str = "invalid_required";
    /// Fewer files than the configured minimum.
    pub const MIN_FILE_COUNT: &str = "min_file_count";
    /// More files than the configured maximum.
    pub const MAX_FILE_COUNT: &str = "max_file_count";
    /// A file's type is not in the accepted list.
    pub const FILE_TYPE_INVALID: &str = "upload_file_type_invalid";
    /// A file exceeds the per-file size limit.
    pub const FILE_TOO_LARGE: &str = "upload_file_too_large";
    /// The field's files together exceed the total size limit.
    pub const TOTAL_SIZE_EXCEEDED: &str = "total_size_exceeded";
    /// A file arrived with a transport-level upload error.
    pub const UPLOAD_TRANSPORT_ERROR: &str = "upload_transport_error";
    /// Storing a validated file failed.
    pub const UPLOAD_FAILED: &str = "upload_failed";
    /// One or more fields failed validation.
    pub const VALIDATION_ERROR: &str = "validation_error";
    /// The outbound message was dispatched.
    pub const MAIL_SENT_OK: &str = "mail_sent_ok";
    /// The outbound message could not be dispatched.
    pub const MAIL_SENT_NG: &str = "mail_sent_ng";
}

/// Resolves message ids to text, applying schema overrides over defaults.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    overrides: HashMap<String, String>,
}

impl MessageCatalog {
    /// Create a catalog with the given overrides.
    #[must_use]
    pub const fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Text for a message id.
    #[must_use]
    pub fn text(&self, id: &str) -> String {
        self.overrides
            .get(id)
            .map_or_else(|| default_text(id).to_string(), Clone::clone)
    }

    /// Text for a message id with token substitution applied.
    #[must_use]
    pub fn render(&self, id: &str, substitutions: &[(&str, String)]) -> String {
        let mut message = self.text(id);
        for (token, value) in substitutions {
            message = message.replace(token, value);
        }
        message
    }
}

/// Default message text.
fn default_text(id: &str) -> &'static str {
    match id {
        ids::INVALID_REQUIRED => "Please fill out this field.",
        ids::MIN_FILE_COUNT => "You need to upload at least __min_file_limit__ files.",
        ids::MAX_FILE_COUNT => "You cannot upload more than __max_file_limit__ files per request.",
        ids::FILE_TYPE_INVALID => "You are not allowed to upload files of this type.",
        ids::FILE_TOO_LARGE => "Uploaded file is too big.",
        ids::TOTAL_SIZE_EXCEEDED => "The uploaded files are too big in total.",
        ids::UPLOAD_TRANSPORT_ERROR => "There was an error uploading the file.",
        ids::UPLOAD_FAILED => "There was an error uploading the file to the server.",
        ids::VALIDATION_ERROR => "One or more fields have an error. Please check and try again.",
        ids::MAIL_SENT_OK => "Thank you for your message. It has been sent.",
        ids::MAIL_SENT_NG => {
            "There was an error trying to send your message. Please try again later."
        }
        _ => "Submission failed.",
    }
}
