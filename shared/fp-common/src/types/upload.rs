//! Upload Descriptors
//!
//! The immutable, request-scoped view of files received for one submission.

use std::path::PathBuf;

/// One file submitted for a single field, as received by the server.
///
/// Handlers build these from the multipart stream (writing each binary part
/// to a temporary file) and pass them by value into the validation pipeline.
/// Nothing downstream mutates them.
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    /// The owning field's name (array marker stripped).
    pub field_name: String,
    /// Client-supplied filename. Untrusted until sanitized by storage.
    pub original_name: String,
    /// Client-claimed MIME type (or a `mime_guess` fallback).
    pub claimed_mime: String,
    /// Size of the received payload in bytes.
    pub size_bytes: u64,
    /// Where the raw payload was spooled while the request is in flight.
    pub temp_path: PathBuf,
    /// Transport-level failure reported while receiving this part, if any.
    /// A populated flag fails the owning field during validation.
    pub upload_error: Option<String>,
}

/// Strip the `[]` array marker from a multipart part name.
///
/// `photos[]` → `photos`; names without the marker pass through unchanged.
#[must_use]
pub fn base_field_name(part_name: &str) -> &str {
    part_name.strip_suffix("[]").unwrap_or(part_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_field_name_strips_marker() {
        assert_eq!(base_field_name("photos[]"), "photos");
        assert_eq!(base_field_name("photos"), "photos");
        assert_eq!(base_field_name("[]"), "");
    }
}
