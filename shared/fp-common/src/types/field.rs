//! Field Configuration
//!
//! Per-field limits and accepted-type matching for multi-file form fields.
//! The server treats these as the source of rule parameters; the client uses
//! the same values for its advisory pre-checks.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default per-file size limit (1 MiB).
pub const DEFAULT_PER_FILE_SIZE_LIMIT: u64 = 1024 * 1024;

/// Default total size limit across one field (10 MiB).
pub const DEFAULT_TOTAL_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Default bounds for client-side image downscaling and previews.
pub const DEFAULT_PREVIEW_WIDTH: u32 = 720;
/// See [`DEFAULT_PREVIEW_WIDTH`].
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 480;

/// Extensions accepted when a field configures no list of its own.
pub const DEFAULT_ACCEPTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "pdf", "doc", "docx", "ppt", "pptx", "odt", "avi", "ogg", "m4a",
    "mov", "mp3", "mp4", "mpg", "wav", "wmv", "txt",
];

/// Configuration for one multi-file form field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Field name (without the `[]` array marker).
    pub name: String,
    /// Whether at least one file must be submitted.
    #[serde(default)]
    pub required: bool,
    /// Minimum number of files, if constrained.
    #[serde(default)]
    pub min_count: Option<u32>,
    /// Maximum number of files, if constrained.
    #[serde(default)]
    pub max_count: Option<u32>,
    /// Per-file size limit in bytes.
    #[serde(default = "default_per_file_size_limit")]
    pub per_file_size_limit: u64,
    /// Total size limit across the field in bytes.
    #[serde(default = "default_total_size_limit")]
    pub total_size_limit: u64,
    /// Accepted types: file extensions (`"jpg"`, `".png"`, `"jpg|jpeg"`)
    /// and/or MIME patterns (`"image/png"`, `"image/*"`).
    #[serde(default)]
    pub accepted_types: Vec<String>,
    /// Maximum width for client-side image downscaling.
    #[serde(default = "default_preview_width")]
    pub preview_width: u32,
    /// Maximum height for client-side image downscaling.
    #[serde(default = "default_preview_height")]
    pub preview_height: u32,
}

const fn default_per_file_size_limit() -> u64 {
    DEFAULT_PER_FILE_SIZE_LIMIT
}

const fn default_total_size_limit() -> u64 {
    DEFAULT_TOTAL_SIZE_LIMIT
}

const fn default_preview_width() -> u32 {
    DEFAULT_PREVIEW_WIDTH
}

const fn default_preview_height() -> u32 {
    DEFAULT_PREVIEW_HEIGHT
}

impl FieldConfig {
    /// Create a field configuration with defaults for everything but the name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            min_count: None,
            max_count: None,
            per_file_size_limit: DEFAULT_PER_FILE_SIZE_LIMIT,
            total_size_limit: DEFAULT_TOTAL_SIZE_LIMIT,
            accepted_types: Vec::new(),
            preview_width: DEFAULT_PREVIEW_WIDTH,
            preview_height: DEFAULT_PREVIEW_HEIGHT,
        }
    }

    /// The name binary multipart parts are transmitted under (`name[]`).
    #[must_use]
    pub fn array_field_name(&self) -> String {
        format!("{}[]", self.name)
    }
}

/// A field in a form schema: either a plain text value or a multi-file input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FormField {
    /// A plain text field; its submitted value substitutes `[name]` in the
    /// mail body.
    Text {
        /// Field name.
        name: String,
    },
    /// A multi-file field.
    Files(FieldConfig),
}

impl FormField {
    /// Field name as it appears in the form.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name } => name,
            Self::Files(config) => &config.name,
        }
    }

    /// Whether this field requests file uploading.
    #[must_use]
    pub const fn uploads_files(&self) -> bool {
        matches!(self, Self::Files(_))
    }
}

/// Whether a submission for these fields must be encoded as multipart
/// binary form data (with file parts under `name[]`).
///
/// Pure function of "does any field request file uploading".
#[must_use]
pub fn requires_multipart(fields: &[FormField]) -> bool {
    fields.iter().any(FormField::uploads_files)
}

/// Accepted-type matcher compiled from a field's configured list.
///
/// Extension tokens are collected into a single case-insensitive
/// `\.(jpg|jpeg|...)$` pattern; MIME entries match exactly or by `type/*`
/// wildcard. A file is accepted if either side matches. An empty
/// configuration falls back to [`DEFAULT_ACCEPTED_EXTENSIONS`].
#[derive(Debug, Clone)]
pub struct TypeMatcher {
    extension_pattern: Option<Regex>,
    mime_patterns: Vec<String>,
}

impl TypeMatcher {
    /// Compile a matcher from a field's `accepted_types` list.
    pub fn new(accepted_types: &[String]) -> Result<Self, regex::Error> {
        let mut extensions: Vec<String> = Vec::new();
        let mut mime_patterns: Vec<String> = Vec::new();

        for entry in accepted_types {
            // Entries may bundle alternatives with pipes ("jpg|jpeg").
            for token in entry.split('|').map(str::trim).filter(|t| !t.is_empty()) {
                if token.contains('/') {
                    mime_patterns.push(token.to_ascii_lowercase());
                } else {
                    extensions.push(regex::escape(token.trim_start_matches('.')));
                }
            }
        }

        if extensions.is_empty() && mime_patterns.is_empty() {
            extensions.extend(DEFAULT_ACCEPTED_EXTENSIONS.iter().map(ToString::to_string));
        }

        let extension_pattern = if extensions.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"(?i)\.({})$", extensions.join("|")))?)
        };

        Ok(Self {
            extension_pattern,
            mime_patterns,
        })
    }

    /// Check a filename and claimed MIME type against the accepted list.
    #[must_use]
    pub fn matches(&self, filename: &str, mime_type: &str) -> bool {
        if let Some(pattern) = &self.extension_pattern {
            if pattern.is_match(filename) {
                return true;
            }
        }

        let mime_type = mime_type.to_ascii_lowercase();
        self.mime_patterns.iter().any(|pattern| {
            pattern
                .strip_suffix("/*")
                .map_or(pattern == &mime_type, |prefix| {
                    mime_type
                        .split_once('/')
                        .is_some_and(|(main, _)| main == prefix)
                })
        })
    }
}
