//! Attachment Assembly
//!
//! Turns a submission's stored files into the two outputs the outgoing
//! message needs: a deduplicated binary attachment set and, per file field,
//! the mail-tag substitution string of uploaded base names. Both derive
//! from the stored paths, never from client-supplied names directly.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::storage::StoredFile;

/// One binary attachment for the outgoing message: a view over a stored
/// file's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Absolute path inside the storage root.
    pub path: PathBuf,
}

/// Builds message attachments and mail-tag values from stored files.
#[derive(Debug, Clone)]
pub struct AttachmentAssembler {
    list_separator: String,
}

impl AttachmentAssembler {
    /// Create an assembler using `list_separator` to join base names.
    pub fn new(list_separator: impl Into<String>) -> Self {
        Self {
            list_separator: list_separator.into(),
        }
    }

    /// The deduplicated attachment set for the outgoing message, in storage
    /// order.
    #[must_use]
    pub fn assemble(&self, stored: &[StoredFile]) -> Vec<Attachment> {
        let mut seen = HashSet::new();
        stored
            .iter()
            .filter(|file| seen.insert(file.stored_path.clone()))
            .map(|file| Attachment {
                path: file.stored_path.clone(),
            })
            .collect()
    }

    /// The mail-tag value for one file field: the stored base names joined
    /// with the list separator.
    #[must_use]
    pub fn mail_tag_value(&self, stored: &[StoredFile], field_name: &str) -> String {
        let names: Vec<&str> = stored
            .iter()
            .filter(|file| file.field_name == field_name)
            .filter_map(|file| file.stored_path.file_name().and_then(|n| n.to_str()))
            .collect();
        names.join(&self.list_separator)
    }
}

/// Resolve `[fieldname]` placeholders in a mail template body.
///
/// Placeholders without a value are left in place.
#[must_use]
pub fn substitute_mail_tags(body: &str, values: &HashMap<String, String>) -> String {
    let mut resolved = body.to_string();
    for (name, value) in values {
        resolved = resolved.replace(&format!("[{name}]"), value);
    }
    resolved
}
