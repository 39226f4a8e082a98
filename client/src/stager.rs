//! Upload staging.
//!
//! Materializes the intake list into the payload that is actually
//! transmitted: ordered by selection index, index-stable under deletion,
//! and named with the `[]` array marker the submission encoding contract
//! requires.

use bytes::Bytes;
use thiserror::Error;

use fp_common::FieldConfig;

use crate::intake::SelectedFile;

/// Pre-submission gating failures. Client-side only; the server re-checks.
#[derive(Error, Debug)]
pub enum StageError {
    /// A required field staged no files.
    #[error("At least one file is required for \"{0}\"")]
    RequiredEmpty(String),
}

/// One `{file, preview}` pair staged for transmission.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    /// Selection index; stable across deletions of other entries.
    pub selection_index: u64,
    /// Filename transmitted with the part.
    pub file_name: String,
    /// MIME type transmitted with the part.
    pub mime_type: String,
    /// Payload: the preprocessed data when preprocessing ran.
    pub data: Bytes,
    /// Preview data URL for rendering.
    pub preview_url: Option<String>,
}

/// The final ordered file set written into the transmissible field payload.
#[derive(Debug, Clone)]
pub struct StagedPayload {
    /// Multipart part name, carrying the array marker (`photos[]`).
    pub field_name: String,
    /// Parts in selection order.
    pub parts: Vec<StagedEntry>,
}

/// Materializes selected files into the transmittable payload for one field.
#[derive(Debug, Clone)]
pub struct UploadStager {
    config: FieldConfig,
}

impl UploadStager {
    /// Create a stager for one field.
    #[must_use]
    pub const fn new(config: FieldConfig) -> Self {
        Self { config }
    }

    /// The `{file, preview}` pairs currently staged, in selection order.
    ///
    /// Files whose preprocessing has not settled yet are excluded; they join
    /// the staged list once their result commits.
    #[must_use]
    pub fn stage(&self, selected: &[SelectedFile]) -> Vec<StagedEntry> {
        selected
            .iter()
            .filter_map(|file| {
                let data = file.processed_data.clone()?;
                Some(StagedEntry {
                    selection_index: file.selection_index,
                    file_name: file.file_name.clone(),
                    mime_type: file.mime_type.clone(),
                    data,
                    preview_url: file.preview_url.clone(),
                })
            })
            .collect()
    }

    /// Write the final ordered file set into the transmissible payload.
    ///
    /// An empty resulting set fails gating when the field is required.
    pub fn finalize(&self, selected: &[SelectedFile]) -> Result<StagedPayload, StageError> {
        let parts = self.stage(selected);
        if parts.is_empty() && self.config.required {
            return Err(StageError::RequiredEmpty(self.config.name.clone()));
        }
        Ok(StagedPayload {
            field_name: self.config.array_field_name(),
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn settled_file(index: u64, name: &str) -> SelectedFile {
        SelectedFile {
            id: Uuid::new_v4(),
            file_name: name.to_string(),
            mime_type: "image/png".to_string(),
            raw_data: Bytes::from_static(b"raw"),
            size_bytes: 3,
            preview_url: Some("data:image/png;base64,cmF3".to_string()),
            processed_data: Some(Bytes::from_static(b"processed")),
            selection_index: index,
            generation: index,
        }
    }

    fn pending_file(index: u64, name: &str) -> SelectedFile {
        SelectedFile {
            processed_data: None,
            preview_url: None,
            ..settled_file(index, name)
        }
    }

    #[test]
    fn test_finalize_orders_by_selection_index() {
        let stager = UploadStager::new(FieldConfig::new("photos"));
        let files = vec![
            settled_file(0, "a.png"),
            settled_file(1, "b.png"),
            settled_file(2, "c.png"),
        ];

        let payload = stager.finalize(&files).unwrap();
        assert_eq!(payload.field_name, "photos[]");
        let names: Vec<_> = payload.parts.iter().map(|p| p.file_name.clone()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_pending_files_are_not_staged() {
        let stager = UploadStager::new(FieldConfig::new("photos"));
        let files = vec![settled_file(0, "a.png"), pending_file(1, "b.png")];

        let parts = stager.stage(&files);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].file_name, "a.png");
    }

    #[test]
    fn test_required_field_fails_gating_when_empty() {
        let mut config = FieldConfig::new("photos");
        config.required = true;
        let stager = UploadStager::new(config);

        let err = stager.finalize(&[]);
        assert!(matches!(err, Err(StageError::RequiredEmpty(name)) if name == "photos"));
    }

    #[test]
    fn test_optional_field_allows_empty_payload() {
        let stager = UploadStager::new(FieldConfig::new("photos"));
        let payload = stager.finalize(&[]).unwrap();
        assert!(payload.parts.is_empty());
    }

    #[test]
    fn test_staged_data_is_processed_payload() {
        let stager = UploadStager::new(FieldConfig::new("photos"));
        let parts = stager.stage(&[settled_file(0, "a.png")]);
        assert_eq!(parts[0].data.as_ref(), b"processed");
    }
}
