//! Form Schema
//!
//! The host-supplied description of one form: its fields (text and
//! multi-file), the outbound mail template, and optional message overrides.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use fp_common::{FieldConfig, FormField};

/// Template for the outbound message built from a submission.
///
/// `[fieldname]` placeholders in the body resolve at message-build time:
/// text fields to their submitted value, file fields to the joined list of
/// uploaded base names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailTemplate {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Body with `[fieldname]` placeholders.
    pub body: String,
}

/// A form definition: fields, mail template, and message overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    /// Fields in form order.
    pub fields: Vec<FormField>,
    /// Outbound mail template.
    pub mail: MailTemplate,
    /// Overrides for the default message catalog, keyed by message id.
    #[serde(default)]
    pub messages: HashMap<String, String>,
}

impl FormSchema {
    /// Load and validate a schema from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read form schema from {}", path.display()))?;
        let schema: Self = serde_json::from_str(&text)
            .with_context(|| format!("Form schema {} is not valid JSON", path.display()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name()) {
                bail!("Duplicate field name in form schema: {}", field.name());
            }
            if let FormField::Files(config) = field {
                if let (Some(min), Some(max)) = (config.min_count, config.max_count) {
                    if min > max {
                        bail!(
                            "Field {} has min_count {min} greater than max_count {max}",
                            config.name
                        );
                    }
                }
                if config.per_file_size_limit == 0 || config.total_size_limit == 0 {
                    bail!("Field {} has a zero size limit", config.name);
                }
            }
        }
        Ok(())
    }

    /// The multi-file fields, in form order.
    pub fn file_fields(&self) -> impl Iterator<Item = &FieldConfig> {
        self.fields.iter().filter_map(|field| match field {
            FormField::Files(config) => Some(config),
            FormField::Text { .. } => None,
        })
    }

    /// Whether submissions for this form must be multipart-encoded.
    #[must_use]
    pub fn requires_multipart(&self) -> bool {
        fp_common::requires_multipart(&self.fields)
    }
}
