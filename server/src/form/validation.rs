//! Validation Pipeline
//!
//! Authoritative server-side validation of the files submitted for one
//! field. Rules evaluate in a fixed order (required, count bounds, type,
//! per-file size, total size) and the first failing rule determines the
//! verdict: only one error surfaces per field per attempt, even when several
//! rules would fail. Message wording and fixtures depend on this order.

use std::io::Read;

use fp_common::{FieldConfig, SubmittedFile, TypeMatcher};

use super::messages::{ids, MessageCatalog};

/// Rule identifiers surfaced in the validation failure contract.
pub mod rule_ids {
    /// `required` rule.
    pub const REQUIRED: &str = "required";
    /// `minCount` rule.
    pub const MIN_COUNT: &str = "min_file_count";
    /// `maxCount` rule.
    pub const MAX_COUNT: &str = "max_file_count";
    /// `typeAllowList` rule.
    pub const TYPE_ALLOW_LIST: &str = "file_type_invalid";
    /// `perFileSizeLimit` rule.
    pub const PER_FILE_SIZE: &str = "file_too_large";
    /// `totalSizeLimit` rule.
    pub const TOTAL_SIZE: &str = "total_size_exceeded";
    /// Transport-level upload error attached to a file.
    pub const UPLOAD_ERROR: &str = "upload_failed";
}

/// How many bytes of a payload the magic-byte probe reads.
const MAGIC_PROBE_LEN: u64 = 512;

/// One failing rule: the id for the failure contract plus rendered text.
#[derive(Debug, Clone)]
pub struct RuleFailure {
    /// Stable rule identifier.
    pub rule_id: &'static str,
    /// Rendered, user-facing message.
    pub message: String,
}

/// Pass/fail outcome for one field in one submission.
#[derive(Debug, Clone)]
pub struct ValidationVerdict {
    /// The field this verdict is for.
    pub field_name: String,
    /// The first failing rule, if any.
    pub failure: Option<RuleFailure>,
}

impl ValidationVerdict {
    /// Whether the field passed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.failure.is_none()
    }
}

/// An immutable rule constructed from field configuration. Params and the
/// pre-rendered message are baked in at construction.
#[derive(Debug, Clone)]
pub enum ValidationRule {
    /// At least one file must be present.
    Required {
        /// Rendered failure message.
        message: String,
    },
    /// At least `min` files must be present.
    MinCount {
        /// Lower bound.
        min: u32,
        /// Rendered failure message.
        message: String,
    },
    /// At most `max` files may be present.
    MaxCount {
        /// Upper bound.
        max: u32,
        /// Rendered failure message.
        message: String,
    },
    /// Every file must match the accepted-type list; a transport-level
    /// upload error on any file also fails here.
    TypeAllowList {
        /// Compiled accepted-type matcher.
        matcher: TypeMatcher,
        /// Rendered type-mismatch message.
        message: String,
        /// Rendered transport-error message.
        transport_message: String,
    },
    /// Every file must fit the per-file byte limit.
    PerFileSizeLimit {
        /// Limit in bytes.
        limit: u64,
        /// Rendered failure message.
        message: String,
    },
    /// The field's files together must fit the total byte limit.
    TotalSizeLimit {
        /// Limit in bytes.
        limit: u64,
        /// Rendered failure message.
        message: String,
    },
}

impl ValidationRule {
    /// Evaluate this rule against a field's files.
    fn check(&self, files: &[SubmittedFile]) -> Option<RuleFailure> {
        match self {
            Self::Required { message } => files.is_empty().then(|| RuleFailure {
                rule_id: rule_ids::REQUIRED,
                message: message.clone(),
            }),
            Self::MinCount { min, message } => {
                ((files.len() as u32) < *min).then(|| RuleFailure {
                    rule_id: rule_ids::MIN_COUNT,
                    message: message.clone(),
                })
            }
            Self::MaxCount { max, message } => {
                ((files.len() as u32) > *max).then(|| RuleFailure {
                    rule_id: rule_ids::MAX_COUNT,
                    message: message.clone(),
                })
            }
            Self::TypeAllowList {
                matcher,
                message,
                transport_message,
            } => files
                .iter()
                .find_map(|file| check_file_type(file, matcher, message, transport_message)),
            Self::PerFileSizeLimit { limit, message } => files
                .iter()
                .any(|file| file.size_bytes > *limit)
                .then(|| RuleFailure {
                    rule_id: rule_ids::PER_FILE_SIZE,
                    message: message.clone(),
                }),
            Self::TotalSizeLimit { limit, message } => {
                let total: u64 = files.iter().map(|file| file.size_bytes).sum();
                (total > *limit).then(|| RuleFailure {
                    rule_id: rule_ids::TOTAL_SIZE,
                    message: message.clone(),
                })
            }
        }
    }
}

/// Type-stage check for one file: transport error flag, accepted-type
/// match, and a magic-byte probe for image claims.
fn check_file_type(
    file: &SubmittedFile,
    matcher: &TypeMatcher,
    message: &str,
    transport_message: &str,
) -> Option<RuleFailure> {
    if let Some(error) = &file.upload_error {
        tracing::debug!(
            file_name = %file.original_name,
            error = %error,
            "Rejecting file with transport-level upload error"
        );
        return Some(RuleFailure {
            rule_id: rule_ids::UPLOAD_ERROR,
            message: transport_message.to_string(),
        });
    }

    if !matcher.matches(&file.original_name, &file.claimed_mime) {
        return Some(RuleFailure {
            rule_id: rule_ids::TYPE_ALLOW_LIST,
            message: message.to_string(),
        });
    }

    // Image claims are verified against the payload's magic bytes; text and
    // document types have no reliable signature and are not probed.
    if file.claimed_mime.starts_with("image/") {
        match image_claim_matches(file) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    file_name = %file.original_name,
                    claimed_mime = %file.claimed_mime,
                    "File content does not match claimed image type"
                );
                return Some(RuleFailure {
                    rule_id: rule_ids::TYPE_ALLOW_LIST,
                    message: message.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    file_name = %file.original_name,
                    error = %e,
                    "Failed to read upload for content verification"
                );
                return Some(RuleFailure {
                    rule_id: rule_ids::UPLOAD_ERROR,
                    message: transport_message.to_string(),
                });
            }
        }
    }

    None
}

/// Compare an image claim against detected magic bytes.
fn image_claim_matches(file: &SubmittedFile) -> std::io::Result<bool> {
    let mut head = Vec::with_capacity(MAGIC_PROBE_LEN as usize);
    std::fs::File::open(&file.temp_path)?
        .take(MAGIC_PROBE_LEN)
        .read_to_end(&mut head)?;

    Ok(infer::get(&head).is_some_and(|kind| {
        let detected = kind.mime_type();
        detected == file.claimed_mime
            || (file.claimed_mime == "image/jpg" && detected == "image/jpeg")
    }))
}

/// The ordered rule set for one field.
///
/// Deliberately fail-fast rather than accumulate-all: the first failing rule
/// wins, reproducing the single-error-per-field behavior downstream message
/// templates assume.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    field_name: String,
    rules: Vec<ValidationRule>,
}

impl ValidationPipeline {
    /// Build the rule set for a field, in the fixed evaluation order.
    pub fn for_field(config: &FieldConfig, catalog: &MessageCatalog) -> Result<Self, regex::Error> {
        let mut rules = Vec::new();

        if config.required {
            rules.push(ValidationRule::Required {
                message: catalog.text(ids::INVALID_REQUIRED),
            });
        }
        if let Some(min) = config.min_count.filter(|&min| min > 0) {
            rules.push(ValidationRule::MinCount {
                min,
                message: catalog.render(
                    ids::MIN_FILE_COUNT,
                    &[("__min_file_limit__", min.to_string())],
                ),
            });
        }
        if let Some(max) = config.max_count {
            rules.push(ValidationRule::MaxCount {
                max,
                message: catalog.render(
                    ids::MAX_FILE_COUNT,
                    &[("__max_file_limit__", max.to_string())],
                ),
            });
        }
        rules.push(ValidationRule::TypeAllowList {
            matcher: TypeMatcher::new(&config.accepted_types)?,
            message: catalog.text(ids::FILE_TYPE_INVALID),
            transport_message: catalog.text(ids::UPLOAD_TRANSPORT_ERROR),
        });
        rules.push(ValidationRule::PerFileSizeLimit {
            limit: config.per_file_size_limit,
            message: catalog.render(
                ids::FILE_TOO_LARGE,
                &[("__per_file_limit__", config.per_file_size_limit.to_string())],
            ),
        });
        rules.push(ValidationRule::TotalSizeLimit {
            limit: config.total_size_limit,
            message: catalog.render(
                ids::TOTAL_SIZE_EXCEEDED,
                &[("__total_limit__", config.total_size_limit.to_string())],
            ),
        });

        Ok(Self {
            field_name: config.name.clone(),
            rules,
        })
    }

    /// Evaluate the submitted files for this field, stopping at the first
    /// failing rule.
    #[must_use]
    pub fn evaluate(&self, files: &[SubmittedFile]) -> ValidationVerdict {
        for rule in &self.rules {
            if let Some(failure) = rule.check(files) {
                tracing::debug!(
                    field_name = %self.field_name,
                    rule_id = failure.rule_id,
                    file_count = files.len(),
                    "Field failed validation"
                );
                return ValidationVerdict {
                    field_name: self.field_name.clone(),
                    failure: Some(failure),
                };
            }
        }
        ValidationVerdict {
            field_name: self.field_name.clone(),
            failure: None,
        }
    }
}
