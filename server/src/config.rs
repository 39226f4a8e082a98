//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Path to the form schema JSON file
    pub schema_path: PathBuf,

    /// Root directory stored files are moved into
    pub storage_dir: PathBuf,

    /// Maximum request body size in bytes (default: 50MB)
    pub max_upload_size: usize,

    /// Separator joining uploaded base names in mail-tag substitutions
    pub list_separator: String,

    /// SMTP relay host (mail dispatch is disabled without it)
    pub smtp_host: Option<String>,

    /// SMTP port (default: 587)
    pub smtp_port: u16,

    /// SMTP username
    pub smtp_username: Option<String>,

    /// SMTP password
    pub smtp_password: Option<String>,

    /// From address for outbound mail
    pub smtp_from: Option<String>,

    /// SMTP TLS mode: "starttls" (default), "tls", or "none"
    pub smtp_tls: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            schema_path: env::var("FORM_SCHEMA")
                .context("FORM_SCHEMA must point at the form schema JSON file")?
                .into(),
            storage_dir: env::var("STORAGE_DIR")
                .unwrap_or_else(|_| "uploads".into())
                .into(),
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50 * 1024 * 1024), // 50MB
            list_separator: env::var("LIST_SEPARATOR").unwrap_or_else(|_| ", ".into()),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").ok(),
            smtp_tls: env::var("SMTP_TLS").unwrap_or_else(|_| "starttls".into()),
        })
    }

    /// Check if SMTP is fully configured.
    #[must_use]
    pub const fn has_smtp(&self) -> bool {
        self.smtp_host.is_some()
            && self.smtp_username.is_some()
            && self.smtp_password.is_some()
            && self.smtp_from.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// Storage and schema paths point at placeholders; tests override them
    /// with temp directories.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            schema_path: "form.json".into(),
            storage_dir: "test-uploads".into(),
            max_upload_size: 50 * 1024 * 1024,
            list_separator: ", ".into(),
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            smtp_tls: "starttls".into(),
        }
    }
}
