//! Fieldpost Common Library
//!
//! Shared types used by both the server pipeline and the client staging
//! library: field configuration, accepted-type matching, and the
//! request-scoped upload descriptor.

pub mod types;

pub use types::*;
