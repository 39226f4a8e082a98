//! Fieldpost Server
//!
//! Authoritative half of the multi-file ingestion pipeline: validates
//! submitted files against per-field rule sets, moves them into
//! collision-free permission-restricted storage, assembles them into an
//! outbound email, and cleans stored files up once the message has been
//! dispatched.

pub mod api;
pub mod config;
pub mod email;
pub mod form;
