//! Shared Types

pub mod field;
pub mod upload;

pub use field::*;
pub use upload::*;
