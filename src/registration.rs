//! Registration module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
