// Thin re-export module: implementation is in `blockchain/core.rs`, split
// into chain management and verification.

pub mod core;
pub use self::core::*;
