// core.rs splits the ledger into block/chain management and verification.
pub mod chain;
pub mod validation;

pub use chain::*;
pub use validation::*;
