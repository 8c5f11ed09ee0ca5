//! TouristID - digital tourist registration anchored in a hash-chained ledger
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Ledger
//! - [`blockchain`] - Blocks, the append-only ledger and chain verification
//! - [`crypto`] - SHA-256 digests and the genesis sentinel
//!
//! ## Registration
//! - [`registration`] - Request document, validation and canonical form
//! - [`pipeline`] - Store-then-chain registration workflow
//! - [`credential`] - Credential payloads and QR rendering
//!
//! ## State Management
//! - [`persistence`] - Record store (SQLite and in-memory)
//!
//! ## Integration
//! - [`api`] - HTTP surface (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Ledger
// ============================================================================
pub mod blockchain;
pub mod crypto;

// ============================================================================
// Registration
// ============================================================================
pub mod credential;
pub mod pipeline;
pub mod registration;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
