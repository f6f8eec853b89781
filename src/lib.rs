//! StarNotary - a private hash-linked ledger with a star notary service
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Block structure, the append-only ledger and chain validation
//! - [`persistence`] - Key-value block store (SQLite and in-memory)
//!
//! ## Notary
//! - [`notary`] - Per-address challenge/response workflow gating ledger writes
//! - [`star`] - Star registration payload shaping and lookups
//!
//! ## Cryptography
//! - [`crypto`] - Digests, key pairs and signature verification (secp256k1)
//!
//! ## Service
//! - [`node`] - Node bootstrapping
//! - [`api`] - HTTP endpoints (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod persistence;

// ============================================================================
// Notary
// ============================================================================
pub mod notary;
pub mod star;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Service
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
