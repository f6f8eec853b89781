// Thin re-export module: the ledger lives in `blockchain/core.rs`, split into
// chain management and validation.

pub mod core;
pub use core::*;
