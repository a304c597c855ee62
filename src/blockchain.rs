// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// block/chain structures and append-time validation.

pub mod core;
pub use core::*;
