//! OntiBlock - a single-node ledger with proof-of-work, staking and a fee market
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Block structure, hash-linked chain and append validation
//! - [`transaction`] - Transaction types and admission validation
//! - [`mempool`] - Pending transaction pool
//! - [`ledger`] - Single-writer facade exposing every ledger operation
//!
//! ## Economics
//! - [`economics`] - Token supply and allocation buckets
//! - [`fees`] - Fee market and fee-pool distribution
//! - [`staking`] - Validator registry and staking contracts
//!
//! ## Consensus
//! - [`miner`] - Proof-of-work mining and difficulty retargeting
//!
//! ## Cryptography
//! - [`crypto`] - Signatures and verification (secp256k1)
//!
//! ## Integration
//! - [`analytics`] - Best-effort analytics notifications and predictions
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`clock`] - Time sources
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod ledger;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Economics
// ============================================================================
pub mod economics;
pub mod fees;
pub mod staking;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Integration
// ============================================================================
pub mod analytics;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod clock;
pub mod config;
pub mod error;

pub use economics::Amount;
pub use error::{ChainError, Result};
pub use ledger::{Ledger, LedgerBuilder};
