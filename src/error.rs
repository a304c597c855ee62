//! Error types for the OntiBlock ledger

use crate::economics::Amount;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    InvalidTransaction(String),
    InsufficientAllocation {
        bucket: &'static str,
        requested: Amount,
        available: Amount,
    },
    MinimumStake {
        required: Amount,
        provided: Amount,
    },
    InvalidAddress(String),
    UnregisteredValidator(String),
    ValidatorAlreadyRegistered(String),
    ContractNotFound(u64),
    ContractNotWithdrawable(u64),
    ChainIntegrity(String),
    EmptyChain,
    MiningCancelled,
    MempoolFull,
    InvalidFeeParameters(String),
    CryptoError(String),
    ConfigError(String),
    BincodeError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            ChainError::InsufficientAllocation {
                bucket,
                requested,
                available,
            } => write!(
                f,
                "Insufficient {} allocation: requested {}, available {}",
                bucket, requested, available
            ),
            ChainError::MinimumStake { required, provided } => write!(
                f,
                "Stake of {} is below the minimum of {}",
                provided, required
            ),
            ChainError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            ChainError::UnregisteredValidator(addr) => {
                write!(f, "Validator {} is not registered", addr)
            }
            ChainError::ValidatorAlreadyRegistered(addr) => {
                write!(f, "Validator {} is already registered", addr)
            }
            ChainError::ContractNotFound(id) => write!(f, "Staking contract {} not found", id),
            ChainError::ContractNotWithdrawable(id) => {
                write!(f, "Staking contract {} cannot be withdrawn yet", id)
            }
            ChainError::ChainIntegrity(msg) => write!(f, "Chain integrity violation: {}", msg),
            ChainError::EmptyChain => write!(f, "Chain has no genesis block"),
            ChainError::MiningCancelled => write!(f, "Mining cancelled"),
            ChainError::MempoolFull => write!(f, "Mempool is full"),
            ChainError::InvalidFeeParameters(msg) => write!(f, "Invalid fee parameters: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::BincodeError(msg) => write!(f, "Bincode error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::BincodeError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
