//! Fee market: per-transaction fees and fee-pool distribution

use crate::config::FeeConfig;
use crate::economics::{zero, Amount, TokenSupplyLedger};
use crate::error::ChainError;
use crate::transaction::{Transaction, FEE_POOL_SENDER};
use serde::{Deserialize, Serialize};

const BASE_FEE_FLOOR: f64 = 0.001;
const BASE_FEE_SLOPE: f64 = 0.0005;
const PRIORITY_RATE_FLOOR: f64 = 0.0001;
const PRIORITY_RATE_SLOPE: f64 = 0.00005;

/// Result of emptying the fee pool.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeDistribution {
    /// Synthetic payout of the validator share
    pub reward: Transaction,
    pub burned: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeMarket {
    base_fee: Amount,
    priority_fee_rate: Amount,
}

impl FeeMarket {
    pub fn new(base_fee: Amount, priority_fee_rate: Amount) -> Result<Self, ChainError> {
        if base_fee < zero() || priority_fee_rate < zero() {
            return Err(ChainError::InvalidFeeParameters(format!(
                "Fees must be non-negative (base {}, priority rate {})",
                base_fee, priority_fee_rate
            )));
        }
        Ok(Self {
            base_fee,
            priority_fee_rate,
        })
    }

    pub fn from_config(config: &FeeConfig) -> Result<Self, ChainError> {
        Self::new(
            Amount::saturating_from_num(config.base_fee),
            Amount::saturating_from_num(config.priority_fee_rate),
        )
    }

    pub fn base_fee(&self) -> Amount {
        self.base_fee
    }

    pub fn priority_fee_rate(&self) -> Amount {
        self.priority_fee_rate
    }

    /// `base_fee + priority_fee_rate * (serialized size in bytes / 1000)`.
    pub fn fee_for(&self, tx: &Transaction) -> Result<Amount, ChainError> {
        let size = tx.serialized_size()?;
        let kilobytes = Amount::from_num(size) / Amount::from_num(1000);
        Ok(self
            .base_fee
            .saturating_add(self.priority_fee_rate.saturating_mul(kilobytes)))
    }

    /// Recomputes both parameters as linear functions of `congestion`.
    /// Fees already stored on pending transactions are not touched.
    pub fn adjust(&mut self, congestion: f64) -> Result<(), ChainError> {
        if !congestion.is_finite() || congestion < 0.0 {
            return Err(ChainError::InvalidFeeParameters(format!(
                "Congestion must be a non-negative number, got {}",
                congestion
            )));
        }
        self.base_fee = Amount::saturating_from_num(BASE_FEE_FLOOR + BASE_FEE_SLOPE * congestion);
        self.priority_fee_rate =
            Amount::saturating_from_num(PRIORITY_RATE_FLOOR + PRIORITY_RATE_SLOPE * congestion);
        Ok(())
    }

    /// Empties the fee pool: the validator share becomes a synthetic transfer
    /// from [`FEE_POOL_SENDER`], the rest is burned. `None` when the pool is
    /// empty.
    pub fn distribute_fees(
        supply: &mut TokenSupplyLedger,
        validator: &str,
        timestamp: u64,
    ) -> Option<FeeDistribution> {
        if supply.allocations().fee_pool <= zero() {
            return None;
        }
        let (share, burned) = supply.drain_fee_pool();
        Some(FeeDistribution {
            reward: Transaction::system(FEE_POOL_SENDER, validator, share, timestamp),
            burned,
        })
    }
}

/// Pending transactions relative to block capacity.
pub fn congestion(pending: usize, block_capacity: usize) -> f64 {
    if block_capacity == 0 {
        return 0.0;
    }
    pending as f64 / block_capacity as f64
}
