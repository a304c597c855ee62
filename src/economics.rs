/// Economics module: token supply, allocation buckets and their conservation rules
use crate::config::TokenConfig;
use crate::error::ChainError;
use serde::{Deserialize, Serialize};

/// Fixed-point token amount. Fractional rates are applied in fixed point so the
/// same inputs always produce the same bits.
pub type Amount = fixed::types::I32F32;

/// Share of the fee pool that is destroyed on distribution.
pub const FEE_BURN_RATE: Amount = Amount::from_bits(858_993_459); // 0.2
/// Base annual staking yield.
pub const STAKING_APY: f64 = 0.15;

pub fn zero() -> Amount {
    Amount::from_num(0)
}

/// Named sub-pools of the total supply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenAllocations {
    pub presale: Amount,
    pub liquidity: Amount,
    pub mined: Amount,
    pub staking_rewards: Amount,
    pub fee_pool: Amount,
}

impl TokenAllocations {
    pub fn total(&self) -> Amount {
        self.presale + self.liquidity + self.mined + self.staking_rewards + self.fee_pool
    }
}

/// Bucket named on a transaction's admission flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Presale,
    Liquidity,
}

impl Bucket {
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Presale => "presale",
            Bucket::Liquidity => "liquidity",
        }
    }
}

/// Tracks total supply and the allocation buckets carved out of it.
///
/// Invariant: every bucket is non-negative and the buckets sum to at most
/// `total_supply`. The difference is the circulating supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSupplyLedger {
    total_supply: Amount,
    allocations: TokenAllocations,
    total_burned: Amount,
}

impl TokenSupplyLedger {
    pub fn new(total_supply: Amount, allocations: TokenAllocations) -> Result<Self, ChainError> {
        let buckets = [
            allocations.presale,
            allocations.liquidity,
            allocations.mined,
            allocations.staking_rewards,
            allocations.fee_pool,
        ];
        if total_supply < zero() || buckets.iter().any(|b| *b < zero()) {
            return Err(ChainError::ConfigError(
                "Token supply and allocations must be non-negative".to_string(),
            ));
        }
        if allocations.total() > total_supply {
            return Err(ChainError::ConfigError(format!(
                "Allocations ({}) exceed total supply ({})",
                allocations.total(),
                total_supply
            )));
        }
        Ok(Self {
            total_supply,
            allocations,
            total_burned: zero(),
        })
    }

    pub fn from_config(token: &TokenConfig) -> Result<Self, ChainError> {
        Self::new(
            Amount::from_num(token.total_supply),
            TokenAllocations {
                presale: Amount::from_num(token.presale_allocation),
                liquidity: Amount::from_num(token.liquidity_allocation),
                mined: Amount::from_num(token.mining_reserve),
                staking_rewards: Amount::from_num(token.staking_reserve),
                fee_pool: zero(),
            },
        )
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn allocations(&self) -> &TokenAllocations {
        &self.allocations
    }

    pub fn total_burned(&self) -> Amount {
        self.total_burned
    }

    pub fn circulating(&self) -> Amount {
        self.total_supply - self.allocations.total()
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Amount {
        match bucket {
            Bucket::Presale => &mut self.allocations.presale,
            Bucket::Liquidity => &mut self.allocations.liquidity,
        }
    }

    /// Checks that an admission spending `amount` from `bucket` and moving
    /// `fee` into the fee pool can be applied. Mutates nothing.
    pub fn check_admission(
        &self,
        bucket: Option<Bucket>,
        amount: Amount,
        fee: Amount,
    ) -> Result<(), ChainError> {
        let mut released = zero();
        if let Some(bucket) = bucket {
            let available = match bucket {
                Bucket::Presale => self.allocations.presale,
                Bucket::Liquidity => self.allocations.liquidity,
            };
            if available < amount {
                return Err(ChainError::InsufficientAllocation {
                    bucket: bucket.name(),
                    requested: amount,
                    available,
                });
            }
            released = amount;
        }
        // The fee leaves circulation; tokens released from a bucket by this
        // same admission count towards covering it.
        let circulating = self.circulating() + released;
        if circulating < fee {
            return Err(ChainError::InsufficientAllocation {
                bucket: "circulating",
                requested: fee,
                available: circulating,
            });
        }
        Ok(())
    }

    /// Applies an admission previously accepted by [`check_admission`].
    ///
    /// [`check_admission`]: TokenSupplyLedger::check_admission
    pub fn apply_admission(
        &mut self,
        bucket: Option<Bucket>,
        amount: Amount,
        fee: Amount,
    ) -> Result<(), ChainError> {
        self.check_admission(bucket, amount, fee)?;
        if let Some(bucket) = bucket {
            *self.bucket_mut(bucket) -= amount;
        }
        self.allocations.fee_pool += fee;
        Ok(())
    }

    /// Empties the fee pool, burning [`FEE_BURN_RATE`] of it.
    /// Returns `(validator_share, burned)`.
    pub fn drain_fee_pool(&mut self) -> (Amount, Amount) {
        let pool = self.allocations.fee_pool;
        let burned = pool * FEE_BURN_RATE;
        let share = pool - burned;
        self.allocations.fee_pool = zero();
        self.total_supply -= burned;
        self.total_burned += burned;
        (share, burned)
    }

    /// Releases up to `amount` from the staking reserve into circulation.
    pub fn release_staking_reward(&mut self, amount: Amount) -> Amount {
        let paid = amount.min(self.allocations.staking_rewards).max(zero());
        self.allocations.staking_rewards -= paid;
        paid
    }

    /// Releases up to `amount` from the mining reserve into circulation.
    pub fn release_block_reward(&mut self, amount: Amount) -> Amount {
        let paid = amount.min(self.allocations.mined).max(zero());
        self.allocations.mined -= paid;
        paid
    }

    pub fn is_conserved(&self) -> bool {
        let a = &self.allocations;
        [a.presale, a.liquidity, a.mined, a.staking_rewards, a.fee_pool]
            .iter()
            .all(|b| *b >= zero())
            && a.total() <= self.total_supply
    }
}

/// Read-only summary of supply and fee parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEconomics {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: Amount,
    pub circulating_supply: Amount,
    pub total_burned: Amount,
    pub total_staked: Amount,
    pub allocations: TokenAllocations,
    pub base_fee: Amount,
    pub priority_fee_rate: Amount,
}

/// Advisory snapshot combining fixed economic parameters with analytics
/// predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicState {
    pub staking_apy: f64,
    pub fee_burn_rate: f64,
    pub predicted_yield: f64,
    pub suggested_actions: Vec<String>,
}

/// Linear staking yield over `duration_days` at [`STAKING_APY`].
pub fn base_staking_reward(amount: Amount, duration_days: u32) -> Amount {
    let reward = amount.to_num::<f64>() * STAKING_APY * (duration_days as f64 / 365.0);
    Amount::saturating_from_num(reward)
}

/// Block subsidy at `height`, halving every `halving_interval` blocks.
pub fn block_reward(initial_reward: Amount, halving_interval: u64, height: u64) -> Amount {
    if halving_interval == 0 {
        return initial_reward;
    }
    let halvings = height / halving_interval;
    if halvings >= 32 {
        zero()
    } else {
        initial_reward >> (halvings as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> TokenSupplyLedger {
        TokenSupplyLedger::new(
            Amount::from_num(1_000_000),
            TokenAllocations {
                presale: Amount::from_num(300_000),
                liquidity: Amount::from_num(200_000),
                mined: Amount::from_num(100_000),
                staking_rewards: Amount::from_num(100_000),
                fee_pool: zero(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_allocations_cannot_exceed_supply() {
        let result = TokenSupplyLedger::new(
            Amount::from_num(10),
            TokenAllocations {
                presale: Amount::from_num(11),
                liquidity: zero(),
                mined: zero(),
                staking_rewards: zero(),
                fee_pool: zero(),
            },
        );
        assert!(matches!(result, Err(ChainError::ConfigError(_))));
    }

    #[test]
    fn test_presale_admission_decrements_bucket() {
        let mut supply = ledger();
        supply
            .apply_admission(Some(Bucket::Presale), Amount::from_num(1_000), Amount::from_num(1))
            .unwrap();
        assert_eq!(supply.allocations().presale, Amount::from_num(299_000));
        assert_eq!(supply.allocations().fee_pool, Amount::from_num(1));
        assert!(supply.is_conserved());
    }

    #[test]
    fn test_insufficient_bucket_leaves_state_untouched() {
        let mut supply = ledger();
        let before = *supply.allocations();
        let result = supply.apply_admission(
            Some(Bucket::Liquidity),
            Amount::from_num(200_001),
            Amount::from_num(1),
        );
        match result {
            Err(ChainError::InsufficientAllocation { bucket, .. }) => {
                assert_eq!(bucket, "liquidity")
            }
            other => panic!("expected InsufficientAllocation, got {:?}", other),
        }
        assert_eq!(*supply.allocations(), before);
    }

    #[test]
    fn test_fee_must_be_covered_by_circulation() {
        let mut supply = TokenSupplyLedger::new(
            Amount::from_num(100),
            TokenAllocations {
                presale: Amount::from_num(100),
                liquidity: zero(),
                mined: zero(),
                staking_rewards: zero(),
                fee_pool: zero(),
            },
        )
        .unwrap();
        assert!(supply.apply_admission(None, Amount::from_num(5), Amount::from_num(1)).is_err());
        // Spending from presale releases enough to cover the fee.
        assert!(supply
            .apply_admission(Some(Bucket::Presale), Amount::from_num(5), Amount::from_num(1))
            .is_ok());
        assert!(supply.is_conserved());
    }

    #[test]
    fn test_drain_fee_pool_burns_fifth() {
        let mut supply = ledger();
        supply.apply_admission(None, Amount::from_num(1), Amount::from_num(50)).unwrap();
        let total_before = supply.total_supply();
        let (share, burned) = supply.drain_fee_pool();
        assert_eq!(supply.allocations().fee_pool, zero());
        assert_eq!(burned, Amount::from_num(50) * FEE_BURN_RATE);
        assert_eq!(total_before - supply.total_supply(), burned);
        assert_eq!(share + burned, Amount::from_num(50));
        assert!(supply.is_conserved());
    }

    #[test]
    fn test_amount_covers_configurable_supply() {
        assert_eq!(Amount::FRAC_NBITS, 32);
        assert!(Amount::MAX >= Amount::from_num(i32::MAX));
        assert!((FEE_BURN_RATE.to_num::<f64>() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_reserve_release_is_capped() {
        let mut supply = ledger();
        let paid = supply.release_staking_reward(Amount::from_num(150_000));
        assert_eq!(paid, Amount::from_num(100_000));
        assert_eq!(supply.allocations().staking_rewards, zero());
    }

    #[test]
    fn test_block_reward_halving() {
        let initial = Amount::from_num(50);
        assert_eq!(block_reward(initial, 100, 0), Amount::from_num(50));
        assert_eq!(block_reward(initial, 100, 100), Amount::from_num(25));
        assert_eq!(block_reward(initial, 100, 250), Amount::from_num(12.5));
        assert_eq!(block_reward(initial, 100, 100 * 40), zero());
    }

    #[test]
    fn test_base_staking_reward() {
        let reward = base_staking_reward(Amount::from_num(10_000), 365);
        assert!((reward.to_num::<f64>() - 1_500.0).abs() < 1e-6);
    }
}
