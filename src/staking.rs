//! Validator registry and staking contracts
//!
//! Contracts live in an arena owned by the registry; each validator only holds
//! the ids of the contracts it owns.

use crate::clock::MILLIS_PER_DAY;
use crate::economics::{zero, Amount, TokenSupplyLedger};
use crate::error::ChainError;
use crate::transaction::{Transaction, STAKING_ESCROW_SENDER, STAKING_REWARDS_SENDER};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

pub type ContractId = u64;

/// Share of the principal earned over the full contract duration.
pub const BASE_REWARD_RATE: f64 = 0.15;
/// Annualised bonus for committing to a longer duration.
///
/// The bonus grows linearly with `duration_days` and is not capped, so a very
/// long contract earns an arbitrarily large bonus term.
pub const DURATION_BONUS_RATE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingContract {
    pub id: ContractId,
    pub validator_address: String,
    pub amount: Amount,
    pub duration_days: u32,
    /// Unix time in milliseconds
    pub created_at: u64,
    pub claimed_rewards: Amount,
    pub active: bool,
}

impl StakingContract {
    pub fn elapsed_days(&self, now_millis: u64) -> f64 {
        now_millis.saturating_sub(self.created_at) as f64 / MILLIS_PER_DAY as f64
    }

    /// Total reward accrued by `now_millis`:
    /// `amount * 0.15 * min(elapsed / duration, 1) + amount * 0.05 * duration / 365`.
    pub fn calculate_rewards(&self, now_millis: u64) -> Amount {
        let amount = self.amount.to_num::<f64>();
        let duration = self.duration_days as f64;
        let completion = (self.elapsed_days(now_millis) / duration).min(1.0);
        let base = amount * BASE_REWARD_RATE * completion;
        let bonus = amount * DURATION_BONUS_RATE * (duration / 365.0);
        Amount::saturating_from_num(base + bonus)
    }

    /// Accrued reward not yet paid out.
    pub fn unclaimed_rewards(&self, now_millis: u64) -> Amount {
        (self.calculate_rewards(now_millis) - self.claimed_rewards).max(zero())
    }

    pub fn can_withdraw(&self, now_millis: u64) -> bool {
        self.elapsed_days(now_millis) >= self.duration_days as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: String,
    pub staked_amount: Amount,
    pub active_since: u64,
    pub last_validation: u64,
    /// Block height of the last reward distribution that paid this validator
    pub last_validated_height: Option<u64>,
    pub slashed: bool,
    pub contracts: BTreeSet<ContractId>,
}

/// Read-only view of a validator and its contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: String,
    pub staked_amount: Amount,
    pub active_since: u64,
    pub last_validation: u64,
    pub last_validated_height: Option<u64>,
    pub slashed: bool,
    pub contracts: Vec<StakingContract>,
    pub pending_rewards: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorRegistry {
    minimum_stake: Amount,
    validators: BTreeMap<String, Validator>,
    /// Contract arena, indexed by id
    contracts: Vec<StakingContract>,
}

impl ValidatorRegistry {
    pub fn new(minimum_stake: Amount) -> Self {
        Self {
            minimum_stake,
            validators: BTreeMap::new(),
            contracts: Vec::new(),
        }
    }

    pub fn minimum_stake(&self) -> Amount {
        self.minimum_stake
    }

    /// Registers `address` with an initial stake. An address can only be
    /// registered once.
    pub fn register_validator(
        &mut self,
        address: &str,
        stake: Amount,
        now_millis: u64,
    ) -> Result<(), ChainError> {
        if address.trim().is_empty() {
            return Err(ChainError::InvalidAddress(
                "Validator address cannot be empty".to_string(),
            ));
        }
        if stake < self.minimum_stake {
            return Err(ChainError::MinimumStake {
                required: self.minimum_stake,
                provided: stake,
            });
        }
        if self.validators.contains_key(address) {
            return Err(ChainError::ValidatorAlreadyRegistered(address.to_string()));
        }
        self.validators.insert(
            address.to_string(),
            Validator {
                address: address.to_string(),
                staked_amount: stake,
                active_since: now_millis,
                last_validation: now_millis,
                last_validated_height: None,
                slashed: false,
                contracts: BTreeSet::new(),
            },
        );
        Ok(())
    }

    pub fn create_staking_contract(
        &mut self,
        address: &str,
        amount: Amount,
        duration_days: u32,
        now_millis: u64,
    ) -> Result<ContractId, ChainError> {
        if amount <= zero() {
            return Err(ChainError::InvalidTransaction(
                "Staking amount must be greater than zero".to_string(),
            ));
        }
        if duration_days == 0 {
            return Err(ChainError::InvalidTransaction(
                "Staking duration must be at least one day".to_string(),
            ));
        }
        let validator = self
            .validators
            .get_mut(address)
            .ok_or_else(|| ChainError::UnregisteredValidator(address.to_string()))?;
        let staked = validator.staked_amount.checked_add(amount).ok_or_else(|| {
            ChainError::InvalidTransaction(format!(
                "Stake of {} overflows with {} more",
                address, amount
            ))
        })?;

        let id = self.contracts.len() as ContractId;
        self.contracts.push(StakingContract {
            id,
            validator_address: address.to_string(),
            amount,
            duration_days,
            created_at: now_millis,
            claimed_rewards: zero(),
            active: true,
        });
        validator.contracts.insert(id);
        validator.staked_amount = staked;
        Ok(id)
    }

    pub fn get_validator(&self, address: &str) -> Option<&Validator> {
        self.validators.get(address)
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.validators.contains_key(address)
    }

    pub fn contract(&self, id: ContractId) -> Option<&StakingContract> {
        self.contracts.get(id as usize)
    }

    pub fn contracts_of(&self, address: &str) -> Vec<&StakingContract> {
        self.validators
            .get(address)
            .map(|v| v.contracts.iter().filter_map(|id| self.contract(*id)).collect())
            .unwrap_or_default()
    }

    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    pub fn total_staked(&self) -> Amount {
        self.validators
            .values()
            .fold(zero(), |total, v| total.saturating_add(v.staked_amount))
    }

    /// Unpaid rewards across a validator's active contracts.
    pub fn pending_rewards(&self, address: &str, now_millis: u64) -> Amount {
        self.contracts_of(address)
            .into_iter()
            .filter(|c| c.active)
            .fold(zero(), |total, c| total.saturating_add(c.unclaimed_rewards(now_millis)))
    }

    pub fn validator_info(&self, address: &str, now_millis: u64) -> Option<ValidatorInfo> {
        let validator = self.validators.get(address)?;
        Some(ValidatorInfo {
            address: validator.address.clone(),
            staked_amount: validator.staked_amount,
            active_since: validator.active_since,
            last_validation: validator.last_validation,
            last_validated_height: validator.last_validated_height,
            slashed: validator.slashed,
            contracts: self.contracts_of(address).into_iter().cloned().collect(),
            pending_rewards: self.pending_rewards(address, now_millis),
        })
    }

    /// Pays every non-slashed validator the unclaimed rewards of its active
    /// contracts, funded from the staking reserve. Returns one synthetic
    /// transfer per paid validator.
    pub fn distribute_rewards(
        &mut self,
        supply: &mut TokenSupplyLedger,
        block_height: u64,
        now_millis: u64,
    ) -> Vec<Transaction> {
        let mut payouts = Vec::new();
        for validator in self.validators.values_mut() {
            if validator.slashed {
                continue;
            }
            let owed: Vec<(ContractId, Amount)> = validator
                .contracts
                .iter()
                .filter_map(|id| self.contracts.get(*id as usize))
                .filter(|c| c.active)
                .map(|c| (c.id, c.unclaimed_rewards(now_millis)))
                .filter(|(_, owed)| *owed > zero())
                .collect();
            let total = owed
                .iter()
                .fold(zero(), |total, (_, amount)| total.saturating_add(*amount));
            if total <= zero() {
                continue;
            }

            let paid = supply.release_staking_reward(total);
            if paid < total {
                warn!(
                    validator = %validator.address,
                    owed = %total,
                    paid = %paid,
                    "staking reserve cannot cover accrued rewards"
                );
            }
            if paid <= zero() {
                continue;
            }

            let mut remaining = paid;
            for (id, amount) in owed {
                let credit = amount.min(remaining);
                if let Some(contract) = self.contracts.get_mut(id as usize) {
                    contract.claimed_rewards += credit;
                }
                remaining -= credit;
                if remaining <= zero() {
                    break;
                }
            }

            validator.last_validation = now_millis;
            validator.last_validated_height = Some(block_height);
            debug!(
                validator = %validator.address,
                amount = %paid,
                block_height,
                "staking reward issued"
            );
            payouts.push(Transaction::system(
                STAKING_REWARDS_SENDER,
                &validator.address,
                paid,
                now_millis,
            ));
        }
        payouts
    }

    /// Closes a matured contract and returns its principal to the validator
    /// as a synthetic transfer from [`STAKING_ESCROW_SENDER`].
    pub fn withdraw_contract(
        &mut self,
        address: &str,
        id: ContractId,
        now_millis: u64,
    ) -> Result<Transaction, ChainError> {
        let validator = self
            .validators
            .get_mut(address)
            .ok_or_else(|| ChainError::UnregisteredValidator(address.to_string()))?;
        if !validator.contracts.contains(&id) {
            return Err(ChainError::ContractNotFound(id));
        }
        let contract = self
            .contracts
            .get_mut(id as usize)
            .ok_or(ChainError::ContractNotFound(id))?;
        if !contract.active || !contract.can_withdraw(now_millis) {
            return Err(ChainError::ContractNotWithdrawable(id));
        }

        contract.active = false;
        validator.staked_amount -= contract.amount;
        Ok(Transaction::system(
            STAKING_ESCROW_SENDER,
            address,
            contract.amount,
            now_millis,
        ))
    }

    /// Marks a validator ineligible for further rewards. The entry is kept.
    pub fn slash(&mut self, address: &str) -> Result<bool, ChainError> {
        let validator = self
            .validators
            .get_mut(address)
            .ok_or_else(|| ChainError::UnregisteredValidator(address.to_string()))?;
        let newly_slashed = !validator.slashed;
        validator.slashed = true;
        Ok(newly_slashed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economics::TokenAllocations;

    const DAY: u64 = MILLIS_PER_DAY;

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::new(Amount::from_num(10_000))
    }

    fn supply(staking_reserve: u64) -> TokenSupplyLedger {
        TokenSupplyLedger::new(
            Amount::from_num(1_000_000),
            TokenAllocations {
                presale: zero(),
                liquidity: zero(),
                mined: zero(),
                staking_rewards: Amount::from_num(staking_reserve),
                fee_pool: zero(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_minimum_stake_boundary() {
        let mut registry = registry();
        let result = registry.register_validator("0xabc", Amount::from_num(9_999), 0);
        assert!(matches!(result, Err(ChainError::MinimumStake { .. })));
        assert!(registry.register_validator("0xabc", Amount::from_num(10_000), 0).is_ok());
    }

    #[test]
    fn test_reregistration_rejected() {
        let mut registry = registry();
        registry.register_validator("0xabc", Amount::from_num(10_000), 0).unwrap();
        let result = registry.register_validator("0xabc", Amount::from_num(50_000), 0);
        assert_eq!(result, Err(ChainError::ValidatorAlreadyRegistered("0xabc".to_string())));
        assert_eq!(
            registry.get_validator("0xabc").unwrap().staked_amount,
            Amount::from_num(10_000)
        );
    }

    #[test]
    fn test_contract_requires_registration() {
        let mut registry = registry();
        let result = registry.create_staking_contract("0xdef", Amount::from_num(100), 30, 0);
        assert!(matches!(result, Err(ChainError::UnregisteredValidator(_))));
    }

    #[test]
    fn test_contract_increases_stake() {
        let mut registry = registry();
        registry.register_validator("0xabc", Amount::from_num(10_000), 0).unwrap();
        let id = registry
            .create_staking_contract("0xabc", Amount::from_num(5_000), 30, 0)
            .unwrap();
        let validator = registry.get_validator("0xabc").unwrap();
        assert_eq!(validator.staked_amount, Amount::from_num(15_000));
        assert!(validator.contracts.contains(&id));
        assert_eq!(registry.contract(id).unwrap().validator_address, "0xabc");
    }

    #[test]
    fn test_reward_formula_at_maturity() {
        let contract = StakingContract {
            id: 0,
            validator_address: "0xabc".to_string(),
            amount: Amount::from_num(10_000),
            duration_days: 30,
            created_at: 0,
            claimed_rewards: zero(),
            active: true,
        };
        let reward = contract.calculate_rewards(30 * DAY).to_num::<f64>();
        let expected = 10_000.0 * 0.15 + 10_000.0 * 0.05 * (30.0 / 365.0);
        assert!((reward - expected).abs() < 1e-3);
        assert!((reward - 1541.1).abs() < 0.01);
    }

    #[test]
    fn test_reward_completion_caps_but_bonus_does_not() {
        let contract = StakingContract {
            id: 0,
            validator_address: "0xabc".to_string(),
            amount: Amount::from_num(1_000),
            duration_days: 3_650,
            created_at: 0,
            claimed_rewards: zero(),
            active: true,
        };
        // Ten-year duration: the bonus alone is half the principal.
        let at_start = contract.calculate_rewards(0).to_num::<f64>();
        assert!((at_start - 500.0).abs() < 1e-3);
        let long_after = contract.calculate_rewards(100_000 * DAY).to_num::<f64>();
        assert!((long_after - 650.0).abs() < 1e-3);
    }

    #[test]
    fn test_can_withdraw_after_duration() {
        let mut registry = registry();
        registry.register_validator("0xabc", Amount::from_num(10_000), 0).unwrap();
        let id = registry
            .create_staking_contract("0xabc", Amount::from_num(2_000), 10, 0)
            .unwrap();
        assert!(!registry.contract(id).unwrap().can_withdraw(9 * DAY));
        assert!(matches!(
            registry.withdraw_contract("0xabc", id, 9 * DAY),
            Err(ChainError::ContractNotWithdrawable(_))
        ));

        let payout = registry.withdraw_contract("0xabc", id, 10 * DAY).unwrap();
        assert_eq!(payout.sender, STAKING_ESCROW_SENDER);
        assert_eq!(payout.amount, Amount::from_num(2_000));
        assert!(!registry.contract(id).unwrap().active);
        assert_eq!(
            registry.get_validator("0xabc").unwrap().staked_amount,
            Amount::from_num(10_000)
        );
        // A closed contract cannot be withdrawn twice.
        assert!(registry.withdraw_contract("0xabc", id, 11 * DAY).is_err());
    }

    #[test]
    fn test_distribute_pays_only_unclaimed() {
        let mut registry = registry();
        let mut supply = supply(100_000);
        registry.register_validator("0xabc", Amount::from_num(10_000), 0).unwrap();
        registry
            .create_staking_contract("0xabc", Amount::from_num(10_000), 30, 0)
            .unwrap();

        let first = registry.distribute_rewards(&mut supply, 1, 15 * DAY);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].sender, STAKING_REWARDS_SENDER);
        assert_eq!(first[0].recipient, "0xabc");

        let second = registry.distribute_rewards(&mut supply, 2, 30 * DAY);
        let total = (first[0].amount + second[0].amount).to_num::<f64>();
        assert!((total - 1541.1).abs() < 0.01);

        // Nothing new accrues after maturity.
        assert!(registry.distribute_rewards(&mut supply, 3, 40 * DAY).is_empty());
        let info = registry.validator_info("0xabc", 40 * DAY).unwrap();
        assert_eq!(info.last_validated_height, Some(2));
        assert_eq!(info.pending_rewards, zero());
    }

    #[test]
    fn test_slashed_validator_skipped() {
        let mut registry = registry();
        let mut supply = supply(100_000);
        for addr in ["0xaaa", "0xbbb"] {
            registry.register_validator(addr, Amount::from_num(10_000), 0).unwrap();
            registry
                .create_staking_contract(addr, Amount::from_num(1_000), 10, 0)
                .unwrap();
        }
        assert!(registry.slash("0xaaa").unwrap());
        assert!(!registry.slash("0xaaa").unwrap());

        let payouts = registry.distribute_rewards(&mut supply, 1, 5 * DAY);
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].recipient, "0xbbb");
        assert!(registry.get_validator("0xaaa").unwrap().slashed);
    }

    #[test]
    fn test_distribution_limited_by_reserve() {
        let mut registry = registry();
        let mut supply = supply(100);
        registry.register_validator("0xabc", Amount::from_num(10_000), 0).unwrap();
        registry
            .create_staking_contract("0xabc", Amount::from_num(10_000), 30, 0)
            .unwrap();
        let payouts = registry.distribute_rewards(&mut supply, 1, 30 * DAY);
        assert_eq!(payouts[0].amount, Amount::from_num(100));
        assert_eq!(supply.allocations().staking_rewards, zero());
        // The shortfall stays claimable.
        assert!(registry.pending_rewards("0xabc", 30 * DAY) > Amount::from_num(1_400));
    }
}
