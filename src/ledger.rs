//! Ledger facade
//!
//! Chain, pending pool, token supply, validator registry and fee parameters
//! form one unit of state behind a single mutex. Every mutation takes the lock
//! for its whole check-then-apply sequence. Mining is the exception: the nonce
//! search runs on a snapshot without the lock and the result is re-validated
//! against the tip before it is appended.

use crate::analytics::{Analytics, AnalyticsEvent, AnalyticsSink, HttpAnalyticsSink, NoopSink};
use crate::blockchain::{Block, BlockHash, Chain};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, MiningConfig, TokenConfig};
use crate::economics::{
    base_staking_reward, block_reward, zero, Amount, EconomicState, TokenEconomics,
    TokenSupplyLedger, FEE_BURN_RATE, STAKING_APY,
};
use crate::error::{ChainError, Result};
use crate::fees::{congestion, FeeMarket};
use crate::mempool::TransactionPool;
use crate::miner::{next_difficulty, Miner};
use crate::staking::{ContractId, ValidatorInfo, ValidatorRegistry};
use crate::transaction::{
    SignatureVerifier, Transaction, TransactionValidator, TxId, TxStatus, MINING_REWARDS_SENDER,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything guarded by the ledger lock.
struct LedgerState {
    chain: Chain,
    pool: TransactionPool,
    supply: TokenSupplyLedger,
    registry: ValidatorRegistry,
    fees: FeeMarket,
    difficulty: u32,
    /// Ids of user transactions already sealed into a block
    confirmed: HashSet<TxId>,
    /// Sequence for tagging ledger-issued transfers
    system_seq: u64,
}

impl LedgerState {
    /// Queues a ledger-issued transfer for the next block.
    fn queue_system(&mut self, tx: Transaction, kind: &str) -> Option<TxId> {
        self.system_seq += 1;
        let tx = tx.with_reference(format!("{}#{}", kind, self.system_seq));
        let id = tx.id.clone();
        match self.pool.add_system(tx) {
            Ok(()) => Some(id),
            Err(e) => {
                warn!("Failed to queue {} transfer {}: {}", kind, id, e);
                None
            }
        }
    }

    fn distribute_rewards(&mut self, block_height: u64, now: u64) -> Vec<TxId> {
        let payouts = self
            .registry
            .distribute_rewards(&mut self.supply, block_height, now);
        payouts
            .into_iter()
            .filter_map(|tx| self.queue_system(tx, "staking-reward"))
            .collect()
    }
}

/// Optional collaborators for [`Ledger`]. Anything left unset falls back to
/// the defaults described on each setter.
pub struct LedgerBuilder {
    config: Config,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn AnalyticsSink>>,
}

impl LedgerBuilder {
    /// Signature check for submissions. Defaults to accepting everything.
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Time source. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Analytics target. Defaults to the HTTP sink when analytics is enabled
    /// in the config and to a no-op sink otherwise.
    pub fn analytics_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Ledger> {
        let config = self.config;
        config.validate()?;

        let sink: Arc<dyn AnalyticsSink> = match self.sink {
            Some(sink) => sink,
            None if config.analytics.enabled => {
                match HttpAnalyticsSink::from_config(&config.analytics) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        warn!("Analytics disabled, failed to build HTTP client: {}", e);
                        Arc::new(NoopSink)
                    }
                }
            }
            None => Arc::new(NoopSink),
        };
        let validator = match self.verifier {
            Some(verifier) => TransactionValidator::new(verifier),
            None => {
                warn!("No signature verifier configured; all signatures will be accepted");
                TransactionValidator::default()
            }
        };

        let state = LedgerState {
            chain: Chain::new(),
            pool: TransactionPool::new(),
            supply: TokenSupplyLedger::from_config(&config.token)?,
            registry: ValidatorRegistry::new(Amount::saturating_from_num(
                config.staking.minimum_stake,
            )),
            fees: FeeMarket::from_config(&config.fees)?,
            difficulty: config.mining.difficulty,
            confirmed: HashSet::new(),
            system_seq: 0,
        };

        info!(
            "Ledger ready (network_id = {}, difficulty = {}, miner threads = {})",
            config.network_id, config.mining.difficulty, config.mining.threads
        );

        Ok(Ledger {
            state: Mutex::new(state),
            validator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            analytics: Analytics::from_config(sink, &config.analytics),
            miner: Miner::new(config.mining.threads)?,
            token: config.token,
            mining: config.mining,
        })
    }
}

pub struct Ledger {
    state: Mutex<LedgerState>,
    validator: TransactionValidator,
    clock: Arc<dyn Clock>,
    analytics: Analytics,
    miner: Miner,
    token: TokenConfig,
    mining: MiningConfig,
}

impl Ledger {
    /// Ledger with default collaborators for `config`.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> LedgerBuilder {
        LedgerBuilder {
            config,
            verifier: None,
            clock: None,
            sink: None,
        }
    }

    /// Validates `tx`, tags it with its id and fee, applies its allocation
    /// effects and queues it. Either all of that happens or none of it.
    pub fn submit_transaction(&self, mut tx: Transaction) -> Result<TxId> {
        let now = self.clock.now_millis();
        tx.status = TxStatus::Pending;
        tx.fee = zero();
        tx.id = tx.compute_id();
        self.validator.validate(&tx, now)?;

        let bucket = tx.bucket();
        {
            let mut state = self.state.lock();
            if state.confirmed.contains(&tx.id) {
                return Err(ChainError::InvalidTransaction(format!(
                    "Transaction {} is already confirmed",
                    tx.id
                )));
            }
            let fee = state.fees.fee_for(&tx)?;
            state.pool.check_admission(&tx.id)?;
            state.supply.check_admission(bucket, tx.amount, fee)?;

            tx.fee = fee;
            state.supply.apply_admission(bucket, tx.amount, fee)?;
            state.pool.add(tx.clone())?;
        }

        debug!(id = %tx.id, fee = %tx.fee, "transaction admitted");
        let id = tx.id.clone();
        self.analytics.notify(AnalyticsEvent::Transaction(tx));
        Ok(id)
    }

    pub fn register_validator(&self, address: &str, stake: Amount) -> Result<()> {
        let now = self.clock.now_millis();
        self.state.lock().registry.register_validator(address, stake, now)?;
        info!("Registered validator {} with stake {}", address, stake);
        self.analytics.notify(AnalyticsEvent::ValidatorRegistered {
            address: address.to_string(),
            stake,
        });
        Ok(())
    }

    pub fn create_staking_contract(
        &self,
        validator: &str,
        amount: Amount,
        duration_days: u32,
    ) -> Result<ContractId> {
        let now = self.clock.now_millis();
        let id = self
            .state
            .lock()
            .registry
            .create_staking_contract(validator, amount, duration_days, now)?;
        info!(
            "Staking contract {} created for {} ({} over {} days)",
            id, validator, amount, duration_days
        );
        Ok(id)
    }

    /// Mines the pending pool into a new block credited to `validator`.
    pub fn mine_block(&self, validator: &str) -> Result<BlockHash> {
        self.mine_block_with_cancel(validator, &AtomicBool::new(false))
    }

    /// Like [`Ledger::mine_block`], but the nonce search stops with
    /// [`ChainError::MiningCancelled`] once `cancel` is set. A cancelled search
    /// leaves pool and chain untouched.
    pub fn mine_block_with_cancel(
        &self,
        validator: &str,
        cancel: &AtomicBool,
    ) -> Result<BlockHash> {
        if validator.trim().is_empty() {
            return Err(ChainError::InvalidAddress(
                "Validator address cannot be empty".to_string(),
            ));
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let (candidate, included, reward) = self.block_template(validator);
            let sealed = self.miner.seal(candidate, cancel)?;
            let Some(payouts) = self.try_append(&sealed, included, reward)? else {
                debug!(attempts, "chain tip moved during mining; retrying");
                continue;
            };

            info!(
                "Mined block {} ({} transactions, nonce {}, {} staking payouts): {}",
                sealed.index,
                sealed.transactions.len(),
                sealed.nonce,
                payouts.len(),
                sealed.hash
            );
            let hash = sealed.hash.clone();
            self.analytics.notify(AnalyticsEvent::BlockCreated(sealed));
            return Ok(hash);
        }
    }

    /// Appends `sealed` if it still extends the tip, then settles the subsidy,
    /// the pool and staking rewards. `Ok(None)` when the tip has moved; nothing
    /// is changed in that case.
    fn try_append(
        &self,
        sealed: &Block,
        included: Vec<TxId>,
        reward: Amount,
    ) -> Result<Option<Vec<TxId>>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.chain.latest_block().hash != sealed.previous_hash {
            return Ok(None);
        }

        state.chain.append(sealed.clone())?;
        if reward > zero() {
            state.supply.release_block_reward(reward);
        }
        state.pool.remove_many(included.iter().map(String::as_str));
        state.confirmed.extend(included);
        state.difficulty = next_difficulty(&state.chain, state.difficulty, &self.mining);
        Ok(Some(state.distribute_rewards(sealed.index, self.clock.now_millis())))
    }

    /// Candidate for the next block: subsidy first, then pending transactions
    /// in admission order up to the block capacity.
    fn block_template(&self, validator: &str) -> (Block, Vec<TxId>, Amount) {
        let state = self.state.lock();
        let now = self.clock.now_millis();
        let tip = state.chain.latest_block();
        let index = tip.index + 1;

        let reward = block_reward(
            Amount::saturating_from_num(self.mining.initial_block_reward),
            self.mining.halving_interval,
            index,
        )
        .min(state.supply.allocations().mined);

        let mut transactions = Vec::new();
        if reward > zero() {
            let mut subsidy = Transaction::system(MINING_REWARDS_SENDER, validator, reward, now)
                .with_reference(format!("block#{}", index));
            subsidy.status = TxStatus::Confirmed;
            transactions.push(subsidy);
        }

        let batch = state.pool.take_batch(self.mining.block_capacity);
        let included = batch.iter().map(|tx| tx.id.clone()).collect();
        transactions.extend(batch.into_iter().map(|mut tx| {
            tx.status = TxStatus::Confirmed;
            tx
        }));

        let block = Block::new(
            index,
            now.max(tip.timestamp),
            tip.hash.clone(),
            state.difficulty,
            validator,
            transactions,
        );
        (block, included, reward)
    }

    /// Pays accrued staking rewards, queuing one transfer per validator.
    pub fn distribute_rewards(&self, block_height: u64) -> Vec<TxId> {
        let now = self.clock.now_millis();
        self.state.lock().distribute_rewards(block_height, now)
    }

    /// Empties the fee pool: 80 % to `validator`, 20 % burned. `None` when
    /// there was nothing to distribute.
    pub fn distribute_fees(&self, validator: &str) -> Result<Option<TxId>> {
        if validator.trim().is_empty() {
            return Err(ChainError::InvalidAddress(
                "Validator address cannot be empty".to_string(),
            ));
        }
        let now = self.clock.now_millis();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(distribution) = FeeMarket::distribute_fees(&mut state.supply, validator, now)
        else {
            return Ok(None);
        };
        info!(
            "Distributed fees to {}: {} paid, {} burned",
            validator, distribution.reward.amount, distribution.burned
        );
        Ok(state.queue_system(distribution.reward, "fee-distribution"))
    }

    /// Recomputes the fee parameters from `congestion`. Pending transactions
    /// keep the fee they were admitted with.
    pub fn adjust_fee_structure(&self, congestion: f64) -> Result<()> {
        let (base_fee, priority_rate) = {
            let mut state = self.state.lock();
            state.fees.adjust(congestion)?;
            (state.fees.base_fee(), state.fees.priority_fee_rate())
        };
        debug!(
            congestion,
            base_fee = %base_fee,
            priority_rate = %priority_rate,
            "fee structure adjusted"
        );
        self.analytics.notify(AnalyticsEvent::FeeAdjustment {
            base_fee,
            priority_rate,
        });
        Ok(())
    }

    /// Closes a matured contract and queues the principal back to its owner.
    pub fn withdraw_staking_contract(&self, validator: &str, id: ContractId) -> Result<TxId> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let payout = state.registry.withdraw_contract(validator, id, now)?;
        info!("Staking contract {} withdrawn by {}", id, validator);
        state.queue_system(payout, "staking-withdrawal").ok_or_else(|| {
            ChainError::InvalidTransaction(format!(
                "Withdrawal of contract {} could not be queued",
                id
            ))
        })
    }

    /// Excludes `address` from future reward distributions. Returns `false`
    /// when it was already slashed.
    pub fn slash_validator(&self, address: &str) -> Result<bool> {
        let newly_slashed = self.state.lock().registry.slash(address)?;
        if newly_slashed {
            warn!("Validator {} slashed", address);
        }
        Ok(newly_slashed)
    }

    /// Owned copy of every block from genesis to tip.
    pub fn get_chain(&self) -> Vec<Block> {
        self.state.lock().chain.blocks().to_vec()
    }

    pub fn get_latest_block(&self) -> Block {
        self.state.lock().chain.latest_block().clone()
    }

    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().pool.snapshot()
    }

    pub fn get_token_economics(&self) -> TokenEconomics {
        let state = self.state.lock();
        TokenEconomics {
            name: self.token.name.clone(),
            symbol: self.token.symbol.clone(),
            decimals: self.token.decimals,
            total_supply: state.supply.total_supply(),
            circulating_supply: state.supply.circulating(),
            total_burned: state.supply.total_burned(),
            total_staked: state.registry.total_staked(),
            allocations: *state.supply.allocations(),
            base_fee: state.fees.base_fee(),
            priority_fee_rate: state.fees.priority_fee_rate(),
        }
    }

    pub fn get_validator_info(&self, address: &str) -> Option<ValidatorInfo> {
        let now = self.clock.now_millis();
        self.state.lock().registry.validator_info(address, now)
    }

    /// Fixed economic parameters plus advisory analytics figures. Analytics
    /// is queried without holding the ledger lock.
    pub fn get_economic_state(&self) -> EconomicState {
        EconomicState {
            staking_apy: STAKING_APY,
            fee_burn_rate: FEE_BURN_RATE.to_num(),
            predicted_yield: self.analytics.predict_network_yield(),
            suggested_actions: self.analytics.optimization_suggestions(),
        }
    }

    /// `amount * APY * days / 365` plus the analytics bonus prediction.
    pub fn estimate_staking_rewards(&self, amount: Amount, duration_days: u32) -> Amount {
        let bonus = self.analytics.predict_staking_bonus(amount, duration_days);
        base_staking_reward(amount, duration_days)
            .saturating_add(Amount::saturating_from_num(bonus))
    }

    /// Pending transactions relative to block capacity.
    pub fn congestion(&self) -> f64 {
        congestion(self.state.lock().pool.len(), self.mining.block_capacity)
    }

    /// Difficulty the next block will be mined at.
    pub fn difficulty(&self) -> u32 {
        self.state.lock().difficulty
    }

    pub fn height(&self) -> u64 {
        self.state.lock().chain.height()
    }

    /// Re-verifies the chain and the supply invariant.
    pub fn validate(&self) -> Result<()> {
        let state = self.state.lock();
        state.chain.validate_chain()?;
        if !state.supply.is_conserved() {
            return Err(ChainError::ChainIntegrity(
                "Token allocations exceed total supply".to_string(),
            ));
        }
        Ok(())
    }

    /// Waits for queued analytics notifications to be handled.
    pub fn flush_analytics(&self, timeout: std::time::Duration) -> bool {
        self.analytics.flush(timeout)
    }
}
