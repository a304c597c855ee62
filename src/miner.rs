//! Proof-of-work mining
//!
//! A block is sealed by searching nonces from zero upwards until its hash has
//! at least `difficulty` leading zero hex digits. The search is unbounded; the
//! caller can stop it through a cancellation flag.

use crate::blockchain::{leading_zero_digits, Block, Chain};
use crate::config::MiningConfig;
use crate::error::ChainError;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Nonces tried between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4_096;
/// Nonces handed to the thread pool per parallel round.
const PARALLEL_BATCH: u64 = 65_536;

/// Seals `block` on the current thread.
pub fn mine_block(block: Block, cancel: &AtomicBool) -> Result<Block, ChainError> {
    search(block, cancel, CANCEL_CHECK_INTERVAL, |prefix, start, end, difficulty| {
        (start..end).find(|nonce| {
            leading_zero_digits(&Block::hash_with_prefix(prefix, *nonce)) >= difficulty
        })
    })
}

/// Shared search loop. `scan` looks for the smallest satisfying nonce in
/// `[start, end)`.
fn search<F>(
    mut block: Block,
    cancel: &AtomicBool,
    step: u64,
    scan: F,
) -> Result<Block, ChainError>
where
    F: Fn(&sha2::Sha256, u64, u64, u32) -> Option<u64>,
{
    let difficulty = block.difficulty;
    loop {
        let prefix = block.hash_prefix();
        let mut start = 0u64;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(ChainError::MiningCancelled);
            }
            let end = start.saturating_add(step);
            if let Some(nonce) = scan(&prefix, start, end, difficulty) {
                block.nonce = nonce;
                block.hash = hex::encode(Block::hash_with_prefix(&prefix, nonce));
                return Ok(block);
            }
            if end == u64::MAX {
                break;
            }
            start = end;
        }
        // Nonce space exhausted: move the timestamp and start over.
        block.timestamp += 1;
    }
}

/// Block sealer with an optional dedicated thread pool.
pub struct Miner {
    pool: Option<rayon::ThreadPool>,
}

impl Miner {
    pub fn new(threads: usize) -> Result<Self, ChainError> {
        let pool = if threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("ontiblock-miner-{}", i))
                    .build()
                    .map_err(|e| {
                        ChainError::ConfigError(format!("Failed to start miner threads: {}", e))
                    })?,
            )
        } else {
            None
        };
        Ok(Self { pool })
    }

    /// Seals `block`. Single- and multi-threaded searches return the same
    /// (smallest) winning nonce.
    pub fn seal(&self, block: Block, cancel: &AtomicBool) -> Result<Block, ChainError> {
        match &self.pool {
            None => mine_block(block, cancel),
            Some(pool) => pool.install(|| {
                search(block, cancel, PARALLEL_BATCH, |prefix, start, end, difficulty| {
                    (start..end).into_par_iter().find_first(|nonce| {
                        leading_zero_digits(&Block::hash_with_prefix(prefix, *nonce)) >= difficulty
                    })
                })
            }),
        }
    }
}

/// Difficulty for the block after the current tip.
///
/// Every `retarget_interval` blocks the difficulty moves one hex digit up when
/// the window was mined faster than half the target time, and one down when it
/// took more than twice as long, clamped to the configured bounds.
pub fn next_difficulty(chain: &Chain, current: u32, config: &MiningConfig) -> u32 {
    let interval = config.retarget_interval;
    let height = chain.height();
    if interval == 0 || height == 0 || height % interval != 0 {
        return current;
    }
    let (Some(window_start), Some(tip)) = (chain.get(height - interval), chain.get(height)) else {
        return current;
    };
    // Genesis carries a fixed historical timestamp; skip the first window.
    if window_start.is_genesis() {
        return current;
    }
    let actual = tip.timestamp.saturating_sub(window_start.timestamp);
    let expected = interval * config.target_block_time_secs * 1000;
    let adjusted = if actual < expected / 2 {
        current + 1
    } else if actual > expected * 2 {
        current.saturating_sub(1)
    } else {
        current
    };
    adjusted.clamp(config.min_difficulty, config.max_difficulty)
}
