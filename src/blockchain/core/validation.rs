use crate::error::ChainError;
use crate::transaction::TxStatus;
use std::collections::HashSet;

use super::chain::Block;

/// `block` must sit directly on top of `tip`.
pub fn validate_link(tip: &Block, block: &Block) -> Result<(), ChainError> {
    if block.index != tip.index + 1 {
        return Err(ChainError::ChainIntegrity(format!(
            "Invalid block index. Expected {}, but got {}.",
            tip.index + 1,
            block.index
        )));
    }
    if block.previous_hash != tip.hash {
        return Err(ChainError::ChainIntegrity(format!(
            "Invalid previous block hash. Expected {}, but got {}.",
            tip.hash, block.previous_hash
        )));
    }
    Ok(())
}

/// The stored hash must match the block's fields and satisfy its difficulty.
pub fn validate_seal(block: &Block) -> Result<(), ChainError> {
    let expected = block.calculate_hash();
    if expected != block.hash {
        return Err(ChainError::ChainIntegrity(format!(
            "Block hash mismatch at index {}. Expected {}, but got {}.",
            block.index, expected, block.hash
        )));
    }
    if !block.meets_difficulty() {
        return Err(ChainError::ChainIntegrity(format!(
            "Invalid Proof-of-Work: hash {} has fewer than {} leading zero digits.",
            block.hash, block.difficulty
        )));
    }
    Ok(())
}

/// Every transaction is sealed (confirmed) and appears once.
pub fn validate_block_contents(block: &Block) -> Result<(), ChainError> {
    let mut seen = HashSet::new();
    for tx in &block.transactions {
        if tx.status != TxStatus::Confirmed {
            return Err(ChainError::ChainIntegrity(format!(
                "Transaction {} in block {} is not confirmed",
                tx.id, block.index
            )));
        }
        if !seen.insert(tx.id.as_str()) {
            return Err(ChainError::ChainIntegrity(format!(
                "Transaction {} appears twice in block {}",
                tx.id, block.index
            )));
        }
    }
    Ok(())
}
