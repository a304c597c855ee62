use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::validation::{validate_block_contents, validate_link, validate_seal};

/// Lowercase hex SHA-256 digest.
pub type BlockHash = String;

pub const GENESIS_TIMESTAMP: u64 = 1672531200000;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_VALIDATOR: &str = "genesis";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: BlockHash,
    pub hash: BlockHash,
    pub nonce: u64,
    /// Required number of leading zero hex digits in `hash`
    pub difficulty: u32,
    /// Address that sealed the block
    pub validator: String,
}

impl Block {
    /// Builds an unsealed candidate with `nonce = 0`.
    pub fn new(
        index: u64,
        timestamp: u64,
        previous_hash: BlockHash,
        difficulty: u32,
        validator: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            hash: BlockHash::new(),
            nonce: 0,
            difficulty,
            validator: validator.into(),
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn genesis() -> Self {
        Block::new(
            0,
            GENESIS_TIMESTAMP,
            GENESIS_PREVIOUS_HASH.to_string(),
            0,
            GENESIS_VALIDATOR,
            Vec::new(),
        )
    }

    /// Hasher state covering every hashed field except the nonce, which is
    /// absorbed last. Mining clones this once per attempt.
    pub fn hash_prefix(&self) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.hash());
        }
        hasher.update(self.previous_hash.as_bytes());
        hasher
    }

    pub fn hash_with_prefix(prefix: &Sha256, nonce: u64) -> [u8; 32] {
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_le_bytes());
        hasher.finalize().into()
    }

    /// `H(index, timestamp, transactions, previous_hash, nonce)` as hex.
    pub fn calculate_hash(&self) -> BlockHash {
        hex::encode(Self::hash_with_prefix(&self.hash_prefix(), self.nonce))
    }

    pub fn meets_difficulty(&self) -> bool {
        meets_difficulty(&self.hash, self.difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// Number of leading zero hex digits (nibbles) in a digest.
pub fn leading_zero_digits(hash: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
        } else {
            if *byte < 0x10 {
                count += 1;
            }
            break;
        }
    }
    count
}

pub fn meets_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    hash_hex.bytes().take_while(|c| *c == b'0').count() >= difficulty as usize
}

/// Ordered, hash-linked sequence of sealed blocks. Always holds the genesis
/// block at index 0; a deserialized chain is re-validated before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredChain")]
pub struct Chain {
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct StoredChain {
    blocks: Vec<Block>,
}

impl TryFrom<StoredChain> for Chain {
    type Error = ChainError;

    fn try_from(stored: StoredChain) -> Result<Self, Self::Error> {
        let chain = Chain {
            blocks: stored.blocks,
        };
        chain.validate_chain()?;
        Ok(chain)
    }
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            blocks: vec![Block::genesis()],
        }
    }

    pub fn latest_block(&self) -> &Block {
        // Construction and deserialization both guarantee a genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn try_latest_block(&self) -> Result<&Block, ChainError> {
        self.blocks.last().ok_or(ChainError::EmptyChain)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Index of the tip.
    pub fn height(&self) -> u64 {
        self.latest_block().index
    }

    /// Appends a sealed block on top of the current tip.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        validate_link(self.latest_block(), &block)?;
        validate_seal(&block)?;
        validate_block_contents(&block)?;
        self.blocks.push(block);
        Ok(())
    }

    /// Re-verifies every link and seal from genesis to tip.
    pub fn validate_chain(&self) -> Result<(), ChainError> {
        let genesis = self.blocks.first().ok_or(ChainError::EmptyChain)?;
        if *genesis != Block::genesis() {
            return Err(ChainError::ChainIntegrity(
                "Genesis block has been altered".to_string(),
            ));
        }
        for pair in self.blocks.windows(2) {
            validate_link(&pair[0], &pair[1])?;
            validate_seal(&pair[1])?;
            validate_block_contents(&pair[1])?;
        }
        Ok(())
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economics::Amount;
    use crate::transaction::TxStatus;

    fn seal(mut block: Block) -> Block {
        let prefix = block.hash_prefix();
        loop {
            let digest = Block::hash_with_prefix(&prefix, block.nonce);
            if leading_zero_digits(&digest) >= block.difficulty {
                block.hash = hex::encode(digest);
                return block;
            }
            block.nonce += 1;
        }
    }

    fn confirmed_tx(amount: u64) -> Transaction {
        let mut tx = Transaction::new("alice", "bob", Amount::from_num(amount), 1_000);
        tx.id = tx.compute_id();
        tx.status = TxStatus::Confirmed;
        tx
    }

    fn next_block(chain: &Chain, difficulty: u32, txs: Vec<Transaction>) -> Block {
        let tip = chain.latest_block();
        seal(Block::new(
            tip.index + 1,
            tip.timestamp + 1,
            tip.hash.clone(),
            difficulty,
            "miner",
            txs,
        ))
    }

    #[test]
    fn test_genesis_shape() {
        let chain = Chain::new();
        let genesis = chain.latest_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.difficulty, 0);
        assert_eq!(genesis.validator, "genesis");
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash, genesis.calculate_hash());
        // Genesis is deterministic across instances.
        assert_eq!(genesis.hash, Chain::new().latest_block().hash);
    }

    #[test]
    fn test_leading_zero_digits() {
        let mut hash = [0xffu8; 32];
        assert_eq!(leading_zero_digits(&hash), 0);
        hash[0] = 0x0f;
        assert_eq!(leading_zero_digits(&hash), 1);
        hash[0] = 0x00;
        hash[1] = 0x10;
        assert_eq!(leading_zero_digits(&hash), 2);
        assert_eq!(leading_zero_digits(&[0u8; 32]), 64);
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0ab0", 2));
    }

    #[test]
    fn test_append_links_blocks() {
        let mut chain = Chain::new();
        let block = next_block(&chain, 2, vec![confirmed_tx(1)]);
        chain.append(block).unwrap();
        let block = next_block(&chain, 1, vec![]);
        chain.append(block).unwrap();

        assert_eq!(chain.len(), 3);
        for pair in chain.blocks().windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
        }
        for block in chain.blocks() {
            assert_eq!(block.hash, block.calculate_hash());
            assert!(block.meets_difficulty());
        }
        assert!(chain.validate_chain().is_ok());
    }

    #[test]
    fn test_append_rejects_wrong_previous_hash() {
        let mut chain = Chain::new();
        let mut block = Block::new(1, 2, "deadbeef".to_string(), 0, "miner", vec![]);
        block = seal(block);
        assert!(matches!(chain.append(block), Err(ChainError::ChainIntegrity(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_wrong_index() {
        let mut chain = Chain::new();
        let tip = chain.latest_block().clone();
        let block = seal(Block::new(5, 2, tip.hash, 0, "miner", vec![]));
        assert!(matches!(chain.append(block), Err(ChainError::ChainIntegrity(_))));
    }

    #[test]
    fn test_append_rejects_tampered_hash() {
        let mut chain = Chain::new();
        let mut block = next_block(&chain, 1, vec![confirmed_tx(7)]);
        block.transactions[0].amount = Amount::from_num(700);
        assert!(matches!(chain.append(block), Err(ChainError::ChainIntegrity(_))));
    }

    #[test]
    fn test_append_rejects_insufficient_work() {
        let mut chain = Chain::new();
        let tip = chain.latest_block().clone();
        let mut block = Block::new(1, 2, tip.hash, 3, "miner", vec![]);
        // Find a nonce whose hash is valid but misses the difficulty.
        while meets_difficulty(&block.calculate_hash(), 3) {
            block.nonce += 1;
        }
        block.hash = block.calculate_hash();
        assert!(matches!(chain.append(block), Err(ChainError::ChainIntegrity(_))));
    }

    #[test]
    fn test_validate_chain_detects_mutation() {
        let mut chain = Chain::new();
        let block = next_block(&chain, 1, vec![confirmed_tx(1)]);
        chain.append(block).unwrap();
        let block = next_block(&chain, 1, vec![]);
        chain.append(block).unwrap();

        let mut tampered = chain.clone();
        tampered.blocks[1].transactions[0].recipient = "mallory".to_string();
        assert!(tampered.validate_chain().is_err());
    }

    #[test]
    fn test_deserialize_revalidates() {
        let mut chain = Chain::new();
        let block = next_block(&chain, 1, vec![confirmed_tx(1)]);
        chain.append(block).unwrap();

        let json = serde_json::to_string(&chain).unwrap();
        let restored: Chain = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.blocks(), chain.blocks());

        let err = serde_json::from_str::<Chain>(r#"{"blocks":[]}"#).unwrap_err();
        assert!(err.to_string().contains("no genesis block"));

        let mut tampered = chain.clone();
        tampered.blocks[1].nonce += 1;
        let json = serde_json::to_string(&tampered).unwrap();
        assert!(serde_json::from_str::<Chain>(&json).is_err());
    }
}
