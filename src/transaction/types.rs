/// Transaction types for OntiBlock
use crate::economics::{zero, Amount, Bucket};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type TxId = String;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Sender of the validator share when the fee pool is distributed.
pub const FEE_POOL_SENDER: &str = "fee_pool";
/// Sender of periodic staking-contract rewards.
pub const STAKING_REWARDS_SENDER: &str = "staking_rewards";
/// Sender of the per-block subsidy paid out of the mining reserve.
pub const MINING_REWARDS_SENDER: &str = "mining_rewards";
/// Sender of principal returned by a matured staking contract.
pub const STAKING_ESCROW_SENDER: &str = "staking_escrow";

/// Senders only the ledger itself may use.
pub const RESERVED_SENDERS: [&str; 4] = [
    FEE_POOL_SENDER,
    STAKING_REWARDS_SENDER,
    MINING_REWARDS_SENDER,
    STAKING_ESCROW_SENDER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    fn tag(&self) -> u8 {
        match self {
            TxStatus::Pending => 0,
            TxStatus::Confirmed => 1,
            TxStatus::Failed => 2,
        }
    }
}

/// Optional admission metadata carried by a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxData {
    /// Spend from the presale allocation bucket
    #[serde(default)]
    pub is_presale: bool,
    /// Spend from the liquidity allocation bucket
    #[serde(default)]
    pub is_liquidity: bool,
    #[serde(default)]
    pub memo: Option<String>,
}

/// A value transfer between two addresses.
///
/// `fee` and `status` are only changed by the ledger: the fee once at pool
/// admission, the status when the transaction is sealed into a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub sender: String,
    pub recipient: String,
    pub amount: Amount,
    /// Unix time in milliseconds
    pub timestamp: u64,
    pub signature: String,
    pub status: TxStatus,
    pub fee: Amount,
    #[serde(default)]
    pub data: Option<TxData>,
}

impl Transaction {
    /// Maximum memo length (256 characters)
    pub const MAX_MEMO_LENGTH: usize = 256;

    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: Amount,
        timestamp: u64,
    ) -> Self {
        Transaction {
            id: TxId::new(),
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            timestamp,
            signature: String::new(),
            status: TxStatus::Pending,
            fee: zero(),
            data: None,
        }
    }

    /// Ledger-issued transfer from one of the [`RESERVED_SENDERS`].
    pub(crate) fn system(sender: &str, recipient: &str, amount: Amount, timestamp: u64) -> Self {
        let mut tx = Transaction::new(sender, recipient, amount, timestamp);
        tx.id = tx.compute_id();
        tx
    }

    /// Tags a ledger-issued transfer and re-derives its id, so two payouts
    /// with equal amounts at the same instant stay distinct.
    pub(crate) fn with_reference(mut self, reference: String) -> Self {
        self.data.get_or_insert_with(TxData::default).memo = Some(reference);
        self.id = self.compute_id();
        self
    }

    pub fn with_data(mut self, data: TxData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_memo(mut self, memo: String) -> Result<Self, ChainError> {
        if memo.len() > Self::MAX_MEMO_LENGTH {
            return Err(ChainError::InvalidTransaction(format!(
                "Memo exceeds maximum length of {} characters",
                Self::MAX_MEMO_LENGTH
            )));
        }
        self.data.get_or_insert_with(TxData::default).memo = Some(memo);
        Ok(self)
    }

    pub fn sign(&mut self, signature: String) {
        self.signature = signature;
    }

    pub fn is_presale(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.is_presale)
    }

    pub fn is_liquidity(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.is_liquidity)
    }

    pub fn memo(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.memo.as_deref())
    }

    /// Allocation bucket this transaction draws from, if any.
    pub fn bucket(&self) -> Option<Bucket> {
        if self.is_presale() {
            Some(Bucket::Presale)
        } else if self.is_liquidity() {
            Some(Bucket::Liquidity)
        } else {
            None
        }
    }

    pub fn is_system(&self) -> bool {
        RESERVED_SENDERS.contains(&self.sender.as_str())
    }

    /// Bytes covered by the signature and the transaction id.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice("TRANSFER:".as_bytes());
        message.extend_from_slice(self.sender.as_bytes());
        message.push(0);
        message.extend_from_slice(self.recipient.as_bytes());
        message.push(0);
        message.extend_from_slice(&self.amount.to_le_bytes());
        message.extend_from_slice(&self.timestamp.to_le_bytes());
        message.push(self.is_presale() as u8);
        message.push(self.is_liquidity() as u8);
        if let Some(memo) = self.memo() {
            message.extend_from_slice(memo.as_bytes());
        }
        message
    }

    pub fn compute_id(&self) -> TxId {
        hex::encode(Sha256::digest(self.signable_message()))
    }

    /// Digest of the full transaction, including ledger-assigned fields.
    /// This is what a block hash commits to.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update("tx".as_bytes());
        hasher.update(self.id.as_bytes());
        hasher.update(self.signable_message());
        hasher.update(self.signature.as_bytes());
        hasher.update(self.fee.to_le_bytes());
        hasher.update([self.status.tag()]);
        hasher.finalize().into()
    }

    pub fn serialized_size(&self) -> Result<usize, ChainError> {
        Ok(bincode::serialized_size(self)? as usize)
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let size = self.serialized_size()?;
        if size > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}
