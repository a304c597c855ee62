/// Admission checks for transactions, separated from type definitions
use crate::economics::zero;
use crate::error::ChainError;
use crate::transaction::types::Transaction;
use std::sync::Arc;

/// Decides whether a transaction's signature is acceptable.
///
/// Plugged into [`TransactionValidator`] so the ledger never depends on a
/// particular signature scheme.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction) -> bool;
}

/// Accepts every signature.
///
/// UNSAFE DEFAULT: anyone can spend from any address. Only for development
/// chains and tests; production deployments must inject a real verifier such
/// as [`crate::crypto::Secp256k1Verifier`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _tx: &Transaction) -> bool {
        true
    }
}

/// Pure predicate over a transaction plus the current time.
#[derive(Clone)]
pub struct TransactionValidator {
    verifier: Arc<dyn SignatureVerifier>,
}

impl TransactionValidator {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Stateless validation of a user-submitted transaction. Allocation
    /// buckets are checked separately by the supply ledger.
    pub fn validate(&self, tx: &Transaction, now_millis: u64) -> Result<(), ChainError> {
        if tx.sender.trim().is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Sender address cannot be empty".to_string(),
            ));
        }
        if tx.recipient.trim().is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Recipient address cannot be empty".to_string(),
            ));
        }
        // Prevent self-sends
        if tx.sender == tx.recipient {
            return Err(ChainError::InvalidTransaction(
                "Sender and recipient cannot be the same".to_string(),
            ));
        }
        if tx.is_system() {
            return Err(ChainError::InvalidTransaction(format!(
                "Sender '{}' is reserved for ledger-issued transactions",
                tx.sender
            )));
        }

        if tx.amount <= zero() {
            return Err(ChainError::InvalidTransaction(
                "Transaction amount must be greater than zero".to_string(),
            ));
        }

        if tx.timestamp > now_millis {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction timestamp {} is in the future (now: {})",
                tx.timestamp, now_millis
            )));
        }

        if tx.is_presale() && tx.is_liquidity() {
            return Err(ChainError::InvalidTransaction(
                "Transaction cannot draw from both presale and liquidity allocations".to_string(),
            ));
        }

        // Validate memo length to prevent DoS attacks
        if let Some(memo) = tx.memo() {
            if memo.len() > Transaction::MAX_MEMO_LENGTH {
                return Err(ChainError::InvalidTransaction(format!(
                    "Memo exceeds maximum length of {} characters",
                    Transaction::MAX_MEMO_LENGTH
                )));
            }
        }

        tx.validate_size()?;

        if !self.verifier.verify(tx) {
            return Err(ChainError::InvalidTransaction(
                "Signature verification failed".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for TransactionValidator {
    fn default() -> Self {
        Self::new(Arc::new(AcceptAllVerifier))
    }
}
