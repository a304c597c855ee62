//! Transaction Pool (Mempool)
//!
//! Holds validated, fee-tagged transactions until a block seals them.

use crate::error::ChainError;
use crate::transaction::{Transaction, TxId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Maximum transactions in mempool
pub const MAX_MEMPOOL_SIZE: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    /// Pending transactions by id
    transactions: HashMap<TxId, Transaction>,
    /// Admission order
    queue: VecDeque<TxId>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `id` could be admitted. Mutates nothing.
    pub fn check_admission(&self, id: &str) -> Result<(), ChainError> {
        if self.transactions.len() >= MAX_MEMPOOL_SIZE {
            return Err(ChainError::MempoolFull);
        }
        if self.transactions.contains_key(id) {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} already in pool",
                id
            )));
        }
        Ok(())
    }

    pub fn add(&mut self, tx: Transaction) -> Result<(), ChainError> {
        self.check_admission(&tx.id)?;
        self.queue.push_back(tx.id.clone());
        self.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    /// Queues a ledger-issued transfer. These are not subject to the pool
    /// capacity since the tokens have already left their reserve.
    pub fn add_system(&mut self, tx: Transaction) -> Result<(), ChainError> {
        if self.transactions.contains_key(&tx.id) {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} already in pool",
                tx.id
            )));
        }
        self.queue.push_back(tx.id.clone());
        self.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Up to `limit` transactions in admission order.
    pub fn take_batch(&self, limit: usize) -> Vec<Transaction> {
        self.queue
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// All pending transactions in admission order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.take_batch(usize::MAX)
    }

    /// Removes the given ids, returning how many were present.
    pub fn remove_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut removed = HashSet::new();
        for id in ids {
            if self.transactions.remove(id).is_some() {
                removed.insert(id.to_string());
            }
        }
        if !removed.is_empty() {
            self.queue.retain(|id| !removed.contains(id));
        }
        removed.len()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economics::Amount;

    fn create_test_tx(from: &str, to: &str, amount: u64) -> Transaction {
        let mut tx = Transaction::new(from, to, Amount::from_num(amount), 1_000);
        tx.id = tx.compute_id();
        tx
    }

    #[test]
    fn test_add_preserves_order() {
        let mut pool = TransactionPool::new();
        let a = create_test_tx("alice", "bob", 1);
        let b = create_test_tx("carol", "dave", 2);
        pool.add(a.clone()).unwrap();
        pool.add(b.clone()).unwrap();

        let ids: Vec<_> = pool.snapshot().into_iter().map(|tx| tx.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut pool = TransactionPool::new();
        let tx = create_test_tx("alice", "bob", 1);
        pool.add(tx.clone()).unwrap();
        assert!(matches!(pool.add(tx), Err(ChainError::InvalidTransaction(_))));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_many_keeps_others() {
        let mut pool = TransactionPool::new();
        let a = create_test_tx("alice", "bob", 1);
        let b = create_test_tx("alice", "bob", 2);
        let c = create_test_tx("alice", "bob", 3);
        for tx in [&a, &b, &c] {
            pool.add(tx.clone()).unwrap();
        }

        let removed = pool.remove_many([a.id.as_str(), c.id.as_str(), "missing"]);
        assert_eq!(removed, 2);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&b.id));
        assert_eq!(pool.take_batch(10).len(), 1);
    }

    #[test]
    fn test_system_transfers_skip_capacity() {
        let mut pool = TransactionPool::new();
        for i in 0..MAX_MEMPOOL_SIZE as u64 {
            pool.add(create_test_tx("alice", "bob", i + 1)).unwrap();
        }
        assert!(matches!(
            pool.add(create_test_tx("carol", "dave", 1)),
            Err(ChainError::MempoolFull)
        ));
        let payout = create_test_tx("fee_pool", "validator", 1);
        pool.add_system(payout.clone()).unwrap();
        assert!(pool.add_system(payout).is_err());
        assert_eq!(pool.len(), MAX_MEMPOOL_SIZE + 1);
    }

    #[test]
    fn test_take_batch_limit() {
        let mut pool = TransactionPool::new();
        for i in 1..=5 {
            pool.add(create_test_tx("alice", "bob", i)).unwrap();
        }
        assert_eq!(pool.take_batch(3).len(), 3);
        pool.clear();
        assert!(pool.is_empty());
    }
}
