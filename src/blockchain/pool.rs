use super::transaction::Transaction;

/// Pending transactions not yet sealed into a block
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        TransactionPool::default()
    }

    pub fn add(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Independent copy of the pending transactions, in insertion order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Net effect of the pending transactions on `address`
    pub fn pending_amount(&self, address: &str) -> f64 {
        net_amount(self.transactions.iter(), address)
    }
}

/// Folds transactions into a balance: `+value` when received, `-value` when sent
pub fn net_amount<'a>(transactions: impl Iterator<Item = &'a Transaction>, address: &str) -> f64 {
    transactions.fold(0.0, |mut total, transaction| {
        if transaction.recipient.as_str() == address {
            total += transaction.value;
        }
        if transaction.sender.as_str() == address {
            total -= transaction.value;
        }
        total
    })
}
