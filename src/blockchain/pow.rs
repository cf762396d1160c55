// Proof of work
//
// A block is sealed by the first nonce, counting up from zero, whose
// zero-timestamp hash starts with `difficulty` hex '0' characters.

use log::debug;

use super::block::{seal_hash, BlockHash};
use super::transaction::Transaction;

/// Checks the difficulty predicate for a candidate nonce
pub fn valid_proof(
    nonce: u64,
    previous_hash: &BlockHash,
    transactions: &[Transaction],
    difficulty: usize,
) -> bool {
    seal_hash(nonce, previous_hash, transactions).meets_difficulty(difficulty)
}

/// Linear nonce search; deterministic for a given tail hash and transaction list
pub fn proof_of_work(previous_hash: &BlockHash, transactions: &[Transaction], difficulty: usize) -> u64 {
    let mut nonce: u64 = 0;
    while !valid_proof(nonce, previous_hash, transactions, difficulty) {
        nonce += 1;
    }

    debug!(
        "Found nonce {} over {} transactions at difficulty {}",
        nonce,
        transactions.len(),
        difficulty
    );
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_of_work_finds_first_valid_nonce() {
        let transactions = vec![Transaction::new_coinbase("A", 1.0)];
        let nonce = proof_of_work(&BlockHash::ZERO, &transactions, 2);

        assert!(valid_proof(nonce, &BlockHash::ZERO, &transactions, 2));
        assert!((0..nonce).all(|n| !valid_proof(n, &BlockHash::ZERO, &transactions, 2)));
    }

    #[test]
    fn test_proof_of_work_is_deterministic() {
        let transactions = vec![Transaction::new("A", "B", 1.0)];

        let first = proof_of_work(&BlockHash::ZERO, &transactions, 3);
        let second = proof_of_work(&BlockHash::ZERO, &transactions, 3);
        assert_eq!(first, second);

        let hash = seal_hash(first, &BlockHash::ZERO, &transactions);
        assert!(hash.to_hex().starts_with("000"));
    }

    #[test]
    fn test_zero_difficulty_accepts_any_nonce() {
        assert_eq!(proof_of_work(&BlockHash::ZERO, &[], 0), 0);
    }
}
