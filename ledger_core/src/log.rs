use std::collections::BTreeMap;

use ledger_pb::{Error, TransactionKind, TransactionValue};
use zerror_core::ErrorCore;

/// The append-only, in-memory transaction log.  Keyed by slot; a slot is written at most once.
#[derive(Clone, Debug, Default)]
pub struct TransactionLog {
    entries: BTreeMap<u64, TransactionValue>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on `(slot, value)`.  A conflicting value at an already-written slot is a safety
    /// violation, not a silently-ignored write.
    pub fn append(&mut self, slot: u64, value: TransactionValue) -> Result<(), Error> {
        match self.entries.get(&slot) {
            Some(existing) if *existing == value => Ok(()),
            Some(existing) => Err(Error::SafetyViolation {
                core: ErrorCore::default(),
                what: format!(
                    "slot {slot} already holds {existing:?}, refusing to overwrite with {value:?}"
                ),
            }),
            None => {
                self.entries.insert(slot, value);
                Ok(())
            }
        }
    }

    pub fn contains(&self, slot: u64) -> bool {
        self.entries.contains_key(&slot)
    }

    pub fn get(&self, slot: u64) -> Option<TransactionValue> {
        self.entries.get(&slot).copied()
    }

    /// Signed sum over entries: `+amount` for DEPOSIT, `-amount` for WITHDRAW.
    pub fn balance(&self) -> i64 {
        self.entries
            .values()
            .map(|v| match v.kind {
                TransactionKind::Deposit(_) => v.amount as i64,
                TransactionKind::Withdraw(_) => -(v.amount as i64),
            })
            .sum()
    }

    /// The slot-to-value map, used to seed a SYNC_REQUEST.
    pub fn snapshot(&self) -> BTreeMap<u64, TransactionValue> {
        self.entries.clone()
    }

    /// Entries in slot order.
    pub fn history(&self) -> Vec<(u64, TransactionValue)> {
        self.entries.iter().map(|(&s, &v)| (s, v)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_pb::Empty;

    fn tv(kind: TransactionKind, amount: u64) -> TransactionValue {
        TransactionValue {
            kind,
            amount,
            hash: [amount as u8; 32],
        }
    }

    #[test]
    fn append_and_balance() {
        let mut log = TransactionLog::new();
        log.append(0, tv(TransactionKind::Deposit(Empty {}), 100)).unwrap();
        log.append(1, tv(TransactionKind::Withdraw(Empty {}), 30)).unwrap();
        assert_eq!(log.balance(), 70);
    }

    #[test]
    fn append_is_idempotent() {
        let mut log = TransactionLog::new();
        let v = tv(TransactionKind::Deposit(Empty {}), 50);
        log.append(3, v).unwrap();
        log.append(3, v).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn append_rejects_conflicting_value() {
        let mut log = TransactionLog::new();
        log.append(3, tv(TransactionKind::Deposit(Empty {}), 50)).unwrap();
        let err = log.append(3, tv(TransactionKind::Deposit(Empty {}), 51));
        assert!(err.is_err());
    }

    #[test]
    fn history_is_slot_ordered() {
        let mut log = TransactionLog::new();
        log.append(5, tv(TransactionKind::Deposit(Empty {}), 1)).unwrap();
        log.append(2, tv(TransactionKind::Deposit(Empty {}), 2)).unwrap();
        log.append(9, tv(TransactionKind::Deposit(Empty {}), 3)).unwrap();
        let slots: Vec<u64> = log.history().into_iter().map(|(s, _)| s).collect();
        assert_eq!(slots, vec![2, 5, 9]);
    }
}
