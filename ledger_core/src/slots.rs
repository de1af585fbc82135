use std::collections::BTreeSet;

/// Tracks the highest slot ever touched and the set of slots below it still undecided.
///
/// Invariant: a slot in `gaps` has no log entry; a slot `< highest_round` not in `gaps` has a log
/// entry; `highest_round` itself is always free.
#[derive(Clone, Debug, Default)]
pub struct SlotAllocator {
    highest_round: u64,
    gaps: BTreeSet<u64>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `min(gaps)` if gaps is non-empty, else `highest_round`.
    pub fn next_free(&self) -> u64 {
        self.gaps.iter().next().copied().unwrap_or(self.highest_round)
    }

    /// Atomic postcondition: `gaps' = gaps ∪ [highest_round, r) \ {r}`,
    /// `highest_round' = max(highest_round, r+1)`.
    pub fn mark_decided(&mut self, slot: u64) {
        if self.gaps.remove(&slot) {
            return;
        }
        if slot >= self.highest_round {
            for s in self.highest_round..slot {
                self.gaps.insert(s);
            }
            self.highest_round = slot + 1;
        }
    }

    /// Reconstruct `gaps` and `highest_round` from the full set of decided slots, e.g. after a
    /// sync exchange.
    pub fn rebuild<I: IntoIterator<Item = u64>>(&mut self, decided_slots: I) {
        let decided: BTreeSet<u64> = decided_slots.into_iter().collect();
        let highest_round = decided.iter().next_back().map(|&s| s + 1).unwrap_or(0);
        let mut gaps = BTreeSet::new();
        for s in 0..highest_round {
            if !decided.contains(&s) {
                gaps.insert(s);
            }
        }
        self.highest_round = highest_round;
        self.gaps = gaps;
    }

    pub fn highest_round(&self) -> u64 {
        self.highest_round
    }

    pub fn gaps(&self) -> impl Iterator<Item = u64> + '_ {
        self.gaps.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocator_starts_at_zero() {
        let alloc = SlotAllocator::new();
        assert_eq!(alloc.next_free(), 0);
    }

    #[test]
    fn sequential_decisions_advance_highest_round() {
        let mut alloc = SlotAllocator::new();
        alloc.mark_decided(0);
        assert_eq!(alloc.next_free(), 1);
        alloc.mark_decided(1);
        assert_eq!(alloc.next_free(), 2);
        assert_eq!(alloc.highest_round(), 2);
    }

    #[test]
    fn jump_ahead_creates_gaps() {
        let mut alloc = SlotAllocator::new();
        alloc.mark_decided(3);
        assert_eq!(alloc.highest_round(), 4);
        assert_eq!(alloc.next_free(), 0);
        assert_eq!(alloc.gaps().collect::<Vec<_>>(), vec![0, 1, 2]);
        alloc.mark_decided(1);
        assert_eq!(alloc.next_free(), 0);
        assert_eq!(alloc.gaps().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn rebuild_matches_decided_set() {
        let mut alloc = SlotAllocator::new();
        alloc.rebuild([0, 1, 2, 4]);
        assert_eq!(alloc.highest_round(), 5);
        assert_eq!(alloc.gaps().collect::<Vec<_>>(), vec![3]);
        assert_eq!(alloc.next_free(), 3);
    }

    #[test]
    fn rebuild_of_empty_set_resets() {
        let mut alloc = SlotAllocator::new();
        alloc.mark_decided(5);
        alloc.rebuild([]);
        assert_eq!(alloc.highest_round(), 0);
        assert_eq!(alloc.next_free(), 0);
    }
}
