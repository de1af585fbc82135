use ledger_pb::{Ballot, ReplicaID, Value};

/// Per-slot state.  A tagged variant replaces the role/stage enum plus null-guarded fields the
/// original design used: no arm ever has to check a field that doesn't apply to its role.
#[derive(Clone, Debug)]
pub enum SlotState {
    /// This replica is driving the round as proposer.
    Proposing { ballot: Ballot, phase: ProposingPhase },
    /// This replica is acting as acceptor for a round it did not initiate.
    Accepting { ballot: Ballot, value: Option<Value> },
    /// Terminal: the slot's value has been decided, by this replica's own quorum or by learning
    /// a DECIDE/decided-NACK from elsewhere.
    Decided { value: Value },
}

/// Sub-state of a proposer's round: gathering promises, or gathering accepts after a value has
/// been chosen.  Kept as an inner enum rather than separate stages on [SlotState] so that the
/// ballot stays a single field shared by both phases.
#[derive(Clone, Debug)]
pub enum ProposingPhase {
    CollectingPromises { responses: Vec<PromiseResponse> },
    CollectingAccepts {
        value: Value,
        targets: Vec<ReplicaID>,
        accepted_from: Vec<ReplicaID>,
    },
}

#[derive(Clone, Debug)]
pub struct PromiseResponse {
    pub source: ReplicaID,
    pub highest_ballot: Option<Ballot>,
    pub value: Option<Value>,
}

impl SlotState {
    pub fn is_decided(&self) -> bool {
        matches!(self, SlotState::Decided { .. })
    }

    pub fn ballot(&self) -> Option<Ballot> {
        match self {
            SlotState::Proposing { ballot, .. } | SlotState::Accepting { ballot, .. } => {
                Some(*ballot)
            }
            SlotState::Decided { .. } => None,
        }
    }
}
