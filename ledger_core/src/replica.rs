use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biometrics::Counter;
use guacamole::combinators::any;
use guacamole::Guacamole;
use indicio::{clue, ERROR, INFO, WARNING};

use ledger_pb::{
    AcceptBody, AcceptedBody, Ballot, DecideBody, LogRecord, Message, NackBody, PrepareBody,
    PromiseBody, ReplicaID, SyncRequestBody, SyncResponseBody, TransactionValue, Value,
    NACK_BACKOFF_MAX_SECONDS, NACK_BACKOFF_MIN_SECONDS, PROMISE_COLLECTION_SECONDS,
};

use crate::log::TransactionLog;
use crate::paxos::{ProposingPhase, PromiseResponse, SlotState};
use crate::slots::SlotAllocator;
use crate::transport::Transport;
use crate::COLLECTOR;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PROPOSE: Counter = Counter::new("ledger_core.replica.propose");
static PREPARE_SENT: Counter = Counter::new("ledger_core.replica.prepare.sent");
static PREPARE_RECEIVED: Counter = Counter::new("ledger_core.replica.prepare.received");
static PROMISE_SENT: Counter = Counter::new("ledger_core.replica.promise.sent");
static PROMISE_RECEIVED: Counter = Counter::new("ledger_core.replica.promise.received");
static ACCEPT_SENT: Counter = Counter::new("ledger_core.replica.accept.sent");
static ACCEPT_RECEIVED: Counter = Counter::new("ledger_core.replica.accept.received");
static ACCEPTED_SENT: Counter = Counter::new("ledger_core.replica.accepted.sent");
static ACCEPTED_RECEIVED: Counter = Counter::new("ledger_core.replica.accepted.received");
static DECIDE_SENT: Counter = Counter::new("ledger_core.replica.decide.sent");
static DECIDE_RECEIVED: Counter = Counter::new("ledger_core.replica.decide.received");
static NACK_SENT: Counter = Counter::new("ledger_core.replica.nack.sent");
static NACK_RECEIVED: Counter = Counter::new("ledger_core.replica.nack.received");
static NACK_RETRY: Counter = Counter::new("ledger_core.replica.nack.retry");
static MERGED_VALUE: Counter = Counter::new("ledger_core.replica.merge");
static SAFETY_VIOLATION: Counter = Counter::new("ledger_core.replica.safety_violation");

pub fn register_biometrics(collector: &mut biometrics::Collector) {
    collector.register_counter(&PROPOSE);
    collector.register_counter(&PREPARE_SENT);
    collector.register_counter(&PREPARE_RECEIVED);
    collector.register_counter(&PROMISE_SENT);
    collector.register_counter(&PROMISE_RECEIVED);
    collector.register_counter(&ACCEPT_SENT);
    collector.register_counter(&ACCEPT_RECEIVED);
    collector.register_counter(&ACCEPTED_SENT);
    collector.register_counter(&ACCEPTED_RECEIVED);
    collector.register_counter(&DECIDE_SENT);
    collector.register_counter(&DECIDE_RECEIVED);
    collector.register_counter(&NACK_SENT);
    collector.register_counter(&NACK_RECEIVED);
    collector.register_counter(&NACK_RETRY);
    collector.register_counter(&MERGED_VALUE);
    collector.register_counter(&SAFETY_VIOLATION);
    crate::transport::register_biometrics(collector);
}

///////////////////////////////////////////// Inner state //////////////////////////////////////////

struct Inner {
    log: TransactionLog,
    slots: SlotAllocator,
    slot_states: HashMap<u64, SlotState>,
    lock_value: Option<TransactionValue>,
    completion: Option<mpsc::Sender<()>>,
    next_ballot_number: u64,
    nack_retry_scheduled: HashSet<(u64, Ballot)>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            log: TransactionLog::new(),
            slots: SlotAllocator::new(),
            slot_states: HashMap::new(),
            lock_value: None,
            completion: None,
            next_ballot_number: 1,
            nack_retry_scheduled: HashSet::new(),
        }
    }

    /// A ballot this replica has never used before, no smaller than `floor` (used to satisfy the
    /// "retry with `(nackedBallot.n + 1, self)`" rule).
    fn next_ballot(&mut self, self_id: ReplicaID, floor: u64) -> Ballot {
        let number = self.next_ballot_number.max(floor);
        self.next_ballot_number = number + 1;
        Ballot { number, tiebreak: self_id }
    }

    /// Whether some slot other than `except` is still actively proposing (used to decide whether
    /// to reissue `propose(lock_value)` after learning a DECIDE that doesn't satisfy it).
    fn other_proposal_in_flight(&self, except: u64) -> bool {
        self.slot_states.iter().any(|(&slot, state)| {
            slot != except && matches!(state, SlotState::Proposing { .. })
        })
    }

    /// Signal completion if `value` (or something containing it) satisfies the outstanding
    /// `lock_value`.  Returns true if it did (and the lock was cleared).
    fn maybe_complete(&mut self, value: &Value) -> bool {
        let Some(lock_value) = self.lock_value else {
            return false;
        };
        if value.contains(&lock_value) {
            self.lock_value = None;
            if let Some(tx) = self.completion.take() {
                let _ = tx.send(());
            }
            true
        } else {
            false
        }
    }
}

////////////////////////////////////////////// Replica /////////////////////////////////////////////

/// The consensus replica: owns the transaction log, the slot allocator, per-slot Paxos state, and
/// drives message handling from a single serialization domain guarded by `state`.
pub struct Replica {
    self_id: ReplicaID,
    peers: Vec<ReplicaID>,
    quorum: usize,
    n: usize,
    transport: Arc<Transport>,
    state: Mutex<Inner>,
    guac: Mutex<Guacamole>,
}

impl Replica {
    pub fn new(self_id: ReplicaID, peers: Vec<ReplicaID>, transport: Arc<Transport>) -> Arc<Replica> {
        let n = peers.len() + 1;
        let quorum = n / 2 + 1;
        let seed = (self_id.port as u64) ^ ((self_id.host.len() as u64) << 32);
        Arc::new(Replica {
            self_id,
            peers,
            quorum,
            n,
            transport,
            state: Mutex::new(Inner::new()),
            guac: Mutex::new(Guacamole::new(seed)),
        })
    }

    pub fn self_id(&self) -> ReplicaID {
        self.self_id
    }

    pub fn balance(&self) -> i64 {
        self.state.lock().unwrap().log.balance()
    }

    pub fn history(&self) -> Vec<(u64, TransactionValue)> {
        self.state.lock().unwrap().log.history()
    }

    /// Spawn the receiver thread that feeds inbound datagrams into [Replica::handle_message].
    pub fn listen(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let replica = Arc::clone(self);
        self.transport.spawn_receiver(move |message| replica.handle_message(message))
    }

    pub fn fail(&self) {
        self.transport.fail();
    }

    pub fn unfail(&self) {
        self.transport.unfail();
    }

    /// Begin a fresh client proposal.  Returns a receiver that fires once `value` (or a merged
    /// value containing it) has been written to the log at some slot.
    pub fn propose(self: &Arc<Self>, value: TransactionValue) -> mpsc::Receiver<()> {
        PROPOSE.click();
        let (tx, rx) = mpsc::channel();
        let slot = {
            let mut inner = self.state.lock().unwrap();
            inner.lock_value = Some(value);
            inner.completion = Some(tx);
            inner.slots.next_free()
        };
        self.start_round(slot, value, 0);
        rx
    }

    /// Broadcast a SYNC_REQUEST with the local log snapshot.
    pub fn sync(&self) {
        let log: Vec<LogRecord> = {
            let inner = self.state.lock().unwrap();
            inner
                .log
                .snapshot()
                .into_iter()
                .map(|(slot, value)| LogRecord { slot, value })
                .collect()
        };
        let message = Message::SyncRequest(SyncRequestBody { source: self.self_id, log });
        for peer in &self.peers {
            self.transport.send(*peer, &message);
        }
    }

    fn broadcast(&self, targets: &[ReplicaID], message: &Message) {
        for target in targets {
            self.transport.send(*target, message);
        }
    }

    /// Start (or restart) a Paxos round for `slot` carrying `value`, using a ballot no smaller
    /// than `floor`.
    fn start_round(self: &Arc<Self>, slot: u64, value: TransactionValue, floor: u64) {
        let ballot = {
            let mut inner = self.state.lock().unwrap();
            let ballot = inner.next_ballot(self.self_id, floor);
            inner.slot_states.insert(
                slot,
                SlotState::Proposing {
                    ballot,
                    phase: ProposingPhase::CollectingPromises { responses: Vec::new() },
                },
            );
            ballot
        };
        clue!(COLLECTOR, INFO, { paxos: { start_round: true, slot: slot, ballot_number: ballot.number } });
        let message = Message::Prepare(PrepareBody { slot, ballot, source: self.self_id });
        for peer in &self.peers {
            PREPARE_SENT.click();
            self.transport.send(*peer, &message);
        }
        self.schedule_promise_timer(slot, ballot, value);
    }

    fn schedule_promise_timer(self: &Arc<Self>, slot: u64, ballot: Ballot, value: TransactionValue) {
        let replica = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(PROMISE_COLLECTION_SECONDS));
            replica.on_promise_timer(slot, ballot, value);
        });
    }

    fn schedule_nack_retry(self: &Arc<Self>, slot: u64, ballot: Ballot, retry_floor: u64) {
        let delay_secs = {
            let mut guac = self.guac.lock().unwrap();
            let u: f64 = any(&mut guac);
            NACK_BACKOFF_MIN_SECONDS + u * (NACK_BACKOFF_MAX_SECONDS - NACK_BACKOFF_MIN_SECONDS)
        };
        let replica = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs_f64(delay_secs));
            replica.on_nack_retry(slot, ballot, retry_floor);
        });
    }

    /// Dispatch a single inbound message.  The caller (the transport's receive loop) guarantees
    /// this runs on one thread at a time, but each call still acquires `state` itself so that
    /// timer callbacks interleave safely too.
    pub fn handle_message(self: &Arc<Self>, message: Message) {
        match message {
            Message::Prepare(PrepareBody { slot, ballot, source }) => {
                self.on_prepare(slot, ballot, source)
            }
            Message::Promise(PromiseBody { slot, ballot, source, highest_ballot, value }) => {
                self.on_promise(slot, ballot, source, highest_ballot, value)
            }
            Message::Nack(NackBody { slot, ballot, source, highest_ballot, value, decided }) => {
                self.on_nack(slot, ballot, source, highest_ballot, value, decided)
            }
            Message::Accept(AcceptBody { slot, ballot, source, value }) => {
                self.on_accept(slot, ballot, source, value)
            }
            Message::Accepted(AcceptedBody { slot, ballot, source, value }) => {
                self.on_accepted(slot, ballot, source, value)
            }
            Message::Decide(DecideBody { slot, ballot, source, value }) => {
                self.on_decide(slot, ballot, source, value)
            }
            Message::SyncRequest(SyncRequestBody { source, log }) => self.on_sync_request(source, log),
            Message::SyncResponse(SyncResponseBody { source, log }) => self.on_sync_response(source, log),
        }
    }

    ///////////////////////////////////////// acceptor: PREPARE ////////////////////////////////////

    fn on_prepare(&self, slot: u64, ballot: Ballot, source: ReplicaID) {
        PREPARE_RECEIVED.click();
        let mut inner = self.state.lock().unwrap();
        if let Some(decided) = inner.log.get(slot) {
            drop(inner);
            NACK_SENT.click();
            self.transport.send(
                source,
                &Message::Nack(NackBody {
                    slot,
                    ballot,
                    source: self.self_id,
                    highest_ballot: None,
                    value: Some(Value::Single(decided)),
                    decided: true,
                }),
            );
            return;
        }
        let existing_ballot = inner.slot_states.get(&slot).and_then(SlotState::ballot);
        let existing_value = match inner.slot_states.get(&slot) {
            Some(SlotState::Accepting { value, .. }) => value.clone(),
            _ => None,
        };
        match existing_ballot {
            None => {
                inner
                    .slot_states
                    .insert(slot, SlotState::Accepting { ballot, value: None });
                drop(inner);
                PROMISE_SENT.click();
                self.transport.send(
                    source,
                    &Message::Promise(PromiseBody {
                        slot,
                        ballot,
                        source: self.self_id,
                        highest_ballot: None,
                        value: None,
                    }),
                );
            }
            Some(current) if ballot >= current => {
                inner
                    .slot_states
                    .insert(slot, SlotState::Accepting { ballot, value: existing_value.clone() });
                drop(inner);
                PROMISE_SENT.click();
                self.transport.send(
                    source,
                    &Message::Promise(PromiseBody {
                        slot,
                        ballot,
                        source: self.self_id,
                        highest_ballot: Some(current),
                        value: existing_value,
                    }),
                );
            }
            Some(current) => {
                drop(inner);
                NACK_SENT.click();
                self.transport.send(
                    source,
                    &Message::Nack(NackBody {
                        slot,
                        ballot,
                        source: self.self_id,
                        highest_ballot: Some(current),
                        value: existing_value,
                        decided: false,
                    }),
                );
            }
        }
    }

    ///////////////////////////////////////// proposer: PROMISE ////////////////////////////////////

    fn on_promise(
        self: &Arc<Self>,
        slot: u64,
        ballot: Ballot,
        source: ReplicaID,
        highest_ballot: Option<Ballot>,
        value: Option<Value>,
    ) {
        PROMISE_RECEIVED.click();
        let mut inner = self.state.lock().unwrap();
        if let Some(SlotState::Proposing {
            ballot: current,
            phase: ProposingPhase::CollectingPromises { responses },
        }) = inner.slot_states.get_mut(&slot)
        {
            if *current == ballot {
                responses.push(PromiseResponse { source, highest_ballot, value });
            }
        }
    }

    fn on_promise_timer(self: &Arc<Self>, slot: u64, ballot: Ballot, lock_value: TransactionValue) {
        let mut inner = self.state.lock().unwrap();
        let responses = match inner.slot_states.get(&slot) {
            Some(SlotState::Proposing {
                ballot: current,
                phase: ProposingPhase::CollectingPromises { responses },
            }) if *current == ballot => responses.clone(),
            _ => return,
        };
        if responses.len() + 1 < self.quorum {
            clue!(COLLECTOR, WARNING, { paxos: { promise_quorum_not_met: true, slot: slot } });
            return;
        }
        let highest = responses
            .iter()
            .filter(|r| r.highest_ballot.is_some())
            .max_by_key(|r| r.highest_ballot.unwrap());
        let highest_value = highest.and_then(|r| r.value.clone());
        let chosen = match &highest_value {
            None => Value::Single(lock_value),
            Some(hv) => {
                let votes = responses.iter().filter(|r| r.value.as_ref() == Some(hv)).count();
                let unheard = self.n.saturating_sub(responses.len() + 1);
                if votes + unheard < self.quorum {
                    MERGED_VALUE.click();
                    let mut merged = Vec::new();
                    let mut seen = HashSet::new();
                    for r in &responses {
                        if let Some(v) = &r.value {
                            for tv in v.components() {
                                if tv.kind == lock_value.kind && seen.insert(*tv) {
                                    merged.push(*tv);
                                }
                            }
                        }
                    }
                    if seen.insert(lock_value) {
                        merged.push(lock_value);
                    }
                    Value::Merged(merged)
                } else {
                    hv.clone()
                }
            }
        };
        let targets: Vec<ReplicaID> = responses.iter().map(|r| r.source).collect();
        inner.slot_states.insert(
            slot,
            SlotState::Proposing {
                ballot,
                phase: ProposingPhase::CollectingAccepts {
                    value: chosen.clone(),
                    targets: targets.clone(),
                    accepted_from: Vec::new(),
                },
            },
        );
        drop(inner);
        let message = Message::Accept(AcceptBody { slot, ballot, source: self.self_id, value: chosen });
        for target in &targets {
            ACCEPT_SENT.click();
            self.transport.send(*target, &message);
        }
    }

    ///////////////////////////////////////// acceptor: ACCEPT /////////////////////////////////////

    fn on_accept(&self, slot: u64, ballot: Ballot, source: ReplicaID, value: Value) {
        ACCEPT_RECEIVED.click();
        let mut inner = self.state.lock().unwrap();
        let current = match inner.slot_states.get(&slot) {
            Some(state) if !state.is_decided() => state.ballot(),
            _ => return,
        };
        match current {
            Some(current) if ballot >= current => {
                inner
                    .slot_states
                    .insert(slot, SlotState::Accepting { ballot, value: Some(value.clone()) });
                drop(inner);
                ACCEPTED_SENT.click();
                self.transport.send(
                    source,
                    &Message::Accepted(AcceptedBody { slot, ballot, source: self.self_id, value }),
                );
            }
            Some(current) => {
                drop(inner);
                NACK_SENT.click();
                self.transport.send(
                    source,
                    &Message::Nack(NackBody {
                        slot,
                        ballot,
                        source: self.self_id,
                        highest_ballot: Some(current),
                        value: None,
                        decided: false,
                    }),
                );
            }
            None => {}
        }
    }

    ///////////////////////////////////////// proposer: ACCEPTED ///////////////////////////////////

    fn on_accepted(self: &Arc<Self>, slot: u64, ballot: Ballot, source: ReplicaID, value: Value) {
        ACCEPTED_RECEIVED.click();
        let mut inner = self.state.lock().unwrap();
        let ready = if let Some(SlotState::Proposing {
            ballot: current,
            phase: ProposingPhase::CollectingAccepts { value: stored, accepted_from, .. },
        }) = inner.slot_states.get_mut(&slot)
        {
            if *current == ballot && *stored == value {
                accepted_from.push(source);
                accepted_from.len() + 1 >= self.quorum
            } else {
                false
            }
        } else {
            false
        };
        if !ready {
            return;
        }
        self.decide_slot(&mut inner, slot, ballot, value);
    }

    /// Common tail of "this replica's own quorum decided `value` at `slot`": broadcast DECIDE,
    /// flatten and log, mark the slot decided, and run the completion/retry check.
    fn decide_slot(self: &Arc<Self>, inner: &mut Inner, slot: u64, ballot: Ballot, value: Value) {
        let message = Message::Decide(DecideBody { slot, ballot, source: self.self_id, value: value.clone() });
        for peer in &self.peers {
            DECIDE_SENT.click();
            self.transport.send(*peer, &message);
        }
        self.commit_decided_value(inner, slot, value);
    }

    /// Flatten and append a decided value to the log, update the slot allocator and per-slot
    /// state, and either complete or retry the outstanding proposal.
    fn commit_decided_value(self: &Arc<Self>, inner: &mut Inner, slot: u64, value: Value) {
        let flattened = match value.flatten() {
            Ok(flattened) => flattened,
            Err(err) => {
                SAFETY_VIOLATION.click();
                clue!(COLLECTOR, ERROR, { paxos: { safety_violation: true, slot: slot } });
                panic!("safety violation flattening slot {slot}: {err:?}");
            }
        };
        if let Err(err) = inner.log.append(slot, flattened) {
            SAFETY_VIOLATION.click();
            clue!(COLLECTOR, ERROR, { paxos: { safety_violation: true, slot: slot } });
            panic!("safety violation appending slot {slot}: {err:?}");
        }
        inner.slots.mark_decided(slot);
        inner
            .slot_states
            .insert(slot, SlotState::Decided { value: Value::Single(flattened) });
        let satisfied = inner.maybe_complete(&value);
        if !satisfied {
            if let Some(lock_value) = inner.lock_value {
                if !inner.other_proposal_in_flight(slot) {
                    let retry_slot = inner.slots.next_free();
                    retry_async(self, retry_slot, lock_value);
                }
            }
        }
    }

    ///////////////////////////////////////// any replica: DECIDE //////////////////////////////////

    fn on_decide(self: &Arc<Self>, slot: u64, _ballot: Ballot, _source: ReplicaID, value: Value) {
        DECIDE_RECEIVED.click();
        let mut inner = self.state.lock().unwrap();
        if inner.log.contains(slot) {
            return;
        }
        self.commit_decided_value(&mut inner, slot, value);
    }

    ///////////////////////////////////////// proposer: NACK ///////////////////////////////////////

    fn on_nack(
        self: &Arc<Self>,
        slot: u64,
        ballot: Ballot,
        _source: ReplicaID,
        highest_ballot: Option<Ballot>,
        value: Option<Value>,
        decided: bool,
    ) {
        NACK_RECEIVED.click();
        let mut inner = self.state.lock().unwrap();
        if decided {
            if inner.log.contains(slot) {
                return;
            }
            let Some(value) = value else { return };
            self.commit_decided_value(&mut inner, slot, value);
            return;
        }
        let current = match inner.slot_states.get(&slot) {
            Some(state) if !state.is_decided() => state.ballot(),
            _ => return,
        };
        let Some(current) = current else { return };
        if ballot < current {
            return;
        }
        let Some(highest_ballot) = highest_ballot else { return };
        let key = (slot, current);
        if !inner.nack_retry_scheduled.insert(key) {
            return;
        }
        if inner.lock_value.is_none() {
            return;
        }
        drop(inner);
        NACK_RETRY.click();
        self.schedule_nack_retry(slot, current, highest_ballot.number + 1);
    }

    fn on_nack_retry(self: &Arc<Self>, slot: u64, ballot: Ballot, retry_floor: u64) {
        let (lock_value, should_retry) = {
            let mut inner = self.state.lock().unwrap();
            inner.nack_retry_scheduled.remove(&(slot, ballot));
            match (inner.slot_states.get(&slot).and_then(SlotState::ballot), inner.lock_value) {
                (Some(current), Some(lv)) if current == ballot => (Some(lv), true),
                _ => (None, false),
            }
        };
        if should_retry {
            if let Some(lock_value) = lock_value {
                self.start_round(slot, lock_value, retry_floor);
            }
        }
    }

    ///////////////////////////////////////////// sync /////////////////////////////////////////////

    fn on_sync_request(&self, source: ReplicaID, log: Vec<LogRecord>) {
        let mut inner = self.state.lock().unwrap();
        let mut missing_here = Vec::new();
        for record in &log {
            if !inner.log.contains(record.slot) {
                if let Err(err) = inner.log.append(record.slot, record.value) {
                    SAFETY_VIOLATION.click();
                    clue!(COLLECTOR, ERROR, { sync: { safety_violation: true, slot: record.slot } });
                    panic!("safety violation during sync at slot {}: {err:?}", record.slot);
                }
            }
        }
        for slot in inner.log.snapshot().keys().copied().collect::<Vec<_>>() {
            if !log.iter().any(|r| r.slot == slot) {
                missing_here.push(LogRecord { slot, value: inner.log.get(slot).unwrap() });
            }
        }
        let decided_slots: Vec<u64> = inner.log.snapshot().keys().copied().collect();
        inner.slots.rebuild(decided_slots);
        drop(inner);
        self.transport.send(
            source,
            &Message::SyncResponse(SyncResponseBody { source: self.self_id, log: missing_here }),
        );
    }

    fn on_sync_response(&self, _source: ReplicaID, log: Vec<LogRecord>) {
        let mut inner = self.state.lock().unwrap();
        for record in &log {
            if !inner.log.contains(record.slot) {
                if let Err(err) = inner.log.append(record.slot, record.value) {
                    SAFETY_VIOLATION.click();
                    clue!(COLLECTOR, ERROR, { sync: { safety_violation: true, slot: record.slot } });
                    panic!("safety violation during sync at slot {}: {err:?}", record.slot);
                }
            }
        }
        let decided_slots: Vec<u64> = inner.log.snapshot().keys().copied().collect();
        inner.slots.rebuild(decided_slots);
    }
}

/// Helper so [Replica::commit_decided_value] can kick off a retry without recursively locking
/// `state` while its own guard is still held.
fn retry_async(replica: &Arc<Replica>, slot: u64, value: TransactionValue) {
    let replica = Arc::clone(replica);
    std::thread::spawn(move || {
        replica.start_round(slot, value, 0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_pb::{Empty, TransactionKind};

    fn peer(port: u32) -> ReplicaID {
        ReplicaID { host: "127.0.0.1".to_string(), port }
    }

    fn tv(kind: TransactionKind, amount: u64, tag: u8) -> TransactionValue {
        TransactionValue { kind, amount, hash: [tag; 32] }
    }

    /// Binds to an ephemeral local port; `peers.len() + 1` replicas make up the ensemble.
    fn test_replica(peers: Vec<ReplicaID>) -> Arc<Replica> {
        let transport = Transport::bind(peer(0)).unwrap();
        let self_id = transport.local_addr().unwrap();
        Replica::new(self_id, peers, transport)
    }

    #[test]
    fn single_deposit_quorum_decides_and_completes() {
        // N = 3 (self + 2 peers), quorum = 2: a single PROMISE plus self is enough to proceed.
        let p1 = peer(40001);
        let p2 = peer(40002);
        let replica = test_replica(vec![p1, p2]);
        let value = tv(TransactionKind::Deposit(Empty {}), 100, 1);
        let slot = 0;
        let ballot = Ballot { number: 1, tiebreak: replica.self_id() };

        let rx = {
            let mut inner = replica.state.lock().unwrap();
            inner.lock_value = Some(value);
            let (tx, rx) = mpsc::channel();
            inner.completion = Some(tx);
            inner.slot_states.insert(
                slot,
                SlotState::Proposing {
                    ballot,
                    phase: ProposingPhase::CollectingPromises { responses: Vec::new() },
                },
            );
            rx
        };

        replica.on_promise(slot, ballot, p1, None, None);
        replica.on_promise_timer(slot, ballot, value);
        replica.on_accepted(slot, ballot, p1, Value::Single(value));

        assert_eq!(replica.balance(), 100);
        assert_eq!(replica.history(), vec![(slot, value)]);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn promise_quorum_merges_when_earlier_decision_is_impossible() {
        // N = 4 (self + 3 peers), quorum = 3.  Two distinct prior-ballot values are observed, each
        // with a single vote, so even granting the one unheard-from replica to the higher-ballot
        // value it cannot reach quorum: safe to merge all three proposals together.
        let p1 = peer(40011);
        let p2 = peer(40012);
        let p3 = peer(40013);
        let replica = test_replica(vec![p1, p2, p3]);
        let v_a = tv(TransactionKind::Deposit(Empty {}), 5, 1);
        let v_b = tv(TransactionKind::Deposit(Empty {}), 7, 2);
        let v_self = tv(TransactionKind::Deposit(Empty {}), 9, 3);
        let slot = 7;
        let ballot = Ballot { number: 10, tiebreak: replica.self_id() };

        {
            let mut inner = replica.state.lock().unwrap();
            inner.lock_value = Some(v_self);
            inner.slot_states.insert(
                slot,
                SlotState::Proposing {
                    ballot,
                    phase: ProposingPhase::CollectingPromises { responses: Vec::new() },
                },
            );
        }

        replica.on_promise(slot, ballot, p1, Some(Ballot { number: 1, tiebreak: p1 }), Some(Value::Single(v_a)));
        replica.on_promise(slot, ballot, p2, Some(Ballot { number: 2, tiebreak: p2 }), Some(Value::Single(v_b)));
        replica.on_promise_timer(slot, ballot, v_self);

        let inner = replica.state.lock().unwrap();
        match inner.slot_states.get(&slot) {
            Some(SlotState::Proposing { phase: ProposingPhase::CollectingAccepts { value, .. }, .. }) => {
                match value {
                    Value::Merged(vs) => {
                        assert!(vs.contains(&v_a));
                        assert!(vs.contains(&v_b));
                        assert!(vs.contains(&v_self));
                    }
                    other => panic!("expected a merged value, got {other:?}"),
                }
            }
            other => panic!("unexpected slot state: {other:?}"),
        }
    }

    #[test]
    fn promise_quorum_adopts_highest_value_when_decision_elsewhere_still_possible() {
        // N = 3 (self + 2 peers), quorum = 2.  A single response carries a prior value; with only
        // one replica unheard from, that value might already be decided elsewhere, so this
        // proposer must adopt it verbatim rather than merge its own value in.
        let p1 = peer(40021);
        let p2 = peer(40022);
        let replica = test_replica(vec![p1, p2]);
        let v_a = tv(TransactionKind::Deposit(Empty {}), 42, 1);
        let v_self = tv(TransactionKind::Deposit(Empty {}), 9, 2);
        let slot = 3;
        let ballot = Ballot { number: 5, tiebreak: replica.self_id() };

        {
            let mut inner = replica.state.lock().unwrap();
            inner.lock_value = Some(v_self);
            inner.slot_states.insert(
                slot,
                SlotState::Proposing {
                    ballot,
                    phase: ProposingPhase::CollectingPromises { responses: Vec::new() },
                },
            );
        }

        replica.on_promise(slot, ballot, p1, Some(Ballot { number: 1, tiebreak: p1 }), Some(Value::Single(v_a)));
        replica.on_promise_timer(slot, ballot, v_self);

        let inner = replica.state.lock().unwrap();
        match inner.slot_states.get(&slot) {
            Some(SlotState::Proposing { phase: ProposingPhase::CollectingAccepts { value, .. }, .. }) => {
                assert_eq!(*value, Value::Single(v_a));
            }
            other => panic!("unexpected slot state: {other:?}"),
        }
    }

    #[test]
    fn decided_nack_learns_value_and_completes_matching_proposal() {
        let replica = test_replica(vec![peer(40031), peer(40032)]);
        let value = tv(TransactionKind::Deposit(Empty {}), 50, 1);

        let rx = {
            let mut inner = replica.state.lock().unwrap();
            inner.lock_value = Some(value);
            let (tx, rx) = mpsc::channel();
            inner.completion = Some(tx);
            rx
        };

        replica.on_nack(
            3,
            Ballot { number: 1, tiebreak: replica.self_id() },
            peer(40031),
            None,
            Some(Value::Single(value)),
            true,
        );

        assert_eq!(replica.balance(), 50);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn sync_request_ingests_missing_entries_and_reports_local_surplus() {
        let replica = test_replica(vec![peer(40041)]);
        {
            let mut inner = replica.state.lock().unwrap();
            inner.log.append(0, tv(TransactionKind::Deposit(Empty {}), 10, 1)).unwrap();
            inner.slots.mark_decided(0);
        }

        let remote_log = vec![LogRecord { slot: 1, value: tv(TransactionKind::Withdraw(Empty {}), 3, 2) }];
        replica.on_sync_request(peer(40041), remote_log);

        assert_eq!(replica.balance(), 7);
        assert!(replica.history().iter().any(|(slot, _)| *slot == 1));
    }

    #[test]
    fn sync_response_merges_without_reporting_back() {
        let replica = test_replica(vec![peer(40051)]);
        let remote_log = vec![LogRecord { slot: 2, value: tv(TransactionKind::Deposit(Empty {}), 4, 1) }];
        replica.on_sync_response(peer(40051), remote_log);
        assert_eq!(replica.balance(), 4);
    }

    #[test]
    fn on_accept_nacks_a_stale_ballot() {
        let replica = test_replica(vec![peer(40061)]);
        let slot = 0;
        let high = Ballot { number: 2, tiebreak: peer(40061) };
        {
            let mut inner = replica.state.lock().unwrap();
            inner.slot_states.insert(slot, SlotState::Accepting { ballot: high, value: None });
        }
        let stale = Ballot { number: 1, tiebreak: peer(40061) };
        replica.on_accept(slot, stale, peer(40061), Value::Single(tv(TransactionKind::Deposit(Empty {}), 1, 1)));
        let inner = replica.state.lock().unwrap();
        assert_eq!(inner.slot_states.get(&slot).and_then(SlotState::ballot), Some(high));
    }
}
