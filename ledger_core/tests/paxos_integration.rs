//! End-to-end coverage over real UDP sockets: three replicas bound to ephemeral loopback ports,
//! wired into each other's peer lists, driving an actual Paxos round through `Transport`'s
//! receiver threads rather than by calling private handlers directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ledger_core::transport::Transport;
use ledger_core::Replica;
use ledger_pb::{Empty, ReplicaID, TransactionKind, TransactionValue};

fn ephemeral() -> ReplicaID {
    ReplicaID { host: "127.0.0.1".to_string(), port: 0 }
}

/// Bind three transports, wire them into a full peer mesh, and start each replica listening.
fn triad() -> (Arc<Replica>, Arc<Replica>, Arc<Replica>) {
    let ta = Transport::bind(ephemeral()).unwrap();
    let tb = Transport::bind(ephemeral()).unwrap();
    let tc = Transport::bind(ephemeral()).unwrap();
    let ida = ta.local_addr().unwrap();
    let idb = tb.local_addr().unwrap();
    let idc = tc.local_addr().unwrap();

    let ra = Replica::new(ida, vec![idb, idc], ta);
    let rb = Replica::new(idb, vec![ida, idc], tb);
    let rc = Replica::new(idc, vec![ida, idb], tc);
    ra.listen();
    rb.listen();
    rc.listen();
    (ra, rb, rc)
}

fn deposit(amount: u64, tag: u8) -> TransactionValue {
    TransactionValue { kind: TransactionKind::Deposit(Empty {}), amount, hash: [tag; 32] }
}

fn wait_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    pred()
}

#[test]
fn single_deposit_is_decided_and_propagates_to_every_replica() {
    let (ra, rb, rc) = triad();

    let rx = ra.propose(deposit(100, 1));
    rx.recv_timeout(Duration::from_secs(10))
        .expect("a quorum of 2 out of 3 live replicas should decide well within 10s");
    assert_eq!(ra.balance(), 100);

    assert!(wait_until(|| rb.balance() == 100 && rc.balance() == 100, Duration::from_secs(10)));
}

#[test]
fn two_concurrent_deposits_on_distinct_slots_both_land() {
    let (ra, rb, rc) = triad();

    let rx_a = ra.propose(deposit(10, 1));
    let rx_b = rb.propose(deposit(20, 2));
    rx_a.recv_timeout(Duration::from_secs(10)).expect("first deposit should decide");
    rx_b.recv_timeout(Duration::from_secs(10)).expect("second deposit should decide");

    assert!(wait_until(
        || ra.balance() == 30 && rb.balance() == 30 && rc.balance() == 30,
        Duration::from_secs(10),
    ));
    assert_eq!(ra.history().len(), 2);
}

#[test]
fn crashed_replica_catches_up_via_sync() {
    let (ra, rb, rc) = triad();

    rc.fail();
    let rx = ra.propose(deposit(42, 9));
    rx.recv_timeout(Duration::from_secs(10)).expect("quorum of a and b should decide without c");
    assert!(wait_until(|| rb.balance() == 42, Duration::from_secs(10)));
    assert_eq!(rc.balance(), 0);

    rc.unfail();
    ra.sync();
    assert!(wait_until(|| rc.balance() == 42, Duration::from_secs(10)));
}
