#![doc = r#"
`ledger_core` implements the consensus replica for a replicated bank-account ledger: the
per-slot Multi-Paxos state machine, the slot allocator, the in-memory transaction log, the
datagram transport with its fail/unfail gate, and the inter-replica log-sync protocol.
"#]

pub mod config;
pub mod log;
pub mod paxos;
pub mod replica;
pub mod slots;
pub mod transport;

pub use log::TransactionLog;
pub use replica::Replica;
pub use slots::SlotAllocator;
pub use transport::Transport;

/// The crate-wide `indicio` sink.  Every module clues into this collector; a binary that wants
/// to see the traffic registers an emitter against it (see `ledger_cli`).
pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/// Register every counter this crate exposes with `collector`.  Intended to be called once by a
/// binary that wants `--metrics` output, mirroring the rest of the workspace's
/// `register_biometrics` convention.
pub fn register_biometrics(collector: &mut biometrics::Collector) {
    replica::register_biometrics(collector);
}
