use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use std::str::FromStr;

use prototk_derive::Message;

use sha3::{Digest, Sha3_256};

use zerror_core::ErrorCore;

///////////////////////////////////////////// Constants ////////////////////////////////////////////

/// Duration, in seconds, a proposer waits to collect PROMISE responses before acting on whatever
/// quorum it has gathered.
pub const PROMISE_COLLECTION_SECONDS: u64 = 3;
/// Lower bound, in seconds, of the uniform backoff window before a NACK-driven retry.
pub const NACK_BACKOFF_MIN_SECONDS: f64 = 1.0;
/// Upper bound (exclusive), in seconds, of the NACK retry backoff window.
pub const NACK_BACKOFF_MAX_SECONDS: f64 = 5.0;

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors surfaced by the wire and log layers.  None of these are fatal to the consensus core: a
/// malformed datagram is logged and dropped, never propagated to the caller.  `Error` is never
/// itself sent over the wire — only [Message] is — so it derives just `zerror_derive::Z`, the
/// same plain shape `analogize::Error` uses, rather than also deriving `prototk_derive::Message`
/// (which only supports enums built from single-field tuple variants; see [Message]/[TransactionKind]
/// below for that shape).
#[derive(zerror_derive::Z)]
pub enum Error {
    Success {
        core: ErrorCore,
    },
    SerializationError {
        core: ErrorCore,
        what: String,
    },
    IoError {
        core: ErrorCore,
        what: String,
    },
    /// A conflicting value was observed at an already-decided slot, or a [MergedValue] mixed
    /// transaction kinds.  This is a safety violation and must never occur under correct
    /// operation; it is reported rather than silently swallowed so the replica can halt.
    SafetyViolation {
        core: ErrorCore,
        what: String,
    },
}

impl Default for Error {
    fn default() -> Self {
        Self::Success {
            core: ErrorCore::default(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(what: std::io::Error) -> Self {
        Self::IoError {
            core: ErrorCore::default(),
            what: what.to_string(),
        }
    }
}

impl From<prototk::Error> for Error {
    fn from(what: prototk::Error) -> Self {
        Self::SerializationError {
            core: ErrorCore::default(),
            what: format!("{what:?}"),
        }
    }
}

////////////////////////////////////////////// ReplicaID ///////////////////////////////////////////

/// The stable identity of a replica: the `(ip, port)` pair it is addressed by.  This value doubles
/// as the ballot tiebreaker, so it must be unique and unchanging for the lifetime of the ensemble.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, PartialEq, PartialOrd, Ord)]
pub struct ReplicaID {
    #[prototk(1, string)]
    pub host: String,
    #[prototk(2, uint32)]
    pub port: u32,
}

impl ReplicaID {
    /// The smallest possible replica identity, used to seed [Ballot::BOTTOM].
    pub fn bottom() -> ReplicaID {
        ReplicaID {
            host: String::new(),
            port: 0,
        }
    }
}

impl From<SocketAddr> for ReplicaID {
    fn from(addr: SocketAddr) -> Self {
        ReplicaID {
            host: addr.ip().to_string(),
            port: addr.port() as u32,
        }
    }
}

impl FromStr for ReplicaID {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {s:?}"))?;
        let port: u32 = port
            .parse()
            .map_err(|_| format!("invalid port in {s:?}"))?;
        Ok(ReplicaID {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for ReplicaID {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

////////////////////////////////////////////// Ballot //////////////////////////////////////////////

/// Ballots are neither created nor destroyed, they just exist.  The protocol must guarantee that
/// no two replicas ever work the synod protocol for the same slot under the same ballot.  To
/// accomplish this, a ballot is the ordered pair `(number, tiebreak)`, where only the replica named
/// by `tiebreak` is allowed to issue proposals under it.
///
/// Ballots are comparable.  When `ballot1 < ballot2`, we say `ballot2` supersedes `ballot1`.  The
/// comparison is lexicographic on `(number, tiebreak)`, which guarantees a proposer whose ballot is
/// superseded can always choose a strictly greater one.
#[derive(Clone, Copy, Debug, Eq, Hash, Message, PartialEq, PartialOrd, Ord)]
pub struct Ballot {
    #[prototk(1, uint64)]
    pub number: u64,
    #[prototk(2, message)]
    pub tiebreak: ReplicaID,
}

impl Ballot {
    /// The smallest possible ballot; no legitimate proposer ever issues this one.
    pub fn bottom() -> Ballot {
        Ballot {
            number: 0,
            tiebreak: ReplicaID::bottom(),
        }
    }

    /// The ballot that immediately supersedes this one when issued by `tiebreak`.
    pub fn next(&self, tiebreak: ReplicaID) -> Ballot {
        Ballot {
            number: self.number + 1,
            tiebreak,
        }
    }
}

impl Default for Ballot {
    fn default() -> Self {
        Self::bottom()
    }
}

impl Display for Ballot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.number, self.tiebreak)
    }
}

///////////////////////////////////////// TransactionKind //////////////////////////////////////////

/// A zero-field marker carried by [TransactionKind]'s variants.  `prototk_derive::Message`'s enum
/// support only covers single-field tuple variants (see [Value]'s `Single`/`Merged` shape above),
/// not bare unit variants, so each kind wraps one of these instead — the same workaround
/// `indicio_tuple_db`'s `Empty` struct uses for a field-free nested message.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, PartialEq)]
pub struct Empty {}

/// The two operations a client may submit against the ledger.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, PartialEq)]
pub enum TransactionKind {
    #[prototk(1, message)]
    #[default]
    Deposit(Empty),
    #[prototk(2, message)]
    Withdraw(Empty),
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Deposit(_) => write!(f, "DEPOSIT"),
            TransactionKind::Withdraw(_) => write!(f, "WITHDRAW"),
        }
    }
}

impl TransactionKind {
    /// A single discriminant byte, used to fold `kind` into the client nonce hash.
    fn discriminant(self) -> u8 {
        match self {
            TransactionKind::Deposit(_) => 0,
            TransactionKind::Withdraw(_) => 1,
        }
    }
}

//////////////////////////////////////// TransactionValue //////////////////////////////////////////

/// A single client-proposed transaction: `(kind, amount, hash)`.  `amount` is denominated in the
/// smallest unit the client cares to use (e.g. cents); `hash` is a client-chosen nonce identifying
/// the logical request so that equal triples are recognized as the same request.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, PartialEq)]
pub struct TransactionValue {
    #[prototk(1, message)]
    pub kind: TransactionKind,
    #[prototk(2, uint64)]
    pub amount: u64,
    #[prototk(3, bytes32)]
    pub hash: [u8; 32],
}

impl Display for TransactionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.amount)
    }
}

/// Hash a freshly-submitted client request into a 32-byte nonce.  Not used to verify anything; it
/// only needs to be unlikely to collide with other requests from the same or other clients.
pub fn request_nonce(kind: TransactionKind, amount: u64, source: ReplicaID, salt: u64) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update([kind.discriminant()]);
    hasher.update(amount.to_be_bytes());
    hasher.update(source.to_string().as_bytes());
    hasher.update(salt.to_be_bytes());
    hasher.finalize().into()
}

////////////////////////////////////////////// Value ///////////////////////////////////////////////

/// The value a proposer carries through a Paxos round.  Ordinarily a single [TransactionValue], but
/// the merge rule in the promise-quorum step (see `ledger_core::replica`) may fold several
/// concurrently-proposed values of the same kind together so that no client request is lost.  A sum
/// type keeps [flatten] total and keeps the `isinstance`-style branching the original design used
/// out of every caller.
#[derive(Clone, Debug, Eq, Message, PartialEq)]
pub enum Value {
    #[prototk(1, message)]
    Single(TransactionValue),
    #[prototk(2, message)]
    Merged(Vec<TransactionValue>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Single(TransactionValue::default())
    }
}

impl Value {
    /// Every [TransactionValue] folded into this value, in order.
    pub fn components(&self) -> &[TransactionValue] {
        match self {
            Value::Single(v) => std::slice::from_ref(v),
            Value::Merged(vs) => vs,
        }
    }

    /// True if `needle` is one of the values folded into this one.
    pub fn contains(&self, needle: &TransactionValue) -> bool {
        self.components().iter().any(|v| v == needle)
    }

    /// Collapse a [Value] to the single [TransactionValue] that gets written to the log.  A
    /// singleton passes through unchanged.  A [Value::Merged] sums the amounts and folds the
    /// nonces into one deterministic hash; every element must share `kind`, which is asserted here
    /// rather than recovered from, per the safety contract in the specification.
    pub fn flatten(&self) -> Result<TransactionValue, Error> {
        match self {
            Value::Single(v) => Ok(*v),
            Value::Merged(vs) => {
                if vs.is_empty() {
                    return Err(Error::SafetyViolation {
                        core: ErrorCore::default(),
                        what: "merged value with no components".to_string(),
                    });
                }
                let kind = vs[0].kind;
                let mut amount: u64 = 0;
                let mut hasher = Sha3_256::new();
                for v in vs.iter() {
                    if v.kind != kind {
                        return Err(Error::SafetyViolation {
                            core: ErrorCore::default(),
                            what: format!(
                                "merged value mixes kinds {kind} and {other}",
                                other = v.kind
                            ),
                        });
                    }
                    amount = amount.saturating_add(v.amount);
                    hasher.update(v.hash);
                }
                let hash: [u8; 32] = hasher.finalize().into();
                Ok(TransactionValue {
                    kind,
                    amount,
                    hash,
                })
            }
        }
    }
}

////////////////////////////////////////////// LogRecord ///////////////////////////////////////////

/// One entry of the transaction log as carried over the wire during sync: a decided (already
/// flattened) value at a slot.
#[derive(Clone, Debug, Default, Eq, Message, PartialEq)]
pub struct LogRecord {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub value: TransactionValue,
}

////////////////////////////////////////////// Message /////////////////////////////////////////////

// Every datagram exchanged between replicas is one of the [Message] variants below.  Like
// [TransactionKind], `prototk_derive::Message`'s enum support only covers single-field tuple
// variants, so each variant wraps its own body struct rather than carrying named fields directly
// — the same shape [Value]'s `Single`/`Merged` already uses.  This still replaces the original
// design's single envelope with a null-guarded `metadata` map: each body carries exactly the
// fields its role needs, and stage-specific nulls never leak into match arms.

/// Body of a [Message::Prepare]: a proposer soliciting promises for `slot` under `ballot`.
#[derive(Clone, Debug, Default, Message)]
pub struct PrepareBody {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub source: ReplicaID,
}

/// Body of a [Message::Promise]: an acceptor's reply to PREPARE.  `highest_ballot`/`value` are
/// `None` the first time this acceptor has seen `slot`, `Some` when it is renewing an earlier
/// promise.
#[derive(Clone, Debug, Default, Message)]
pub struct PromiseBody {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub source: ReplicaID,
    #[prototk(4, message)]
    pub highest_ballot: Option<Ballot>,
    #[prototk(5, message)]
    pub value: Option<Value>,
}

/// Body of a [Message::Nack]: a rejection, either of a stale ballot (`decided == false`, carrying
/// the acceptor's current ballot/value) or of a PREPARE/ACCEPT that lands on an already-decided
/// slot (`decided == true`, carrying the decided value).
#[derive(Clone, Debug, Default, Message)]
pub struct NackBody {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub source: ReplicaID,
    #[prototk(4, message)]
    pub highest_ballot: Option<Ballot>,
    #[prototk(5, message)]
    pub value: Option<Value>,
    #[prototk(6, Bool)]
    pub decided: bool,
}

/// Body of a [Message::Accept]: a proposer asking acceptors to accept `value` for `slot` under
/// `ballot`.
#[derive(Clone, Debug, Default, Message)]
pub struct AcceptBody {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub source: ReplicaID,
    #[prototk(4, message)]
    pub value: Value,
}

/// Body of a [Message::Accepted]: an acceptor confirming it accepted `value` for `slot`.
#[derive(Clone, Debug, Default, Message)]
pub struct AcceptedBody {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub source: ReplicaID,
    #[prototk(4, message)]
    pub value: Value,
}

/// Body of a [Message::Decide]: the final, agreed value for `slot`.
#[derive(Clone, Debug, Default, Message)]
pub struct DecideBody {
    #[prototk(1, uint64)]
    pub slot: u64,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub source: ReplicaID,
    #[prototk(4, message)]
    pub value: Value,
}

/// Body of a [Message::SyncRequest]: `log` is the sender's full decided-slot snapshot.
#[derive(Clone, Debug, Default, Message)]
pub struct SyncRequestBody {
    #[prototk(1, message)]
    pub source: ReplicaID,
    #[prototk(2, message)]
    pub log: Vec<LogRecord>,
}

/// Body of a [Message::SyncResponse]: `log` is whatever the receiver of a SYNC_REQUEST had that
/// the requester was missing.
#[derive(Clone, Debug, Default, Message)]
pub struct SyncResponseBody {
    #[prototk(1, message)]
    pub source: ReplicaID,
    #[prototk(2, message)]
    pub log: Vec<LogRecord>,
}

#[derive(Clone, Debug, Message)]
pub enum Message {
    #[prototk(1, message)]
    Prepare(PrepareBody),
    #[prototk(2, message)]
    Promise(PromiseBody),
    #[prototk(3, message)]
    Nack(NackBody),
    #[prototk(4, message)]
    Accept(AcceptBody),
    #[prototk(5, message)]
    Accepted(AcceptedBody),
    #[prototk(6, message)]
    Decide(DecideBody),
    #[prototk(7, message)]
    SyncRequest(SyncRequestBody),
    #[prototk(8, message)]
    SyncResponse(SyncResponseBody),
}

impl Default for Message {
    fn default() -> Self {
        Message::Prepare(PrepareBody::default())
    }
}

impl Message {
    /// The slot this message concerns, if any (sync messages are slot-agnostic).
    pub fn slot(&self) -> Option<u64> {
        match self {
            Message::Prepare(body) => Some(body.slot),
            Message::Promise(body) => Some(body.slot),
            Message::Nack(body) => Some(body.slot),
            Message::Accept(body) => Some(body.slot),
            Message::Accepted(body) => Some(body.slot),
            Message::Decide(body) => Some(body.slot),
            Message::SyncRequest(_) | Message::SyncResponse(_) => None,
        }
    }

    /// The replica that sent this message.
    pub fn source(&self) -> ReplicaID {
        match self {
            Message::Prepare(body) => body.source,
            Message::Promise(body) => body.source,
            Message::Nack(body) => body.source,
            Message::Accept(body) => body.source,
            Message::Accepted(body) => body.source,
            Message::Decide(body) => body.source,
            Message::SyncRequest(body) => body.source,
            Message::SyncResponse(body) => body.source,
        }
    }
}
