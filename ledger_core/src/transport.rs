use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use biometrics::Counter;
use buffertk::{stack_pack, Unpackable};
use indicio::{clue, INFO, WARNING};

use ledger_pb::{Message, ReplicaID};

use crate::COLLECTOR;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static SEND: Counter = Counter::new("ledger_core.transport.send");
static SEND_WHILE_FAILED: Counter = Counter::new("ledger_core.transport.send.failed_gate");
static RECV: Counter = Counter::new("ledger_core.transport.recv");
static RECV_WHILE_FAILED: Counter = Counter::new("ledger_core.transport.recv.failed_gate");
static RECV_DESERIALIZATION_ERROR: Counter =
    Counter::new("ledger_core.transport.recv.deserialization_error");

pub fn register_biometrics(collector: &mut biometrics::Collector) {
    collector.register_counter(&SEND);
    collector.register_counter(&SEND_WHILE_FAILED);
    collector.register_counter(&RECV);
    collector.register_counter(&RECV_WHILE_FAILED);
    collector.register_counter(&RECV_DESERIALIZATION_ERROR);
}

/// A connectionless datagram transport with a fail/unfail gate.  While `failed`, both inbound and
/// outbound traffic is silently dropped; this must never block the caller, since Paxos tolerates
/// loss but not hangs.
pub struct Transport {
    socket: UdpSocket,
    running: AtomicBool,
}

impl Transport {
    /// Bind a UDP socket at `bind_to` for send/receive.
    pub fn bind(bind_to: ReplicaID) -> std::io::Result<Arc<Transport>> {
        let socket = UdpSocket::bind((bind_to.host.as_str(), bind_to.port as u16))?;
        Ok(Arc::new(Transport {
            socket,
            running: AtomicBool::new(true),
        }))
    }

    /// The address actually bound, useful when `bind` was called with an ephemeral port (`:0`).
    pub fn local_addr(&self) -> std::io::Result<ReplicaID> {
        Ok(self.socket.local_addr()?.into())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        clue!(COLLECTOR, WARNING, { transport: { failed: true } });
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn unfail(&self) {
        clue!(COLLECTOR, WARNING, { transport: { unfailed: true } });
        self.running.store(true, Ordering::SeqCst);
    }

    /// Serialize and send `message` to `dest`.  A no-op while failed.
    pub fn send(&self, dest: ReplicaID, message: &Message) {
        if !self.is_running() {
            SEND_WHILE_FAILED.click();
            return;
        }
        SEND.click();
        let buf = stack_pack(message).to_vec();
        // best-effort: a send failure here is indistinguishable from datagram loss.
        let _ = self.socket.send_to(&buf, (dest.host.as_str(), dest.port as u16));
    }

    /// Spawn a receiver thread that deserializes inbound datagrams and invokes `handler` for each
    /// one that parses and arrives while the gate is open.
    pub fn spawn_receiver<F>(self: &Arc<Self>, handler: F) -> std::thread::JoinHandle<()>
    where
        F: Fn(Message) + Send + 'static,
    {
        let transport = Arc::clone(self);
        std::thread::spawn(move || {
            let mut buf = [0u8; 65536];
            loop {
                let len = match transport.socket.recv(&mut buf) {
                    Ok(len) => len,
                    Err(_) => continue,
                };
                if !transport.is_running() {
                    RECV_WHILE_FAILED.click();
                    continue;
                }
                RECV.click();
                match Message::unpack(&buf[..len]) {
                    Ok((message, _)) => {
                        clue!(COLLECTOR, INFO, { transport: { received: true } });
                        handler(message);
                    }
                    Err(_err) => {
                        RECV_DESERIALIZATION_ERROR.click();
                        clue!(COLLECTOR, WARNING, {
                            transport: {
                                deserialization_error: true,
                                bytes: len as u64,
                            },
                        });
                    }
                }
            }
        })
    }
}
