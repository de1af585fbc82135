//! Interactive front-end for a `ledger_core::Replica`.  Binds a UDP transport, loads the
//! membership file, and drives a `balance|deposit|withdraw|sync|fail|unfail|print|help|quit`
//! command loop against stdin, matching the spec's CLI contract.  Everything here is external
//! collaborator, not consensus core: amount parsing, the optimistic withdraw check, and the
//! config reader all live in this binary.

use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrrg::CommandLine;

use indicio::stdio::StdioEmitter;
use indicio::{clue, ALWAYS, INFO};

use ledger_core::transport::Transport;
use ledger_core::{Replica, COLLECTOR};
use ledger_pb::{request_nonce, Empty, ReplicaID, TransactionKind, TransactionValue};

const USAGE: &str =
    "Usage: ledger_cli [--metrics] <localIP> <localPort> <globalIP> <globalPort> [configPath]";

#[derive(Debug, Default, Eq, PartialEq, arrrg_derive::CommandLine)]
struct Options {
    #[arrrg(flag, "Emit biometrics counters to stdout every 249ms.")]
    metrics: bool,
}

fn main() {
    let (options, free) = Options::from_command_line(USAGE);
    if !(4..=5).contains(&free.len()) {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let local_host = free[0].clone();
    let local_port: u32 = free[1].parse().unwrap_or_else(|_| {
        eprintln!("localPort must be a number");
        std::process::exit(1);
    });
    let global_host = free[2].clone();
    let global_port: u32 = free[3].parse().unwrap_or_else(|_| {
        eprintln!("globalPort must be a number");
        std::process::exit(1);
    });
    let config_path = free.get(4).cloned();

    let bind_to = ReplicaID { host: local_host, port: local_port };
    let self_id = ReplicaID { host: global_host, port: global_port };

    let peers = match &config_path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).unwrap_or_else(|err| {
                eprintln!("could not read config {path}: {err}");
                std::process::exit(1);
            });
            ledger_core::config::read_membership(&contents, self_id).unwrap_or_else(|err| {
                eprintln!("could not parse config {path}: {err}");
                std::process::exit(1);
            })
        }
        None => Vec::new(),
    };

    // indicio: always register a stdio sink so PREPARE/PROMISE chatter, NACKs, and safety
    // violations are visible; verbosity is fixed at INFO, matching the rest of the workspace's
    // server binaries.
    COLLECTOR.register(StdioEmitter);
    COLLECTOR.set_verbosity(INFO);
    clue!(COLLECTOR, ALWAYS, {
        new_process: std::env::args().map(String::from).collect::<Vec<_>>(),
    });

    if options.metrics {
        std::thread::spawn(|| {
            let mut collector = biometrics::Collector::new();
            ledger_core::register_biometrics(&mut collector);
            let fout = std::fs::File::create("/dev/stdout").unwrap();
            let mut emit = biometrics::PlainTextEmitter::new(fout);
            loop {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .expect("clock should never fail")
                    .as_millis()
                    .try_into()
                    .expect("millis since epoch should fit u64");
                if let Err(err) = collector.emit(&mut emit, now) {
                    eprintln!("collector error: {err}");
                }
                std::thread::sleep(std::time::Duration::from_millis(249));
            }
        });
    }

    let transport = Transport::bind(bind_to).unwrap_or_else(|err| {
        eprintln!("could not bind {bind_to}: {err}");
        std::process::exit(1);
    });
    let replica = Replica::new(self_id, peers, transport);
    replica.listen();

    print_help();
    let nonce_salt = AtomicU64::new(0);
    for line in std::io::stdin().lock().lines() {
        let line = line.expect("no I/O errors should be encountered reading stdin");
        let mut words = line.split_whitespace();
        match words.next() {
            Some("balance") | Some("b") => {
                println!("{}", replica.balance());
            }
            Some("deposit") | Some("d") => {
                propose(&replica, &nonce_salt, TransactionKind::Deposit(Empty {}), words.next());
            }
            Some("withdraw") | Some("w") => {
                let Some(amount) = parse_amount(words.next()) else {
                    continue;
                };
                if amount as i64 > replica.balance() {
                    eprintln!("insufficient balance: have {}, want {amount}", replica.balance());
                    continue;
                }
                let salt = nonce_salt.fetch_add(1, Ordering::Relaxed);
                let hash =
                    request_nonce(TransactionKind::Withdraw(Empty {}), amount, replica.self_id(), salt);
                let value = TransactionValue { kind: TransactionKind::Withdraw(Empty {}), amount, hash };
                await_proposal(&replica, value);
            }
            Some("sync") | Some("s") => replica.sync(),
            Some("fail") | Some("f") => replica.fail(),
            Some("unfail") | Some("u") => replica.unfail(),
            Some("print") | Some("p") => print_history(&replica),
            Some("help") => print_help(),
            Some("quit") => break,
            Some(other) => eprintln!("unrecognized command {other:?}; try 'help'"),
            None => {}
        }
    }
}

fn propose(
    replica: &Arc<Replica>,
    nonce_salt: &AtomicU64,
    kind: TransactionKind,
    amount: Option<&str>,
) {
    let Some(amount) = parse_amount(amount) else {
        return;
    };
    let salt = nonce_salt.fetch_add(1, Ordering::Relaxed);
    let hash = request_nonce(kind, amount, replica.self_id(), salt);
    let value = TransactionValue { kind, amount, hash };
    await_proposal(replica, value);
}

/// Non-numeric amounts are rejected synchronously, mirroring the original front-end's
/// `helper.isNumber` guard; this never reaches the consensus layer.
fn parse_amount(word: Option<&str>) -> Option<u64> {
    let Some(word) = word else {
        eprintln!("usage: deposit|withdraw <amount>");
        return None;
    };
    match word.parse::<u64>() {
        Ok(amount) => Some(amount),
        Err(_) => {
            eprintln!("{word:?} is not a number");
            None
        }
    }
}

fn await_proposal(replica: &Arc<Replica>, value: TransactionValue) {
    let rx = replica.propose(value);
    let _ = rx.recv();
    println!("committed {value}; balance is now {}", replica.balance());
}

fn print_history(replica: &Arc<Replica>) {
    for (slot, value) in replica.history() {
        println!("{slot}: {value}");
    }
}

fn print_help() {
    println!(
        "commands: balance|b, deposit|d <amount>, withdraw|w <amount>, sync|s, fail|f, unfail|u, print|p, help, quit"
    );
}
