//! Shared test doubles: a transport that mints sequential handles, and a
//! callback that forwards every delivery to a channel.
#![allow(dead_code)] // not every test binary touches every helper

use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::{Receiver, Sender},
    Arc, Mutex,
};

use bytes::Bytes;
use devcall::{
    AttrRead, AttrWritten, Callback, CmdDone, ConnectionId, FailStack, Operation, Transport,
    TransportError, TransportHandle,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Transport double: hands out sequential handles and records what was
/// sent. Tests feed replies back manually through the client.
#[derive(Default)]
pub struct MockTransport {
    next: AtomicU64,
    sent: Mutex<Vec<(TransportHandle, ConnectionId)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_handle(&self) -> TransportHandle {
        self.sent
            .lock()
            .unwrap()
            .last()
            .expect("nothing sent yet")
            .0
    }
}

impl Transport for MockTransport {
    fn send_async(&self, op: &Operation) -> Result<TransportHandle, TransportError> {
        let handle = TransportHandle(1 + self.next.fetch_add(1, Ordering::Relaxed));
        self.sent.lock().unwrap().push((handle, op.conn()));
        Ok(handle)
    }
}

/// What a [`Recorder`] saw, copied out of the borrowed views.
#[derive(Debug, Clone)]
pub enum Delivery {
    CmdDone {
        conn: ConnectionId,
        cmd_name: String,
        result: Result<Vec<u8>, FailStack>,
    },
    AttrRead {
        conn: ConnectionId,
        attr_names: Vec<String>,
        result: Result<Vec<u8>, FailStack>,
    },
    AttrWritten {
        conn: ConnectionId,
        attr_names: Vec<String>,
        result: Result<(), FailStack>,
    },
}

/// Callback double forwarding each delivery to a channel, optionally
/// panicking afterwards for the connections listed in `poison`.
pub struct Recorder {
    tx: Mutex<Sender<Delivery>>,
    poison: Vec<ConnectionId>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Receiver<Delivery>) {
        Self::poisoned(Vec::new())
    }

    /// A recorder whose handlers panic after recording, but only for the
    /// given connections.
    pub fn poisoned(poison: Vec<ConnectionId>) -> (Arc<Self>, Receiver<Delivery>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(tx),
                poison,
            }),
            rx,
        )
    }

    fn record(&self, conn: ConnectionId, delivery: Delivery) {
        self.tx.lock().unwrap().send(delivery).ok();
        if self.poison.contains(&conn) {
            panic!("recorder poisoned for {conn}");
        }
    }
}

impl Callback for Recorder {
    fn cmd_done(&self, ev: &CmdDone<'_>) {
        self.record(
            ev.conn,
            Delivery::CmdDone {
                conn: ev.conn,
                cmd_name: ev.cmd_name.to_owned(),
                result: ev.result.map(<[u8]>::to_vec).map_err(FailStack::clone),
            },
        );
    }

    fn attr_read(&self, ev: &AttrRead<'_>) {
        self.record(
            ev.conn,
            Delivery::AttrRead {
                conn: ev.conn,
                attr_names: ev.attr_names.to_vec(),
                result: ev.result.map(<[u8]>::to_vec).map_err(FailStack::clone),
            },
        );
    }

    fn attr_written(&self, ev: &AttrWritten<'_>) {
        self.record(
            ev.conn,
            Delivery::AttrWritten {
                conn: ev.conn,
                attr_names: ev.attr_names.to_vec(),
                result: ev.result.map_err(FailStack::clone),
            },
        );
    }
}

pub fn cmd(conn: u64, name: &str) -> Operation {
    Operation::Command {
        conn: ConnectionId(conn),
        name: name.into(),
        argin: Bytes::new(),
    }
}

pub fn read_attrs(conn: u64, names: &[&str]) -> Operation {
    Operation::ReadAttrs {
        conn: ConnectionId(conn),
        names: names.iter().map(|s| s.to_string()).collect(),
    }
}
