//! Push-mode delivery: the callback worker thread, plus the failure
//! isolation wrapper it shares with direct event delivery.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crate::{
    callback::{AttrRead, AttrWritten, Callback, CmdDone, EventNotice},
    defs::{ConnectionId, RequestKind},
    fail::FailStack,
};

use super::table::{ReadyCallback, RequestTable};

/// Stop flag shared between a client context and its worker thread.
#[derive(Debug, Default)]
struct WorkerCmd {
    stop: AtomicBool,
}

/// Background worker serializing push-mode deliveries of one client
/// context.
pub(crate) struct CallbackWorker {
    table: Arc<RequestTable>,
    cmd: Arc<WorkerCmd>,
    join: Option<JoinHandle<()>>,
}

impl CallbackWorker {
    pub fn spawn(table: Arc<RequestTable>) -> std::io::Result<Self> {
        let cmd = Arc::new(WorkerCmd::default());

        let join = {
            let table = table.clone();
            let cmd = cmd.clone();
            std::thread::Builder::new()
                .name("devcall-dispatch".into())
                .spawn(move || run(&table, &cmd))?
        };

        Ok(Self {
            table,
            cmd,
            join: Some(join),
        })
    }

    /// Ask the worker to finish and wait for it. Records already terminal
    /// at this point are still delivered before the thread exits.
    pub fn stop(&mut self) {
        self.cmd.stop.store(true, Ordering::Release);
        self.table.wake_all();
        if let Some(join) = self.join.take() {
            join.join().ok();
        }
    }
}

impl Drop for CallbackWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(table: &RequestTable, cmd: &WorkerCmd) {
    tracing::debug!("callback dispatch worker started");

    let mut batch = Vec::new();
    loop {
        table.wait_ready_callbacks(&cmd.stop, &mut batch);
        if batch.is_empty() {
            // Only a stop request produces an empty batch.
            break;
        }
        for item in batch.drain(..) {
            fire(item);
        }
    }

    tracing::debug!("callback dispatch worker stopped");
}

/// Invoke the right callback method for one finished record.
///
/// Also the delivery step behind pull-mode draining, so both sub-models
/// share one isolation and reporting path.
pub(crate) fn fire(item: ReadyCallback) {
    let ReadyCallback {
        meta,
        callback,
        body,
    } = item;

    let result: Result<&[u8], &FailStack> = body.as_ref().map(|b| b.as_ref());

    match meta.kind {
        RequestKind::Command => {
            let ev = CmdDone {
                conn: meta.conn,
                cmd_name: meta.names.first().map(String::as_str).unwrap_or_default(),
                result,
            };
            guarded(meta.conn, "cmd_done", || callback.cmd_done(&ev));
        }
        RequestKind::ReadAttrs => {
            let ev = AttrRead {
                conn: meta.conn,
                attr_names: &meta.names,
                result,
            };
            guarded(meta.conn, "attr_read", || callback.attr_read(&ev));
        }
        RequestKind::WriteAttrs => {
            let ev = AttrWritten {
                conn: meta.conn,
                attr_names: &meta.names,
                result: result.map(|_| ()),
            };
            guarded(meta.conn, "attr_written", || callback.attr_written(&ev));
        }
    }
}

/// Deliver an out-of-band event notification straight to a callback,
/// bypassing the pending-request table. Meant for transport I/O threads;
/// failures are isolated exactly like worker deliveries.
pub fn deliver_event(callback: &dyn Callback, notice: &EventNotice<'_>) {
    match notice {
        EventNotice::Value(ev) => guarded(ev.conn, "value_changed", || callback.value_changed(ev)),
        EventNotice::Config(ev) => guarded(ev.conn, "config_changed", || callback.config_changed(ev)),
        EventNotice::DataReady(ev) => guarded(ev.conn, "data_ready", || callback.data_ready(ev)),
    }
}

/// Failure classes user code can raise, as seen from the delivery side.
#[derive(Debug)]
enum CallbackFailure {
    /// The callback panicked with a failure stack of its own.
    Domain(FailStack),
    /// The callback panicked with a plain message.
    Generic(String),
    /// The panic payload is nothing we can display.
    Unknown,
}

/// Run one callback method, absorbing whatever it raises.
///
/// A faulty callback must neither stop the dispatch worker nor affect any
/// other queued delivery, so the failure is classified and reported here
/// and goes no further.
fn guarded(conn: ConnectionId, method: &'static str, invoke: impl FnOnce()) {
    let Err(payload) = panic::catch_unwind(AssertUnwindSafe(invoke)) else {
        return;
    };

    match classify(payload) {
        CallbackFailure::Domain(stack) => {
            tracing::error!(%conn, method, failure = %stack, "callback raised a domain failure");
        }
        CallbackFailure::Generic(msg) => {
            tracing::error!(%conn, method, msg = %msg, "callback panicked");
        }
        CallbackFailure::Unknown => {
            tracing::error!(%conn, method, "callback panicked with an opaque payload");
        }
    }
}

fn classify(payload: Box<dyn Any + Send>) -> CallbackFailure {
    let payload = match payload.downcast::<FailStack>() {
        Ok(stack) => return CallbackFailure::Domain(*stack),
        Err(other) => other,
    };
    let payload = match payload.downcast::<String>() {
        Ok(msg) => return CallbackFailure::Generic(*msg),
        Err(other) => other,
    };
    match payload.downcast::<&'static str>() {
        Ok(msg) => CallbackFailure::Generic((*msg).to_string()),
        Err(_) => CallbackFailure::Unknown,
    }
}
