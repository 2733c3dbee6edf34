//! Asynchronous invocation engine: one client context owning the
//! pending-request table, the delivery sub-model switch and, in push mode,
//! the dispatch worker.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    callback::Callback,
    defs::{ConnectionId, CountScope, RequestId, RequestKind, SubModel, TransportHandle, Wait},
    fail::FailStack,
    transport::{Operation, Transport},
};

mod dispatch;
mod error;
mod table;

pub use dispatch::deliver_event;
pub use error::{DrainError, ReplyError, SubModelError, SubmitError};

/// Successfully retrieved result of a polling-mode call.
#[derive(Debug, Clone)]
pub struct Reply {
    pub conn: ConnectionId,
    pub kind: RequestKind,
    /// Names from the submitting operation: one command name, or the
    /// attribute names, in submission order.
    pub names: Vec<String>,
    /// Kind-specific payload; empty for attribute writes.
    pub value: Bytes,
}

/// One client context of the asynchronous invocation core.
///
/// Created at client initialization and passed around explicitly; dropping
/// it cancels every still-pending call with a shutdown failure and stops
/// the dispatch worker after it delivered what was already terminal.
///
/// All methods are safe to call from any number of application threads;
/// the transport-facing pair ([`on_reply`](Self::on_reply),
/// [`on_connection_lost`](Self::on_connection_lost)) is meant to be driven
/// from the transport's I/O threads concurrently with everything else.
pub struct AsynClient {
    transport: Arc<dyn Transport>,
    table: Arc<table::RequestTable>,
    state: Mutex<ClientState>,
}

struct ClientState {
    sub_model: SubModel,
    worker: Option<dispatch::CallbackWorker>,
}

impl AsynClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            table: Arc::new(table::RequestTable::new()),
            state: Mutex::new(ClientState {
                sub_model: SubModel::default(),
                worker: None,
            }),
        }
    }

    // ==== Submission ====

    /// Send `op` without blocking and register it for later polling.
    ///
    /// The returned id is the only way to retrieve the reply; see
    /// [`get_reply`](Self::get_reply).
    pub fn submit_poll(&self, op: Operation) -> Result<RequestId, SubmitError> {
        let handle = self.transport.send_async(&op)?;
        Ok(self.table.insert_poll(handle, op.into()))
    }

    /// Send `op` without blocking; `callback` receives the completion.
    ///
    /// In the push sub-model this lazily starts the dispatch worker. In the
    /// pull sub-model the completion sits in the table until a
    /// [`drain_callbacks`](Self::drain_callbacks) pass picks it up.
    pub fn submit_callback(
        &self,
        op: Operation,
        callback: Arc<dyn Callback>,
    ) -> Result<(), SubmitError> {
        let handle = self.transport.send_async(&op)?;
        self.table.insert_callback(handle, op.into(), callback);

        let mut state = self.state.lock();
        if state.sub_model == SubModel::Push {
            Self::ensure_worker(&mut state, &self.table).map_err(SubmitError::WorkerSpawn)?;
        }
        Ok(())
    }

    // ==== Pull-mode retrieval ====

    /// Retrieve the reply of a polling-mode call.
    ///
    /// - [`Wait::NonBlocking`] returns [`ReplyError::NotArrivedYet`] right
    ///   away while the reply is missing; the record stays registered.
    /// - [`Wait::Forever`] suspends until the record turns terminal.
    /// - [`Wait::Bounded`] suspends up to the given duration, then reports
    ///   [`ReplyError::NotArrivedYet`], again leaving the record intact.
    ///   A timeout reported by the *transport* is different: it arrives as
    ///   a regular terminal reply whose failure stack says
    ///   [`CommTimedOut`](crate::fail::FailCode::CommTimedOut).
    ///
    /// Consumption is final: the first successful retrieval removes the
    /// record, and any further attempt with the same id reports
    /// [`ReplyError::UnknownRequest`].
    pub fn get_reply(&self, id: RequestId, wait: Wait) -> Result<Reply, ReplyError> {
        self.table.consume_reply(id, wait)
    }

    // ==== Callback delivery without a worker ====

    /// Fire callbacks for every already-terminal callback-mode record, on
    /// the calling thread. The pull-mode counterpart of the push worker.
    /// Returns how many deliveries were made.
    pub fn drain_callbacks(&self) -> usize {
        let mut batch = Vec::new();
        self.table.drain_ready_callbacks(&mut batch);

        let fired = batch.len();
        for item in batch {
            dispatch::fire(item);
        }
        fired
    }

    /// Like [`drain_callbacks`](Self::drain_callbacks), but keeps draining
    /// until no callback-mode record is outstanding, waiting as instructed
    /// for the missing ones.
    pub fn drain_callbacks_for(&self, wait: Wait) -> Result<(), DrainError> {
        match wait {
            Wait::NonBlocking => {
                self.drain_callbacks();
                match self.table.count_pending(CountScope::CallbackOnly) {
                    0 => Ok(()),
                    remaining => Err(DrainError::StillPending { remaining }),
                }
            }

            Wait::Forever => loop {
                self.drain_callbacks();
                if self.table.count_pending(CountScope::CallbackOnly) == 0 {
                    return Ok(());
                }
                self.table.park_for_ready(None);
            },

            Wait::Bounded(dur) => {
                let deadline = Instant::now() + dur;
                loop {
                    self.drain_callbacks();
                    if self.table.count_pending(CountScope::CallbackOnly) == 0 {
                        return Ok(());
                    }
                    if self.table.park_for_ready(Some(deadline)) {
                        // Deadline passed; sweep once more for records that
                        // landed right at the wire.
                        self.drain_callbacks();
                        return match self.table.count_pending(CountScope::CallbackOnly) {
                            0 => Ok(()),
                            remaining => Err(DrainError::StillPending { remaining }),
                        };
                    }
                }
            }
        }
    }

    // ==== Sub-model control ====

    /// Current delivery sub-model for callback-mode calls.
    pub fn sub_model(&self) -> SubModel {
        self.state.lock().sub_model
    }

    /// Select the delivery sub-model.
    ///
    /// Switching to [`SubModel::Push`] arms the dispatch worker: it starts
    /// right away if callback-mode records already exist, otherwise with
    /// the next callback-mode submission. Switching back to
    /// [`SubModel::Pull`] stops the worker; in practice this is a
    /// one-directional upgrade decided once at startup, and downgrading
    /// mid-flight merely puts already-arrived records back under manual
    /// draining.
    pub fn set_sub_model(&self, model: SubModel) -> Result<(), SubModelError> {
        let mut state = self.state.lock();
        if state.sub_model == model {
            return Ok(());
        }
        state.sub_model = model;

        match model {
            SubModel::Push => {
                if self.table.count_pending(CountScope::CallbackOnly) > 0 {
                    Self::ensure_worker(&mut state, &self.table)
                        .map_err(SubModelError::WorkerSpawn)?;
                }
            }
            SubModel::Pull => {
                if let Some(mut worker) = state.worker.take() {
                    worker.stop();
                }
            }
        }
        Ok(())
    }

    fn ensure_worker(
        state: &mut ClientState,
        table: &Arc<table::RequestTable>,
    ) -> std::io::Result<()> {
        if state.worker.is_none() {
            state.worker = Some(dispatch::CallbackWorker::spawn(table.clone())?);
        }
        Ok(())
    }

    // ==== Transport-facing ====

    /// A reply for `handle` is ready.
    ///
    /// Unknown handles are ignored: replies racing with cancellation, or
    /// delivered twice, are expected traffic here, not errors.
    pub fn on_reply(&self, handle: TransportHandle, body: Result<Bytes, FailStack>) {
        self.table.mark_arrived(handle, body);
    }

    /// The connection is gone; fail everything still in flight on it.
    ///
    /// Every affected call finishes with a synthesized
    /// [`ConnectionLost`](crate::fail::FailCode::ConnectionLost) stack, so
    /// consumers see one failure shape whether the remote reported an error
    /// or never answered at all. Returns how many calls were cancelled.
    pub fn on_connection_lost(&self, conn: ConnectionId) -> usize {
        self.table
            .mark_cancelled(conn, &FailStack::connection_lost(conn))
    }

    // ==== Diagnostics ====

    /// Number of calls still waiting for a reply, optionally filtered per
    /// sub-model.
    pub fn count_pending(&self, scope: CountScope) -> usize {
        self.table.count_pending(scope)
    }
}

impl Drop for AsynClient {
    fn drop(&mut self) {
        // Cancel first: the worker then delivers the shutdown failures
        // before its stop request is honored.
        let cancelled = self.table.cancel_all(&FailStack::client_shutdown());
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled in-flight calls at client shutdown");
        }

        if let Some(mut worker) = self.state.lock().worker.take() {
            worker.stop();
        }
    }
}
