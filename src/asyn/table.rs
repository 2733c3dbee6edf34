//! Pending-request bookkeeping shared by both delivery sub-models.
//!
//! One table per client context owns every in-flight record. Polling-mode
//! records are reachable by the id returned to the caller (plus a
//! transport-handle reverse index so arrivals can find them); callback-mode
//! records are reachable by transport handle and registered in a
//! per-connection index that exists only for bulk cancellation.
//!
//! All mutation goes through the single table lock; the condition variable
//! next to it is signalled on every `Pending` -> terminal transition and
//! wakes both pull-mode waiters and the dispatch worker.

use std::{
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    time::Instant,
};

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::{
    callback::Callback,
    defs::{ConnectionId, CountScope, RequestId, RequestKind, SeqIdGen, TransportHandle, Wait},
    fail::FailStack,
    transport::Operation,
};

use super::{error::ReplyError, Reply};

/// Kind-specific success payload or carried failure of one finished call.
pub(crate) type ReplyBody = Result<Bytes, FailStack>;

/// Static description of one submitted operation, kept until the reply is
/// consumed so completion data can echo the names the caller used.
#[derive(Debug, Clone)]
pub(crate) struct OpMeta {
    pub conn: ConnectionId,
    pub kind: RequestKind,
    pub names: Vec<String>,
}

impl From<Operation> for OpMeta {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Command { conn, name, .. } => Self {
                conn,
                kind: RequestKind::Command,
                names: vec![name],
            },
            Operation::ReadAttrs { conn, names } => Self {
                conn,
                kind: RequestKind::ReadAttrs,
                names,
            },
            Operation::WriteAttrs { conn, names, .. } => Self {
                conn,
                kind: RequestKind::WriteAttrs,
                names,
            },
        }
    }
}

enum ReqState {
    Pending,
    Arrived(ReplyBody),
    Cancelled(FailStack),
}

struct PendingRequest {
    handle: TransportHandle,
    meta: OpMeta,
    state: ReqState,
    /// Stamped at the `Pending` -> terminal transition; drains dispatch in
    /// stamp order so same-connection replies keep their arrival order.
    ready_seq: u64,
    /// Present for callback-mode records only. Ownership stays with the
    /// application; the table never holds the last reference by contract.
    callback: Option<Arc<dyn Callback>>,
}

impl PendingRequest {
    fn is_pending(&self) -> bool {
        matches!(self.state, ReqState::Pending)
    }
}

/// One callback-mode record removed from the table, ready to be fired.
pub(crate) struct ReadyCallback {
    pub meta: OpMeta,
    pub callback: Arc<dyn Callback>,
    pub body: ReplyBody,
}

#[derive(Default)]
struct TableInner {
    /// Polling-mode records, by the id handed back to the caller.
    poll: HashMap<RequestId, PendingRequest>,
    /// Reverse index so transport arrivals can reach polling records.
    poll_by_handle: HashMap<TransportHandle, RequestId>,
    /// Callback-mode records, by transport handle.
    cb: HashMap<TransportHandle, PendingRequest>,
    /// Bulk-cancellation index: which callback handles target a connection.
    cb_by_conn: HashMap<ConnectionId, Vec<TransportHandle>>,
    /// Next [`PendingRequest::ready_seq`] stamp.
    next_ready_seq: u64,
}

impl TableInner {
    fn stamp(&mut self) -> u64 {
        self.next_ready_seq += 1;
        self.next_ready_seq
    }

    fn locate_mut(&mut self, handle: TransportHandle) -> Option<&mut PendingRequest> {
        if self.cb.contains_key(&handle) {
            return self.cb.get_mut(&handle);
        }
        let id = *self.poll_by_handle.get(&handle)?;
        self.poll.get_mut(&id)
    }

    fn unindex_cb(&mut self, conn: ConnectionId, handle: TransportHandle) {
        if let Some(list) = self.cb_by_conn.get_mut(&conn) {
            list.retain(|h| *h != handle);
            if list.is_empty() {
                self.cb_by_conn.remove(&conn);
            }
        }
    }

    /// Move every terminal callback-mode record out of the table.
    ///
    /// Removal happens under the lock, so no record can be handed to two
    /// consumers.
    fn drain_ready(&mut self, out: &mut Vec<ReadyCallback>) {
        let mut ready: Vec<(u64, TransportHandle)> = self
            .cb
            .iter()
            .filter(|(_, rec)| !rec.is_pending())
            .map(|(handle, rec)| (rec.ready_seq, *handle))
            .collect();
        ready.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, handle) in ready {
            let Some(rec) = self.cb.remove(&handle) else {
                continue;
            };
            self.unindex_cb(rec.meta.conn, handle);

            let body = match rec.state {
                ReqState::Arrived(body) => body,
                ReqState::Cancelled(stack) => Err(stack),
                ReqState::Pending => continue,
            };
            let Some(callback) = rec.callback else {
                continue;
            };

            out.push(ReadyCallback {
                meta: rec.meta,
                callback,
                body,
            });
        }
    }

    fn has_ready_cb(&self) -> bool {
        self.cb.values().any(|rec| !rec.is_pending())
    }
}

/// Pending-request table of one client context.
pub(crate) struct RequestTable {
    ids: SeqIdGen,
    inner: Mutex<TableInner>,
    /// Signalled on every `Pending` -> terminal transition.
    ready: Condvar,
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            ids: SeqIdGen::default(),
            inner: Mutex::new(TableInner::default()),
            ready: Condvar::new(),
        }
    }

    // ==== Registration ====

    /// Register a polling-mode call. The returned id is the caller's only
    /// way to retrieve the reply.
    pub fn insert_poll(&self, handle: TransportHandle, meta: OpMeta) -> RequestId {
        let id = self.ids.next_id();
        let mut inner = self.inner.lock();

        inner.poll_by_handle.insert(handle, id);
        inner.poll.insert(
            id,
            PendingRequest {
                handle,
                meta,
                state: ReqState::Pending,
                ready_seq: 0,
                callback: None,
            },
        );

        id
    }

    /// Register a callback-mode call. No id is handed out; the record is
    /// reachable by transport handle and through the connection index.
    pub fn insert_callback(&self, handle: TransportHandle, meta: OpMeta, callback: Arc<dyn Callback>) {
        let mut inner = self.inner.lock();

        inner.cb_by_conn.entry(meta.conn).or_default().push(handle);
        inner.cb.insert(
            handle,
            PendingRequest {
                handle,
                meta,
                state: ReqState::Pending,
                ready_seq: 0,
                callback: Some(callback),
            },
        );
    }

    // ==== Transport-driven transitions ====

    /// Store the reply for `handle` and wake whoever waits on it.
    ///
    /// Unknown handles and records already terminal are ignored: replies
    /// racing with cancellation, or delivered twice, are expected traffic.
    pub fn mark_arrived(&self, handle: TransportHandle, body: ReplyBody) {
        let mut inner = self.inner.lock();
        let seq = inner.stamp();

        let Some(rec) = inner.locate_mut(handle) else {
            tracing::debug!(%handle, "reply for unknown handle dropped");
            return;
        };
        if !rec.is_pending() {
            // Cancellation won the race; the first terminal transition stands.
            tracing::debug!(%handle, "late reply for terminal record dropped");
            return;
        }

        rec.state = ReqState::Arrived(body);
        rec.ready_seq = seq;
        drop(inner);
        self.ready.notify_all();
    }

    /// Cancel every still-pending record targeting `conn`, in both
    /// sub-models, with the given synthesized failure. Returns how many
    /// records were transitioned.
    pub fn mark_cancelled(&self, conn: ConnectionId, failure: &FailStack) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut seq = inner.next_ready_seq;
        let mut hit = 0;

        if let Some(handles) = inner.cb_by_conn.remove(&conn) {
            for handle in handles {
                if let Some(rec) = inner.cb.get_mut(&handle) {
                    if rec.is_pending() {
                        seq += 1;
                        rec.ready_seq = seq;
                        rec.state = ReqState::Cancelled(failure.clone());
                        hit += 1;
                    }
                }
            }
        }

        for rec in inner.poll.values_mut() {
            if rec.meta.conn == conn && rec.is_pending() {
                seq += 1;
                rec.ready_seq = seq;
                rec.state = ReqState::Cancelled(failure.clone());
                hit += 1;
            }
        }

        inner.next_ready_seq = seq;
        drop(guard);
        if hit > 0 {
            self.ready.notify_all();
        }
        hit
    }

    /// Cancel every still-pending record in the table. Client teardown.
    pub fn cancel_all(&self, failure: &FailStack) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut seq = inner.next_ready_seq;
        let mut hit = 0;

        for rec in inner.poll.values_mut().chain(inner.cb.values_mut()) {
            if rec.is_pending() {
                seq += 1;
                rec.ready_seq = seq;
                rec.state = ReqState::Cancelled(failure.clone());
                hit += 1;
            }
        }

        inner.next_ready_seq = seq;
        drop(guard);
        if hit > 0 {
            self.ready.notify_all();
        }
        hit
    }

    // ==== Pull-mode consumption ====

    /// Retrieve and remove the reply of a polling-mode call, waiting as
    /// instructed. Terminal records are consumed exactly once; a `Pending`
    /// record outliving the wait stays registered and retriable.
    pub fn consume_reply(&self, id: RequestId, wait: Wait) -> Result<Reply, ReplyError> {
        let mut inner = self.inner.lock();

        if let Some(out) = Self::try_consume(&mut inner, id) {
            return out;
        }

        match wait {
            Wait::NonBlocking => Err(ReplyError::NotArrivedYet(id)),

            Wait::Forever => loop {
                self.ready.wait(&mut inner);
                if let Some(out) = Self::try_consume(&mut inner, id) {
                    return out;
                }
            },

            Wait::Bounded(dur) => {
                let deadline = Instant::now() + dur;
                loop {
                    let timed_out = self.ready.wait_until(&mut inner, deadline).timed_out();
                    if let Some(out) = Self::try_consume(&mut inner, id) {
                        return out;
                    }
                    if timed_out {
                        return Err(ReplyError::NotArrivedYet(id));
                    }
                }
            }
        }
    }

    fn try_consume(inner: &mut TableInner, id: RequestId) -> Option<Result<Reply, ReplyError>> {
        match inner.poll.get(&id) {
            None => Some(Err(ReplyError::UnknownRequest(id))),
            Some(rec) if rec.is_pending() => None,
            Some(_) => {
                let rec = inner.poll.remove(&id)?;
                inner.poll_by_handle.remove(&rec.handle);

                Some(match rec.state {
                    ReqState::Arrived(Ok(value)) => Ok(Reply {
                        conn: rec.meta.conn,
                        kind: rec.meta.kind,
                        names: rec.meta.names,
                        value,
                    }),
                    ReqState::Arrived(Err(stack)) | ReqState::Cancelled(stack) => {
                        Err(ReplyError::Failed(stack))
                    }
                    ReqState::Pending => unreachable!(),
                })
            }
        }
    }

    // ==== Push-mode consumption ====

    /// Move every terminal callback-mode record out of the table without
    /// blocking.
    pub fn drain_ready_callbacks(&self, out: &mut Vec<ReadyCallback>) {
        self.inner.lock().drain_ready(out);
    }

    /// Park until at least one callback-mode record is terminal or `stop`
    /// is raised, then drain whatever is ready into `out`.
    ///
    /// `out` may still be empty on return; that means a stop request woke
    /// us up.
    pub fn wait_ready_callbacks(&self, stop: &AtomicBool, out: &mut Vec<ReadyCallback>) {
        let mut inner = self.inner.lock();
        loop {
            inner.drain_ready(out);
            if !out.is_empty() || stop.load(Ordering::Acquire) {
                return;
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Park until some callback-mode record turns terminal, or `deadline`
    /// (when given) passes. Returns `true` on timeout. Returns immediately
    /// if something is already ready.
    pub fn park_for_ready(&self, deadline: Option<Instant>) -> bool {
        let mut inner = self.inner.lock();
        if inner.has_ready_cb() {
            return false;
        }
        match deadline {
            None => {
                self.ready.wait(&mut inner);
                false
            }
            Some(deadline) => self.ready.wait_until(&mut inner, deadline).timed_out(),
        }
    }

    /// Wake every waiter without any state change. Used to deliver stop
    /// requests to the dispatch worker.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }

    // ==== Diagnostics ====

    /// Number of non-terminal records, optionally filtered per sub-model.
    pub fn count_pending(&self, scope: CountScope) -> usize {
        let inner = self.inner.lock();
        let polls = inner.poll.values().filter(|r| r.is_pending()).count();
        let cbs = inner.cb.values().filter(|r| r.is_pending()).count();

        match scope {
            CountScope::All => polls + cbs,
            CountScope::PollOnly => polls,
            CountScope::CallbackOnly => cbs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::ConnectionId;

    struct Nop;
    impl Callback for Nop {}

    fn meta(conn: u64) -> OpMeta {
        OpMeta {
            conn: ConnectionId(conn),
            kind: RequestKind::Command,
            names: vec!["Status".into()],
        }
    }

    #[test]
    fn poll_record_consumed_exactly_once() {
        let table = RequestTable::new();
        let handle = TransportHandle(1);
        let id = table.insert_poll(handle, meta(1));

        assert!(matches!(
            table.consume_reply(id, Wait::NonBlocking),
            Err(ReplyError::NotArrivedYet(got)) if got == id
        ));

        table.mark_arrived(handle, Ok(Bytes::from_static(b"ok")));

        let reply = table.consume_reply(id, Wait::NonBlocking).unwrap();
        assert_eq!(&reply.value[..], b"ok");

        assert!(matches!(
            table.consume_reply(id, Wait::NonBlocking),
            Err(ReplyError::UnknownRequest(got)) if got == id
        ));
    }

    #[test]
    fn unknown_handle_is_ignored() {
        let table = RequestTable::new();
        table.mark_arrived(TransportHandle(99), Ok(Bytes::new()));
        assert_eq!(table.count_pending(CountScope::All), 0);
    }

    #[test]
    fn cancellation_wins_when_earlier() {
        let table = RequestTable::new();
        let handle = TransportHandle(1);
        let id = table.insert_poll(handle, meta(7));

        table.mark_cancelled(ConnectionId(7), &FailStack::connection_lost(ConnectionId(7)));
        // The genuine reply is now late; it must not resurrect the record.
        table.mark_arrived(handle, Ok(Bytes::from_static(b"late")));

        match table.consume_reply(id, Wait::NonBlocking) {
            Err(ReplyError::Failed(stack)) => assert!(stack.is_connection_lost()),
            other => panic!("expected connection failure, got {other:?}"),
        }
    }

    #[test]
    fn arrival_wins_when_earlier() {
        let table = RequestTable::new();
        let handle = TransportHandle(1);
        let id = table.insert_poll(handle, meta(7));

        table.mark_arrived(handle, Ok(Bytes::from_static(b"real")));
        table.mark_cancelled(ConnectionId(7), &FailStack::connection_lost(ConnectionId(7)));

        let reply = table.consume_reply(id, Wait::NonBlocking).unwrap();
        assert_eq!(&reply.value[..], b"real");
    }

    #[test]
    fn cancelled_callback_records_drain_once() {
        let table = RequestTable::new();
        table.insert_callback(TransportHandle(1), meta(3), Arc::new(Nop));
        table.insert_callback(TransportHandle(2), meta(3), Arc::new(Nop));
        table.insert_callback(TransportHandle(3), meta(4), Arc::new(Nop));

        assert_eq!(
            table.mark_cancelled(ConnectionId(3), &FailStack::connection_lost(ConnectionId(3))),
            2
        );

        let mut out = Vec::new();
        table.drain_ready_callbacks(&mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.body.is_err()));

        out.clear();
        table.drain_ready_callbacks(&mut out);
        assert!(out.is_empty());
        assert_eq!(table.count_pending(CountScope::CallbackOnly), 1);
    }

    #[test]
    fn drains_follow_arrival_order() {
        let table = RequestTable::new();
        table.insert_callback(TransportHandle(1), meta(5), Arc::new(Nop));
        table.insert_callback(TransportHandle(2), meta(5), Arc::new(Nop));
        table.insert_callback(TransportHandle(3), meta(5), Arc::new(Nop));

        table.mark_arrived(TransportHandle(2), Ok(Bytes::from_static(b"b")));
        table.mark_arrived(TransportHandle(3), Ok(Bytes::from_static(b"c")));
        table.mark_arrived(TransportHandle(1), Ok(Bytes::from_static(b"a")));

        let mut out = Vec::new();
        table.drain_ready_callbacks(&mut out);

        let order: Vec<Vec<u8>> = out
            .iter()
            .map(|r| r.body.as_ref().unwrap().to_vec())
            .collect();
        assert_eq!(order, [b"b".to_vec(), b"c".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn count_pending_scopes() {
        let table = RequestTable::new();
        let id = table.insert_poll(TransportHandle(1), meta(1));
        table.insert_callback(TransportHandle(2), meta(1), Arc::new(Nop));

        assert_eq!(table.count_pending(CountScope::All), 2);
        assert_eq!(table.count_pending(CountScope::PollOnly), 1);
        assert_eq!(table.count_pending(CountScope::CallbackOnly), 1);

        table.mark_arrived(TransportHandle(1), Ok(Bytes::new()));
        assert_eq!(table.count_pending(CountScope::PollOnly), 0);

        // Consuming does not change pending counts; arrival already did.
        let _ = table.consume_reply(id, Wait::NonBlocking);
        assert_eq!(table.count_pending(CountScope::All), 1);
    }
}
