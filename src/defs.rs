//! Plain identifier and configuration types shared by every module.

use std::{
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Identifier of an outstanding polling-mode call.
///
/// Unique within the issuing client context for its whole lifetime: the
/// generator behind it is never reset, not even when the pending table is
/// cleared, so a stale id can never alias a newer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestId(NonZeroU64);

impl RequestId {
    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "areq-{}", self.0)
    }
}

/// Sequential id source behind [`RequestId`].
///
/// A single fetch-add per allocation; 64-bit sequential integers will not
/// run out within a process lifetime.
#[derive(Debug, Default)]
pub(crate) struct SeqIdGen {
    counter: AtomicU64,
}

impl SeqIdGen {
    /// Returns a value strictly greater than every previously returned one.
    pub fn next_id(&self) -> RequestId {
        // SAFETY: the counter starts at zero, so `1 + N` cannot be zero
        // before the add wraps, which takes 2^64 allocations.
        let raw = unsafe {
            NonZeroU64::new_unchecked(1 + self.counter.fetch_add(1, Ordering::Relaxed))
        };
        RequestId(raw)
    }
}

/// Opaque correlation token minted by the transport when a call is sent.
///
/// The core never interprets it; it only matches it against the value the
/// transport presents together with the eventual reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hdl-{}", self.0)
    }
}

/// Logical remote endpoint a call targets. Used for bulk cancellation when
/// that endpoint becomes unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What kind of remote operation a pending record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Remote command execution.
    Command,
    /// Attribute read.
    ReadAttrs,
    /// Attribute write.
    WriteAttrs,
}

/// How long a reply retrieval may suspend the caller.
///
/// Local waiting never mutates request state: a [`Wait::Bounded`] wait that
/// elapses leaves the record in place, and the caller is free to retry with
/// any mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately, whether or not the reply is there.
    NonBlocking,
    /// Suspend until the record reaches a terminal state.
    Forever,
    /// Suspend up to the given duration.
    Bounded(Duration),
}

impl From<Duration> for Wait {
    fn from(value: Duration) -> Self {
        Self::Bounded(value)
    }
}

/// Delivery sub-model for callback-mode calls, selected per client context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubModel {
    /// The application fires ready callbacks itself, see
    /// [`AsynClient::drain_callbacks`](crate::asyn::AsynClient::drain_callbacks).
    #[default]
    Pull,
    /// A background worker fires callbacks as soon as replies land.
    Push,
}

/// Filter for the pending-request diagnostics counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountScope {
    All,
    PollOnly,
    CallbackOnly,
}
