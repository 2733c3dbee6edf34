//! User-facing callback capability.
//!
//! One trait covers both worlds: completion of callback-mode calls
//! (command done, attribute read, attribute written) and out-of-band push
//! events from remote devices. Override only the methods you need; every
//! default is a no-op.
//!
//! # Data lifetime
//!
//! Every view handed to a callback method is borrowed and valid only for
//! the duration of the call. Copy out whatever must outlive it; keeping a
//! reference is a compile error, not a latent crash, which is the point.
//!
//! # Threading
//!
//! Methods are invoked from threads the application did not create: the
//! client's dispatch worker, the thread that calls
//! [`drain_callbacks`](crate::asyn::AsynClient::drain_callbacks), or a
//! transport I/O thread for direct event delivery. One instance attached to
//! subscriptions on several connections may be invoked concurrently.
//! Implementations must be thread-safe and should return quickly; a slow
//! method stalls every delivery queued behind it.

use crate::{defs::ConnectionId, fail::FailStack};

/// Data handed to [`Callback::cmd_done`].
#[derive(Debug, Clone, Copy)]
pub struct CmdDone<'a> {
    pub conn: ConnectionId,
    pub cmd_name: &'a str,
    /// Command output on success, the carried failure stack otherwise.
    pub result: Result<&'a [u8], &'a FailStack>,
}

/// Data handed to [`Callback::attr_read`].
#[derive(Debug, Clone, Copy)]
pub struct AttrRead<'a> {
    pub conn: ConnectionId,
    pub attr_names: &'a [String],
    pub result: Result<&'a [u8], &'a FailStack>,
}

/// Data handed to [`Callback::attr_written`].
#[derive(Debug, Clone, Copy)]
pub struct AttrWritten<'a> {
    pub conn: ConnectionId,
    pub attr_names: &'a [String],
    pub result: Result<(), &'a FailStack>,
}

/// Attribute value change pushed by a remote device.
#[derive(Debug, Clone, Copy)]
pub struct ValueEvent<'a> {
    pub conn: ConnectionId,
    pub attr_name: &'a str,
    pub value: Result<&'a [u8], &'a FailStack>,
}

/// Attribute configuration change pushed by a remote device.
#[derive(Debug, Clone, Copy)]
pub struct ConfigEvent<'a> {
    pub conn: ConnectionId,
    pub attr_name: &'a str,
    pub config: &'a [u8],
}

/// "Data is ready to be fetched" notification pushed by a remote device.
#[derive(Debug, Clone, Copy)]
pub struct DataReadyEvent<'a> {
    pub conn: ConnectionId,
    pub attr_name: &'a str,
    /// Device-side update counter for the named attribute.
    pub ctr: u64,
}

/// One out-of-band notification, ready for direct delivery through
/// [`deliver_event`](crate::asyn::deliver_event).
#[derive(Debug, Clone, Copy)]
pub enum EventNotice<'a> {
    Value(ValueEvent<'a>),
    Config(ConfigEvent<'a>),
    DataReady(DataReadyEvent<'a>),
}

/// Completion and event sink for callback-mode calls and push
/// notifications.
pub trait Callback: Send + Sync {
    /// An asynchronously executed command finished.
    fn cmd_done(&self, ev: &CmdDone<'_>) {
        let _ = ev;
    }

    /// An asynchronous attribute read finished.
    fn attr_read(&self, ev: &AttrRead<'_>) {
        let _ = ev;
    }

    /// An asynchronous attribute write finished.
    fn attr_written(&self, ev: &AttrWritten<'_>) {
        let _ = ev;
    }

    /// A remote device pushed an attribute value change.
    fn value_changed(&self, ev: &ValueEvent<'_>) {
        let _ = ev;
    }

    /// A remote device pushed an attribute configuration change.
    fn config_changed(&self, ev: &ConfigEvent<'_>) {
        let _ = ev;
    }

    /// A remote device signalled that new data is ready to be fetched.
    fn data_ready(&self, ev: &DataReadyEvent<'_>) {
        let _ = ev;
    }
}
