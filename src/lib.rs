//! # devcall
//!
//! Client-side asynchronous invocation & notification core for
//! device-control middleware.
//!
//! # Concepts
//!
//! Every non-blocking remote operation (command, attribute read, attribute
//! write) is tracked by exactly one record in a per-client pending table
//! until its result is consumed, under one of two delivery sub-models:
//!
//! - **Polling**: submit, keep the returned [`RequestId`], fetch the reply
//!   later with a non-blocking, bounded or unbounded wait.
//! - **Callback**: submit together with a [`Callback`]; a dispatch worker
//!   (push mode) or an explicit drain pass (pull mode) invokes it when the
//!   reply lands.
//!
//! The same [`Callback`] abstraction also receives out-of-band push events
//! from remote devices; those never touch the pending table and are handed
//! over through [`deliver_event`].
//!
//! The wire transport stays outside: it is consumed through the
//! [`Transport`] seam, and feeds arrivals and connection loss back in via
//! [`AsynClient::on_reply`] / [`AsynClient::on_connection_lost`].
//!
//! # Usage
//!
//! ```ignore
//! let client = AsynClient::new(transport);
//!
//! let id = client.submit_poll(Operation::Command {
//!     conn,
//!     name: "Ramp".into(),
//!     argin: argin.clone(),
//! })?;
//!
//! // ... do other work ...
//!
//! let reply = client.get_reply(id, Wait::Bounded(Duration::from_millis(500)))?;
//! ```

pub mod asyn;
pub mod callback;
pub mod defs;
pub mod fail;
pub mod transport;

pub use asyn::{
    deliver_event, AsynClient, DrainError, Reply, ReplyError, SubModelError, SubmitError,
};
pub use callback::{
    AttrRead, AttrWritten, Callback, CmdDone, ConfigEvent, DataReadyEvent, EventNotice, ValueEvent,
};
pub use defs::{
    ConnectionId, CountScope, RequestId, RequestKind, SubModel, TransportHandle, Wait,
};
pub use fail::{Fail, FailCode, FailStack};
pub use transport::{Operation, Transport, TransportError};

pub mod prelude {
    pub use crate::asyn::AsynClient;
    pub use crate::callback::Callback;
    pub use crate::defs::{SubModel, Wait};
    pub use crate::transport::{Operation, Transport};
}

// ==== Compile-time guarantees ====

// Everything shared across application, transport and worker threads.
assert::assert_impl_all!(asyn::AsynClient: Send, Sync);
assert::assert_impl_all!(defs::RequestId: Send, Sync, Copy);
assert::assert_impl_all!(fail::FailStack: Send, Sync);
assert::assert_obj_safe!(callback::Callback, transport::Transport);
