//! Seam to the underlying RPC transport.
//!
//! Marshalling, connection management and the wire protocol all live behind
//! [`Transport`]; this crate only needs "send this, give me the token the
//! reply will carry". Arrivals and connection loss flow back in through
//! [`AsynClient::on_reply`](crate::asyn::AsynClient::on_reply) and
//! [`AsynClient::on_connection_lost`](crate::asyn::AsynClient::on_connection_lost).

use bytes::Bytes;

use crate::defs::{ConnectionId, RequestKind, TransportHandle};

/// Description of one remote operation to be sent asynchronously.
///
/// Argument values are opaque here; encoding them is the transport's
/// business.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Execute a command on the remote device.
    Command {
        conn: ConnectionId,
        name: String,
        argin: Bytes,
    },
    /// Read one or more attributes.
    ReadAttrs {
        conn: ConnectionId,
        names: Vec<String>,
    },
    /// Write one or more attributes.
    WriteAttrs {
        conn: ConnectionId,
        names: Vec<String>,
        argin: Bytes,
    },
}

impl Operation {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Self::Command { conn, .. }
            | Self::ReadAttrs { conn, .. }
            | Self::WriteAttrs { conn, .. } => *conn,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Command { .. } => RequestKind::Command,
            Self::ReadAttrs { .. } => RequestKind::ReadAttrs,
            Self::WriteAttrs { .. } => RequestKind::WriteAttrs,
        }
    }
}

/// Minimal view of the transport: fire an operation, get back the handle
/// the reply will later be matched with.
///
/// May be called from any number of application threads at once.
pub trait Transport: Send + Sync + 'static {
    fn send_async(&self, op: &Operation) -> Result<TransportHandle, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no established connection for {0}")]
    NotConnected(ConnectionId),

    #[error("transport rejected the operation: {0}")]
    Rejected(String),
}
