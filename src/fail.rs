//! Failure stacks carried by finished calls.
//!
//! A remote failure is rarely a single message: the device reports its own
//! error, the layer that relayed it adds context, and synthesized failures
//! (lost connection, shutdown) need to be distinguishable from genuine
//! remote ones. A [`FailStack`] keeps those entries ordered, innermost
//! first, and every consumer gets the same shape regardless of the cause.

use std::fmt;

use crate::defs::ConnectionId;

/// Machine-readable class of one failure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailCode {
    /// The remote device executed the operation and reported a failure.
    DeviceError,
    /// The transport gave up waiting for the remote reply.
    CommTimedOut,
    /// The connection was torn down with the call still in flight.
    ConnectionLost,
    /// The owning client context was shut down with the call in flight.
    ClientShutdown,
}

impl fmt::Display for FailCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::DeviceError => "device error",
            Self::CommTimedOut => "communication timed out",
            Self::ConnectionLost => "connection lost",
            Self::ClientShutdown => "client shutdown",
        };
        f.write_str(text)
    }
}

/// One entry of a failure stack.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fail {
    pub code: FailCode,
    pub desc: String,
    /// Which component recorded the entry.
    pub origin: String,
}

impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.origin, self.desc)
    }
}

/// Ordered stack of failure entries for one finished call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FailStack {
    pub errors: Vec<Fail>,
}

impl FailStack {
    pub fn single(code: FailCode, desc: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            errors: vec![Fail {
                code,
                desc: desc.into(),
                origin: origin.into(),
            }],
        }
    }

    /// Synthesized stack for a call cancelled by connection teardown.
    pub fn connection_lost(conn: ConnectionId) -> Self {
        Self::single(
            FailCode::ConnectionLost,
            format!("{conn} became unreachable before the reply arrived"),
            "devcall::asyn",
        )
    }

    /// Synthesized stack for calls still in flight when the client context
    /// is dropped.
    pub fn client_shutdown() -> Self {
        Self::single(
            FailCode::ClientShutdown,
            "client context was shut down with the call in flight",
            "devcall::asyn",
        )
    }

    /// Stack reported by a transport whose remote call exceeded its deadline.
    pub fn comm_timed_out(conn: ConnectionId) -> Self {
        Self::single(
            FailCode::CommTimedOut,
            format!("remote call on {conn} exceeded the transport deadline"),
            "devcall::transport",
        )
    }

    /// Wrap further context around the existing entries.
    pub fn push(&mut self, fail: Fail) {
        self.errors.push(fail);
    }

    pub fn has_code(&self, code: FailCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn is_comm_timeout(&self) -> bool {
        self.has_code(FailCode::CommTimedOut)
    }

    pub fn is_connection_lost(&self) -> bool {
        self.has_code(FailCode::ConnectionLost)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for FailStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("empty failure stack"),
            [only] => write!(f, "{only}"),
            [first, rest @ ..] => write!(f, "{first} (+{} more)", rest.len()),
        }
    }
}

impl std::error::Error for FailStack {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_compresses_long_stacks() {
        let mut stack = FailStack::single(FailCode::DeviceError, "power supply off", "psu/1");
        stack.push(Fail {
            code: FailCode::DeviceError,
            desc: "command Ramp failed".into(),
            origin: "psu/1".into(),
        });

        assert_eq!(
            stack.to_string(),
            "device error (psu/1): power supply off (+1 more)"
        );
    }

    #[test]
    fn code_queries() {
        let stack = FailStack::connection_lost(ConnectionId(3));
        assert!(stack.is_connection_lost());
        assert!(!stack.is_comm_timeout());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn roundtrips_through_serde() {
        let stack = FailStack::comm_timed_out(ConnectionId(7));
        let json = serde_json::to_string(&stack).unwrap();
        assert_eq!(serde_json::from_str::<FailStack>(&json).unwrap(), stack);
    }
}
