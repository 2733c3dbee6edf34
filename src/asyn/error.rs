use thiserror::Error;

use crate::{defs::RequestId, fail::FailStack, transport::TransportError};

/// Failure surface of [`AsynClient::get_reply`](super::AsynClient::get_reply).
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The id was never issued by this client context, or its reply was
    /// already consumed. A caller bug or a stale id; never transient.
    #[error("no outstanding request with id {0}")]
    UnknownRequest(RequestId),

    /// The reply has not arrived within the allowed wait. The record is
    /// untouched; retry with any wait mode.
    #[error("reply for {0} has not arrived yet")]
    NotArrivedYet(RequestId),

    /// The call finished without a usable answer: remote error,
    /// transport-reported timeout, lost connection or client shutdown.
    /// The stack's codes tell the causes apart.
    #[error("request failed: {0}")]
    Failed(#[from] FailStack),
}

/// Failure surface of the submission methods.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to start the dispatch worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Failure surface of
/// [`AsynClient::set_sub_model`](super::AsynClient::set_sub_model).
#[derive(Debug, Error)]
pub enum SubModelError {
    #[error("failed to start the dispatch worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Failure surface of
/// [`AsynClient::drain_callbacks_for`](super::AsynClient::drain_callbacks_for).
#[derive(Debug, Error)]
pub enum DrainError {
    /// The wait elapsed with callback-mode replies still missing. Already
    /// arrived records were dispatched regardless.
    #[error("{remaining} callback-mode replies still outstanding after the allowed wait")]
    StillPending { remaining: usize },
}
