use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds crossing the handler boundary.
///
/// The same kinds travel inside `ConfigChangeCmdResp`, so the enum is
/// serializable; a remote leader's verdict deserializes into exactly the
/// error the local dispatcher would have produced itself.
#[allow(clippy::module_name_repetitions)] // this-error generate code false-positive
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerError {
    /// The handler has not been initialized, or has been destroyed
    #[error("handler is not initialized")]
    NotInit,
    /// The handler has been stopped
    #[error("handler is no longer running")]
    NotRunning,
    /// The caller passed an unusable input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// This replica is not the leader of the stream
    #[error("this replica is not the leader")]
    NotMaster,
    /// The operation deadline expired
    #[error("operation timed out")]
    Timeout,
    /// Transient backpressure; the operation may succeed if retried
    #[error("temporarily rejected, retry later")]
    RetryLater,
    /// The current leader cannot be removed until leadership moves away
    #[error("removing the current leader is not allowed")]
    RemovingLeaderDenied,
    /// A precondition of the operation does not hold
    #[error("state mismatch: {0}")]
    StateMismatch(String),
    /// An invariant was violated; no recovery is attempted
    #[error("unexpected error: {0}")]
    Unexpected(String),
    /// The remote peer could not be reached
    #[error("connect error: {0}")]
    Connect(String),
}
