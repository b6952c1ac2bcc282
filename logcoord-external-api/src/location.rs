use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::{error::HandlerError, LogStreamId};

/// Cache resolving a stream to the address of its current leader.
///
/// Answers may be stale; callers that learn the answer was wrong ask for a
/// refresh and retry.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait LeaderLocator: Send + Sync + 'static {
    /// Address of the replica currently believed to lead `id`
    async fn get_leader(&self, id: LogStreamId) -> Result<String, HandlerError>;

    /// Schedule a refresh of the cached leader of `id` without waiting for
    /// the result
    fn nonblock_renew_leader(&self, id: LogStreamId);
}
