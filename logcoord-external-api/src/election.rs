use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::{error::HandlerError, LogStreamId};

/// Adapter steering the election layer around replicas that must not win.
///
/// The blacklist is a short, cancellable directive: entries expire on their
/// own, so callers never rely on a blacklisted replica staying blacklisted.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ElectionAdapter: Send + Sync + 'static {
    /// Refuse electing `server` as leader of `id` for a bounded window
    async fn add_to_blacklist(&self, id: LogStreamId, server: String) -> Result<(), HandlerError>;

    /// Let `server` win elections of `id` again
    async fn remove_from_blacklist(
        &self,
        id: LogStreamId,
        server: String,
    ) -> Result<(), HandlerError>;
}
