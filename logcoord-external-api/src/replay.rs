use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::{error::HandlerError, LogStreamId, Lsn};

/// The replay service: decodes committed entries and applies them to
/// in-memory state on followers and recovering leaders.
///
/// Queries against a stream whose replay has not been enabled fail with
/// `StateMismatch`.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ReplayService: Send + Sync + 'static {
    /// Start replaying `id` from `start_lsn` / `start_ts_ns`
    async fn enable(
        &self,
        id: LogStreamId,
        start_lsn: Lsn,
        start_ts_ns: i64,
    ) -> Result<(), HandlerError>;

    /// Stop replaying `id` and discard its replay progress
    async fn disable(&self, id: LogStreamId) -> Result<(), HandlerError>;

    /// Whether replay of `id` is currently enabled
    async fn is_enabled(&self, id: LogStreamId) -> Result<bool, HandlerError>;

    /// Park log submission of `id`; replayed state stops advancing
    async fn set_submit_log_pending(&self, id: LogStreamId) -> Result<(), HandlerError>;

    /// Resume log submission of `id`
    async fn erase_submit_log_pending(&self, id: LogStreamId) -> Result<(), HandlerError>;

    /// Timestamp below which every entry of `id` has been replayed
    async fn get_min_unreplayed_ts_ns(&self, id: LogStreamId) -> Result<i64, HandlerError>;
}
