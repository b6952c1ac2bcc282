use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::{append_cb::AppendCb, error::HandlerError, LogStreamId, Lsn};

/// The per-stream completion pipeline owned by the apply service.
///
/// Successful appends push their callback here; the apply service drains
/// the queue and invokes the callbacks in LSN order once the corresponding
/// entries commit.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ApplyStatus: Send + Sync + 'static {
    /// Enqueue the callback of a freshly appended entry.
    ///
    /// Enqueue order must match LSN assignment order; the handler
    /// guarantees this by pushing under the same critical section that
    /// performed the append.
    fn push_append_cb(&self, cb: Arc<dyn AppendCb>) -> Result<(), HandlerError>;

    /// Whether every enqueued callback has been invoked, together with the
    /// end LSN observed at the check
    async fn is_apply_done(&self) -> Result<(bool, Option<Lsn>), HandlerError>;

    /// Refuse further callbacks and let the queue drain
    async fn stop(&self) -> Result<(), HandlerError>;

    /// Drop the file-size watermark callback.
    ///
    /// Must not be invoked while holding the apply status's internal lock;
    /// the handler calls it from its own stop path only.
    fn unregister_file_size_cb(&self);
}

/// The apply service: owner of every stream's `ApplyStatus`
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ApplyService: Send + Sync + 'static {
    /// Borrow the status object of `id`; the returned reference keeps the
    /// status alive until it is reverted
    fn get_apply_status(&self, id: LogStreamId) -> Result<Arc<dyn ApplyStatus>, HandlerError>;

    /// Return a reference obtained from `get_apply_status`
    fn revert_apply_status(&self, status: Arc<dyn ApplyStatus>);

    /// Timestamp below which every entry of `id` has been applied
    async fn get_min_unapplied_ts_ns(&self, id: LogStreamId) -> Result<i64, HandlerError>;
}
