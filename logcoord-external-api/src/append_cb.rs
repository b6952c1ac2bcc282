use crate::Lsn;

/// Completion callback accompanying one append.
///
/// The caller hands a fresh callback to every append; on a successful
/// enqueue the apply pipeline takes over the callback and later invokes
/// `on_committed` once the entry is committed at this replica, in LSN order
/// relative to the other appends of the stream. After a successful append
/// returns, the caller must no longer mutate the callback.
///
/// Setters take `&self` because the handler stamps the callback while the
/// caller may still hold its own reference; implementors provide the
/// interior mutability that fits their pipeline.
pub trait AppendCb: Send + Sync + 'static {
    /// Record when the handler started driving this append
    fn set_append_start_ts(&self, ts_ns: i64);

    /// Record when the engine accepted the entry
    fn set_append_finish_ts(&self, ts_ns: i64);

    /// Record the LSN the engine assigned
    fn set_lsn(&self, lsn: Lsn);

    /// Record the commit timestamp the engine assigned
    fn set_commit_ts(&self, ts_ns: i64);

    /// Invoked by the apply pipeline once the entry is committed at this
    /// replica
    fn on_committed(&self);
}
