use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, warn};
use utils::current_timestamp_ns;

use logcoord_external_api::{
    append_cb::AppendCb,
    engine::{AppendOptions, LogEngine},
    error::HandlerError,
    Lsn, Role,
};

use crate::metrics;

use super::LogHandler;

impl<E: LogEngine> LogHandler<E> {
    /// Append `buf` to the stream and enqueue `cb` for apply-time
    /// completion.
    ///
    /// Admitted only on the leader while the handler is running. On
    /// success the assigned `(lsn, commit_ts_ns)` is returned and the apply
    /// pipeline owns `cb`; the caller must not mutate it afterwards. On any
    /// error the callback was not enqueued and stays with the caller.
    ///
    /// With `need_nonblock` the first engine outcome is final. Otherwise
    /// engine backpressure is retried with a linear backoff, each sleep
    /// `attempt * append_retry_sleep_step` capped at
    /// `append_retry_sleep_cap`; there is no overall deadline.
    #[inline]
    pub async fn append(
        &self,
        buf: Bytes,
        ref_ts_ns: i64,
        need_nonblock: bool,
        cb: Arc<dyn AppendCb>,
    ) -> Result<(Lsn, i64), HandlerError> {
        let begin = Instant::now();
        let mut wait_times: u32 = 0;
        let result = loop {
            let opts = AppendOptions {
                proposal_id: self.role_cache.proposal_id(),
                need_check_proposal_id: true,
                need_nonblock,
            };
            let once = self.append_once(opts, buf.clone(), ref_ts_ns, &cb).await;
            if need_nonblock {
                break once;
            }
            match once {
                Err(HandlerError::RetryLater) => {
                    wait_times = wait_times.saturating_add(1);
                    tokio::time::sleep(self.append_retry_backoff(wait_times)).await;
                }
                outcome => break outcome,
            }
        };
        metrics::record_append_cost(self.stream_id.load(Ordering::Relaxed), begin.elapsed());
        result
    }

    /// One pass of the append path: gate, engine append, callback enqueue.
    ///
    /// Runs under the state read lock and inside the append critical
    /// section, so teardown cannot revoke the apply status from under the
    /// enqueue.
    async fn append_once(
        &self,
        opts: AppendOptions,
        buf: Bytes,
        ref_ts_ns: i64,
        cb: &Arc<dyn AppendCb>,
    ) -> Result<(Lsn, i64), HandlerError> {
        let state = self.state.read().await;
        let _cs = self.append_barrier.enter();
        cb.set_append_start_ts(current_timestamp_ns());
        self.check_running()?;
        if !matches!(self.role_cache.role(), Role::Leader) {
            return Err(HandlerError::NotMaster);
        }
        let (lsn, ts_ns) = match state.engine()?.append(opts, buf, ref_ts_ns).await {
            Ok(assigned) => assigned,
            Err(e) => {
                if self
                    .append_warn_gate
                    .lock()
                    .try_pass(self.config.warn_log_interval)
                {
                    warn!("engine append failed, id: {}, error: {e}", state.id);
                }
                return Err(e);
            }
        };
        cb.set_append_finish_ts(current_timestamp_ns());
        cb.set_lsn(lsn);
        cb.set_commit_ts(ts_ns);
        // the enqueue is the commit point: from here on the apply pipeline
        // owns the callback
        state.apply_status()?.push_append_cb(Arc::clone(cb))?;
        debug!(
            "append success, id: {}, lsn: {lsn}, ts_ns: {ts_ns}",
            state.id
        );
        Ok((lsn, ts_ns))
    }

    /// Sleep before retry number `wait_times` of a blocking append
    fn append_retry_backoff(&self, wait_times: u32) -> Duration {
        self.config
            .append_retry_sleep_step
            .saturating_mul(wait_times)
            .min(self.config.append_retry_sleep_cap)
    }
}
